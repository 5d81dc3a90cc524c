//! Deferred x402 facilitator HTTP server.
//!
//! # Usage
//!
//! ```bash
//! # Run with default config (config.toml in current directory)
//! cargo run -p d402-facilitator --release
//!
//! # Run with custom config path
//! CONFIG=/path/to/config.toml cargo run -p d402-facilitator
//!
//! # Configure logging level
//! RUST_LOG=info cargo run -p d402-facilitator
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` — Path to TOML configuration file (default: `config.toml`)
//! - `HOST` — Override bind address (default: `0.0.0.0`)
//! - `PORT` — Override port (default: `4022`)
//! - `RUST_LOG` — Log level filter (default: `info`)

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use alloy_network::EthereumWallet;
use alloy_signer_local::PrivateKeySigner;
use axum::http::Method;
use d402_evm::chain::{Eip155ChainProvider, Eip155ChainReference};
use d402_evm::deferred::facilitator::DeferredEvmFacilitator;
use d402_evm::deferred::store::MemoryVoucherStore;
use tower_http::cors;
use tracing_subscriber::EnvFilter;
use url::Url;

use d402_facilitator::config::FacilitatorConfig;
use d402_facilitator::handlers::{AppState, ChainFacilitator, facilitator_router};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!("Facilitator failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = FacilitatorConfig::load()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        chains = config.chains.len(),
        "Loaded configuration"
    );

    if config.chains.is_empty() {
        tracing::warn!("No chains configured — facilitator will report no supported schemes");
    }

    // The reference deployment keeps vouchers in memory; swap in a
    // durable VoucherStore implementation for anything beyond testing.
    let store = Arc::new(MemoryVoucherStore::new());

    let mut facilitators: HashMap<String, Arc<ChainFacilitator>> = HashMap::new();
    for (network, chain_cfg) in &config.chains {
        let Some(chain_id) = d402::networks::chain_id_by_network_name(network) else {
            tracing::warn!(network = %network, "Skipping chain: unknown network name");
            continue;
        };

        let key_str = chain_cfg.signer_private_key.trim();
        if key_str.is_empty() || key_str.starts_with('$') {
            tracing::warn!(
                network = %network,
                "Skipping chain: signer_private_key not resolved (missing env var?)"
            );
            continue;
        }

        let signer: PrivateKeySigner = key_str
            .parse()
            .map_err(|e| format!("Invalid signer key for {network}: {e}"))?;
        let signer_address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let rpc_url: Url = chain_cfg
            .rpc_url
            .parse()
            .map_err(|e| format!("Invalid RPC URL for {network}: {e}"))?;

        let provider = Eip155ChainProvider::new(
            Eip155ChainReference::new(chain_id),
            wallet,
            &[(rpc_url, None)],
            chain_cfg.eip1559,
            config.receipt_timeout_secs,
        )?;

        tracing::info!(
            network = %network,
            chain_id,
            signer = %signer_address,
            "Registered deferred scheme"
        );
        let facilitator = DeferredEvmFacilitator::new(
            provider,
            Arc::clone(&store) as Arc<dyn d402_evm::deferred::store::VoucherStore>,
        );
        facilitators.insert(network.clone(), Arc::new(facilitator));
    }

    let state = AppState::new(facilitators, store);

    let app = facilitator_router(state).layer(
        cors::CorsLayer::new()
            .allow_origin(cors::Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(cors::Any),
    );

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Facilitator listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Facilitator shut down gracefully");
    Ok(())
}

/// Waits for Ctrl-C or SIGTERM (Unix) to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down..."),
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl-C");
        tracing::info!("Received Ctrl-C, shutting down...");
    }
}
