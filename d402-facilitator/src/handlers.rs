//! Axum route handlers for the deferred facilitator service.
//!
//! The service exposes the generic x402 endpoints (`/supported`,
//! `/verify`, `/settle`) and the deferred voucher REST surface under
//! `/deferred/*`, all backed by per-network
//! [`DeferredEvmFacilitator`] instances sharing one voucher store.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use alloy_primitives::{Address, B256};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Json, Router, routing};
use d402::facilitator::Facilitator;
use d402::proto::{self, SettleResponse, SupportedResponse, VerifyResponse};
use d402_evm::chain::Eip155ChainProvider;
use d402_evm::deferred::facilitator::DeferredEvmFacilitator;
use d402_evm::deferred::store::{CollectionQuery, Pagination, VoucherQuery, VoucherStore,
    VoucherStoreError};
use d402_evm::deferred::types::{
    FlushAuthorization, SignedVoucher, VerifyRequest as TypedVerifyRequest,
};
use serde::Deserialize;

use crate::error::ServiceError;

/// A deferred facilitator bound to one chain provider.
pub type ChainFacilitator = DeferredEvmFacilitator<Eip155ChainProvider>;

/// Shared application state: per-network facilitators plus the voucher
/// store they all record into.
#[derive(Clone)]
pub struct AppState {
    facilitators: Arc<HashMap<String, Arc<ChainFacilitator>>>,
    by_chain_id: Arc<HashMap<u64, Arc<ChainFacilitator>>>,
    store: Arc<dyn VoucherStore>,
}

impl AppState {
    /// Builds the state from facilitators keyed by network name.
    #[must_use]
    pub fn new(
        facilitators: HashMap<String, Arc<ChainFacilitator>>,
        store: Arc<dyn VoucherStore>,
    ) -> Self {
        let by_chain_id = facilitators
            .keys()
            .filter_map(|network| {
                let chain_id = d402::networks::chain_id_by_network_name(network)?;
                Some((chain_id, Arc::clone(&facilitators[network])))
            })
            .collect();
        Self {
            facilitators: Arc::new(facilitators),
            by_chain_id: Arc::new(by_chain_id),
            store,
        }
    }

    fn by_network(&self, network: &str) -> Result<&Arc<ChainFacilitator>, ServiceError> {
        self.facilitators
            .get(network)
            .ok_or_else(|| ServiceError::UnknownNetwork(network.to_owned()))
    }

    fn by_chain(&self, chain_id: u64) -> Result<&Arc<ChainFacilitator>, ServiceError> {
        self.by_chain_id
            .get(&chain_id)
            .ok_or(ServiceError::UnknownChain(chain_id))
    }
}

#[derive(Debug, Deserialize)]
struct PageParams {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
}

impl PageParams {
    fn pagination(&self) -> Pagination {
        let defaults = Pagination::default();
        Pagination {
            limit: self.limit.unwrap_or(defaults.limit),
            offset: self.offset.unwrap_or(defaults.offset),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default)]
    buyer: Option<Address>,
    #[serde(default)]
    seller: Option<Address>,
    #[serde(default)]
    latest: Option<bool>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CollectionParams {
    #[serde(default)]
    id: Option<B256>,
    #[serde(default)]
    nonce: Option<u64>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountParams {
    seller: Address,
    asset: Address,
    escrow: Address,
    chain_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlushBody {
    flush_authorization: FlushAuthorization,
    escrow: Address,
    chain_id: u64,
}

fn parse_voucher_id(raw: &str) -> Result<B256, ServiceError> {
    B256::from_str(raw).map_err(|_| ServiceError::InvalidParameter(format!("voucher id {raw}")))
}

/// `GET /supported` — aggregates supported payment kinds across chains.
async fn get_supported(State(state): State<AppState>) -> Json<SupportedResponse> {
    let mut kinds = Vec::new();
    let mut signers = HashMap::new();
    for facilitator in state.facilitators.values() {
        if let Ok(supported) = facilitator.supported().await {
            kinds.extend(supported.kinds);
            signers.extend(supported.signers);
        }
    }
    Json(SupportedResponse { kinds, signers })
}

/// `POST /verify` — verifies a deferred payment payload.
async fn post_verify(
    State(state): State<AppState>,
    Json(body): Json<proto::VerifyRequest>,
) -> Result<Json<VerifyResponse>, ServiceError> {
    let network = body
        .network_name()
        .ok_or_else(|| {
            ServiceError::Facilitator(d402::FacilitatorError::InvalidFormat(
                "request names no network".into(),
            ))
        })?
        .to_owned();
    let facilitator = state.by_network(&network)?;
    let response = facilitator.verify(body).await?;
    Ok(Json(response))
}

/// `POST /settle` — settles a deferred payment payload on-chain.
async fn post_settle(
    State(state): State<AppState>,
    Json(body): Json<proto::SettleRequest>,
) -> Result<Json<SettleResponse>, ServiceError> {
    let network = body
        .network_name()
        .ok_or_else(|| {
            ServiceError::Facilitator(d402::FacilitatorError::InvalidFormat(
                "request names no network".into(),
            ))
        })?
        .to_owned();
    let facilitator = state.by_network(&network)?;
    let response = facilitator.settle(body).await?;
    Ok(Json(response))
}

/// `POST /deferred/vouchers` — verifies a payment payload and commits its
/// voucher to the store. Answers 201 on stored-and-verified.
async fn post_vouchers(
    State(state): State<AppState>,
    Json(body): Json<proto::VerifyRequest>,
) -> Result<(StatusCode, Json<VerifyResponse>), ServiceError> {
    let request = TypedVerifyRequest::from_proto(body)
        .map_err(d402::FacilitatorError::from)
        .map_err(ServiceError::Facilitator)?;
    let facilitator = state.by_network(&request.payment_payload.network)?;
    let response = facilitator
        .verify_payment(&request.payment_payload, &request.payment_requirements)
        .await?;
    if !response.is_valid() {
        return Ok((StatusCode::BAD_REQUEST, Json(response)));
    }

    let signed = SignedVoucher {
        signature: request.payment_payload.payload.signature.clone(),
        voucher: request.payment_payload.payload.voucher.clone(),
    };
    match state.store.store_voucher(signed).await {
        Ok(()) => Ok((StatusCode::CREATED, Json(response))),
        Err(VoucherStoreError::AlreadyExists) => Err(ServiceError::VoucherExists),
        Err(VoucherStoreError::Backend(e)) => Err(ServiceError::Facilitator(
            d402::FacilitatorError::Other(e.into()),
        )),
    }
}

/// `GET /deferred/vouchers` — lists vouchers by buyer/seller.
async fn get_vouchers(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<SignedVoucher>>, ServiceError> {
    let pagination = Pagination {
        limit: params.limit.unwrap_or(Pagination::default().limit),
        offset: params.offset.unwrap_or(0),
    };
    let vouchers = state
        .store
        .get_vouchers(
            VoucherQuery {
                buyer: params.buyer,
                seller: params.seller,
                latest: params.latest.unwrap_or(false),
            },
            pagination,
        )
        .await
        .map_err(|e| ServiceError::Facilitator(d402::FacilitatorError::Other(Box::new(e))))?;
    Ok(Json(vouchers))
}

/// `GET /deferred/vouchers/{id}` — a voucher series, nonce-descending.
async fn get_voucher_series(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Json<Vec<SignedVoucher>>, ServiceError> {
    let id = parse_voucher_id(&id)?;
    let series = state
        .store
        .get_voucher_series(id, params.pagination())
        .await
        .map_err(|e| ServiceError::Facilitator(d402::FacilitatorError::Other(Box::new(e))))?;
    Ok(Json(series))
}

/// `GET /deferred/vouchers/{id}/{nonce}` — one stored voucher.
async fn get_voucher(
    State(state): State<AppState>,
    Path((id, nonce)): Path<(String, u64)>,
) -> Result<Json<SignedVoucher>, ServiceError> {
    let id = parse_voucher_id(&id)?;
    let voucher = state
        .store
        .get_voucher(id, Some(nonce))
        .await
        .map_err(|e| ServiceError::Facilitator(d402::FacilitatorError::Other(Box::new(e))))?
        .ok_or(ServiceError::VoucherNotFound)?;
    Ok(Json(voucher))
}

/// `GET /deferred/vouchers/available/{buyer}/{seller}` — the voucher a
/// buyer should aggregate onto. 404 with `voucher_not_found` when none.
async fn get_available_voucher(
    State(state): State<AppState>,
    Path((buyer, seller)): Path<(Address, Address)>,
) -> Result<Json<SignedVoucher>, ServiceError> {
    let voucher = state
        .store
        .get_available_voucher(buyer, seller)
        .await
        .map_err(|e| ServiceError::Facilitator(d402::FacilitatorError::Other(Box::new(e))))?
        .ok_or(ServiceError::VoucherNotFound)?;
    Ok(Json(voucher))
}

/// `POST /deferred/vouchers/{id}/{nonce}/verify` — re-verifies a stored
/// voucher against signature and chain state.
async fn post_voucher_verify(
    State(state): State<AppState>,
    Path((id, nonce)): Path<(String, u64)>,
) -> Result<Json<VerifyResponse>, ServiceError> {
    let id = parse_voucher_id(&id)?;
    let stored = state
        .store
        .get_voucher(id, Some(nonce))
        .await
        .map_err(|e| ServiceError::Facilitator(d402::FacilitatorError::Other(Box::new(e))))?
        .ok_or(ServiceError::VoucherNotFound)?;
    let facilitator = state.by_chain(stored.voucher.chain_id)?;
    let response = match facilitator.verify_stored_voucher(id, nonce).await {
        Ok(payer) => VerifyResponse::valid(payer.to_string()),
        Err(reason) => {
            VerifyResponse::invalid(Some(stored.voucher.buyer.to_string()), reason.to_string())
        }
    };
    Ok(Json(response))
}

/// `POST /deferred/vouchers/{id}/{nonce}/settle` — settles a stored
/// voucher on-chain.
async fn post_voucher_settle(
    State(state): State<AppState>,
    Path((id, nonce)): Path<(String, u64)>,
) -> Result<Json<SettleResponse>, ServiceError> {
    let id = parse_voucher_id(&id)?;
    let stored = state
        .store
        .get_voucher(id, Some(nonce))
        .await
        .map_err(|e| ServiceError::Facilitator(d402::FacilitatorError::Other(Box::new(e))))?
        .ok_or(ServiceError::VoucherNotFound)?;
    let network = d402::networks::network_name_by_chain_id(stored.voucher.chain_id)
        .unwrap_or_default()
        .to_owned();
    let facilitator = state.by_chain(stored.voucher.chain_id)?;
    let response = match facilitator.settle_stored_voucher(id, nonce).await {
        Ok((tx_hash, _collected)) => SettleResponse::Success {
            payer: stored.voucher.buyer.to_string(),
            transaction: tx_hash.to_string(),
            network,
        },
        Err(reason) => SettleResponse::Error {
            reason: reason.to_string(),
            payer: Some(stored.voucher.buyer.to_string()),
            network,
        },
    };
    Ok(Json(response))
}

/// `GET /deferred/vouchers/collections` — settlement records.
async fn get_voucher_collections(
    State(state): State<AppState>,
    Query(params): Query<CollectionParams>,
) -> Result<Json<Vec<d402_evm::deferred::types::VoucherCollection>>, ServiceError> {
    let pagination = Pagination {
        limit: params.limit.unwrap_or(Pagination::default().limit),
        offset: params.offset.unwrap_or(0),
    };
    let collections = state
        .store
        .get_voucher_collections(
            CollectionQuery {
                id: params.id,
                nonce: params.nonce,
            },
            pagination,
        )
        .await
        .map_err(|e| ServiceError::Facilitator(d402::FacilitatorError::Other(Box::new(e))))?;
    Ok(Json(collections))
}

/// `GET /deferred/buyers/{buyer}/account` — the buyer's escrow account
/// snapshot, or an `{error}` sentinel when the chain read fails.
async fn get_buyer_account(
    State(state): State<AppState>,
    Path(buyer): Path<Address>,
    Query(params): Query<AccountParams>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let facilitator = state.by_chain(params.chain_id)?;
    let body = match facilitator
        .get_escrow_account_details(
            buyer,
            params.seller,
            params.asset,
            params.escrow,
            params.chain_id,
        )
        .await
    {
        Ok(snapshot) => serde_json::json!(snapshot),
        Err(reason) => serde_json::json!({ "error": reason.to_string() }),
    };
    Ok(Json(body))
}

/// `POST /deferred/buyers/{buyer}/flush` — submits a flush authorization.
async fn post_buyer_flush(
    State(state): State<AppState>,
    Path(buyer): Path<Address>,
    Json(body): Json<FlushBody>,
) -> Result<Json<SettleResponse>, ServiceError> {
    if Address::from(body.flush_authorization.buyer) != buyer {
        return Err(ServiceError::InvalidParameter(
            "flush authorization buyer does not match the path".into(),
        ));
    }
    let network = d402::networks::network_name_by_chain_id(body.chain_id)
        .unwrap_or_default()
        .to_owned();
    let facilitator = state.by_chain(body.chain_id)?;
    let response = match facilitator
        .flush_with_authorization(&body.flush_authorization, body.escrow, body.chain_id)
        .await
    {
        Ok(tx_hash) => SettleResponse::Success {
            payer: buyer.to_string(),
            transaction: tx_hash.to_string(),
            network,
        },
        Err(reason) => SettleResponse::Error {
            reason: reason.to_string(),
            payer: Some(buyer.to_string()),
            network,
        },
    };
    Ok(Json(response))
}

/// Health check endpoint.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Creates the facilitator [`Router`] with all endpoints.
#[must_use]
pub fn facilitator_router(state: AppState) -> Router {
    Router::new()
        .route("/supported", routing::get(get_supported))
        .route("/verify", routing::post(post_verify))
        .route("/settle", routing::post(post_settle))
        .route(
            "/deferred/vouchers",
            routing::get(get_vouchers).post(post_vouchers),
        )
        .route(
            "/deferred/vouchers/collections",
            routing::get(get_voucher_collections),
        )
        .route(
            "/deferred/vouchers/available/{buyer}/{seller}",
            routing::get(get_available_voucher),
        )
        .route("/deferred/vouchers/{id}", routing::get(get_voucher_series))
        .route(
            "/deferred/vouchers/{id}/{nonce}",
            routing::get(get_voucher),
        )
        .route(
            "/deferred/vouchers/{id}/{nonce}/verify",
            routing::post(post_voucher_verify),
        )
        .route(
            "/deferred/vouchers/{id}/{nonce}/settle",
            routing::post(post_voucher_settle),
        )
        .route(
            "/deferred/buyers/{buyer}/account",
            routing::get(get_buyer_account),
        )
        .route(
            "/deferred/buyers/{buyer}/flush",
            routing::post(post_buyer_flush),
        )
        .route("/health", routing::get(health))
        .with_state(state)
}
