//! EVM chain support for deferred x402 payments.
//!
//! This module provides the types and providers for interacting with
//! EVM-compatible blockchains:
//!
//! - [`Eip155ChainReference`] - A numeric chain ID for EVM networks (e.g., `84532` for Base Sepolia)
//! - [`TokenAmount`] - A `U256` amount serialized as a decimal string
//! - [`ChecksummedAddress`] - An address serialized with EIP-55 checksum encoding
//! - [`Eip155ChainProvider`] - Provider for submitting settlement transactions

pub mod types;
pub use types::*;

/// EVM chain provider implementation.
#[cfg(feature = "facilitator")]
pub mod provider;

#[cfg(feature = "facilitator")]
pub use provider::*;
