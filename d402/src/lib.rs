//! Core types for the deferred x402 settlement scheme.
//!
//! The deferred scheme lets a buyer pay a seller for repeated API access
//! off-chain by signing a monotonically-aggregating voucher that a
//! facilitator later redeems on-chain against an escrow contract. This
//! crate holds the chain-agnostic protocol surface:
//!
//! - [`proto`] — x402 v1 wire types: payment payloads, payment
//!   requirements, 402 response bodies, verify/settle envelopes
//! - [`encoding`] — base64 envelope used by the `X-PAYMENT` header
//! - [`timestamp`] — stringified Unix timestamps
//! - [`networks`] — registry of known network names and EVM chain ids
//! - [`facilitator`] — the dyn-compatible [`Facilitator`] trait
//! - [`scheme`] — the [`DeferredScheme`] identifier
//! - [`headers`] — HTTP header names exchanged between buyer and seller
//!
//! Chain-specific voucher logic (EIP-712 signing, verification, on-chain
//! settlement) lives in the `d402-evm` crate.

pub mod encoding;
pub mod facilitator;
pub mod headers;
pub mod networks;
pub mod proto;
pub mod scheme;
pub mod timestamp;

pub use facilitator::{BoxFuture, Facilitator, FacilitatorError};
pub use proto::{SettleResponse, SupportedResponse, VerifyResponse};
pub use scheme::DeferredScheme;
pub use timestamp::UnixTimestamp;
