#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! EVM support for the deferred x402 settlement scheme.
//!
//! The deferred scheme amortizes gas cost over many requests: the buyer
//! signs a monotonically-aggregating voucher per request, and the seller
//! (through a facilitator) redeems the latest voucher on-chain against the
//! `DeferredPaymentEscrow` contract at a time of its choosing. Only one
//! settlement transaction is needed per buyer/seller relationship.
//!
//! # Architecture
//!
//! - [`chain`] - Core EVM chain types and the facilitator-side provider
//! - [`deferred`] - The deferred scheme itself:
//!   - [`deferred::types`] - Vouchers, payloads, authorizations
//!   - [`deferred::typed_data`] - EIP-712 signing and recovery
//!   - [`deferred::codec`] - `X-PAYMENT` header encoding
//!   - [`deferred::client`] - Buyer-side voucher construction
//!   - [`deferred::server`] - Seller-side requirements negotiation
//!   - [`deferred::store`] - Voucher persistence contract
//!   - [`deferred::facilitator`] - Verification and on-chain settlement
//!
//! # Feature Flags
//!
//! - `facilitator` - Facilitator-side verification and settlement (on by default)
//! - `telemetry` - `tracing` instrumentation

pub mod chain;
pub mod deferred;

mod networks;
pub use networks::*;
