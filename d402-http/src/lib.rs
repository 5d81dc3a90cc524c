#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! HTTP client for the deferred x402 facilitator REST API.
//!
//! [`DeferredFacilitatorClient`] speaks to a remote facilitator over
//! JSON HTTP: the generic `/verify`, `/settle`, and `/supported`
//! endpoints, plus the `/deferred/*` voucher surface (voucher lookups,
//! series, availability, collections, buyer accounts, and flushes).
//!
//! The client implements both [`d402::Facilitator`] and
//! [`d402_evm::deferred::server::DeferredFacilitatorApi`], so sellers can
//! delegate verification and requirements negotiation to a remote
//! facilitator without holding keys or speaking to a chain node.

mod facilitator_client;

pub use facilitator_client::{
    DeferredFacilitatorClient, DeferredFacilitatorClientError, FlushRequest, StoreVoucherRequest,
};
