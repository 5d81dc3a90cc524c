//! Core trait and error type for x402 payment facilitators.
//!
//! This module provides the unified [`Facilitator`] trait for verifying and
//! settling x402 payments, along with the [`FacilitatorError`] enum for
//! failures that are not expressible as verification reason codes.
//!
//! Verification failures are *not* errors: they come back as
//! [`VerifyResponse::Invalid`](crate::proto::VerifyResponse::Invalid) /
//! [`SettleResponse::Error`](crate::proto::SettleResponse::Error) envelopes
//! carrying a machine-readable reason. [`FacilitatorError`] is reserved for
//! schema parse failures and unexpected conditions.
//!
//! The trait is dyn-compatible, allowing heterogeneous facilitator
//! instances to be stored in registries and passed as trait objects.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::proto;

/// Boxed future type alias for dyn-compatible async trait methods.
///
/// Eliminates the verbose `Pin<Box<dyn Future<Output = T> + Send + 'a>>`
/// pattern throughout the codebase.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors that can occur during facilitator operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FacilitatorError {
    /// The request body does not parse as a payload of this scheme.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
    /// The network named in the request is not served by this facilitator.
    #[error("Unsupported network {0}")]
    UnsupportedNetwork(String),
    /// Any other error not covered by the specific variants.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl From<serde_json::Error> for FacilitatorError {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidFormat(value.to_string())
    }
}

/// Trait defining the asynchronous interface for x402 payment facilitators.
///
/// This is the unified trait for both local scheme handlers and remote
/// facilitator clients. It is dyn-compatible, allowing instances to be
/// stored as `Box<dyn Facilitator>` in registries.
pub trait Facilitator: Send + Sync {
    /// Verifies a proposed x402 payment payload against a [`proto::VerifyRequest`].
    ///
    /// This includes checking payload integrity, voucher continuity,
    /// signature validity, balance sufficiency, and compliance with the
    /// declared payment requirements.
    fn verify(
        &self,
        request: proto::VerifyRequest,
    ) -> BoxFuture<'_, Result<proto::VerifyResponse, FacilitatorError>>;

    /// Executes an on-chain x402 settlement for a [`proto::SettleRequest`].
    ///
    /// This method re-validates the payment and, if valid, performs an
    /// on-chain call to settle it.
    fn settle(
        &self,
        request: proto::SettleRequest,
    ) -> BoxFuture<'_, Result<proto::SettleResponse, FacilitatorError>>;

    /// Returns the payment kinds supported by this facilitator.
    fn supported(&self) -> BoxFuture<'_, Result<proto::SupportedResponse, FacilitatorError>>;
}

impl<T: Facilitator> Facilitator for Arc<T> {
    fn verify(
        &self,
        request: proto::VerifyRequest,
    ) -> BoxFuture<'_, Result<proto::VerifyResponse, FacilitatorError>> {
        self.as_ref().verify(request)
    }

    fn settle(
        &self,
        request: proto::SettleRequest,
    ) -> BoxFuture<'_, Result<proto::SettleResponse, FacilitatorError>> {
        self.as_ref().settle(request)
    }

    fn supported(&self) -> BoxFuture<'_, Result<proto::SupportedResponse, FacilitatorError>> {
        self.as_ref().supported()
    }
}
