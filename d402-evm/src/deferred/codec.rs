//! Wire codec for the `X-PAYMENT` header.
//!
//! A deferred payment travels as base64-encoded JSON. Big-integer fields
//! (aggregates, nonces, timestamps) are decimal strings inside the JSON,
//! so the document survives environments without native 256-bit integers.
//! Decoding re-parses the full typed payload and rejects documents with
//! missing fields, extra fields, or shape mismatches.

use d402::encoding::Base64Bytes;

use super::types::PaymentPayload;

/// Errors from encoding or decoding an `X-PAYMENT` header.
#[derive(Debug, thiserror::Error)]
pub enum PaymentHeaderError {
    /// The header is not valid base64.
    #[error("Invalid base64 encoding: {0}")]
    Base64(#[from] base64::DecodeError),
    /// The decoded document does not match the deferred payload schema.
    #[error("Invalid payment payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encodes a deferred payment payload into an `X-PAYMENT` header value.
///
/// # Errors
///
/// Returns [`PaymentHeaderError::Json`] if serialization fails.
pub fn encode_payment_header(payload: &PaymentPayload) -> Result<String, PaymentHeaderError> {
    let json = serde_json::to_vec(payload)?;
    Ok(Base64Bytes::encode(&json).to_string())
}

/// Decodes an `X-PAYMENT` header value into a deferred payment payload.
///
/// The parse is strict: any missing or unknown field in the payload
/// position fails decoding.
///
/// # Errors
///
/// Returns [`PaymentHeaderError`] on malformed base64 or schema mismatch.
pub fn decode_payment_header(header: &str) -> Result<PaymentPayload, PaymentHeaderError> {
    let bytes = Base64Bytes::from(header).decode()?;
    let payload: PaymentPayload = serde_json::from_slice(&bytes)?;
    Ok(payload)
}
