//! Protocol types for x402 payment messages.
//!
//! This module defines the wire format types used between buyers, sellers,
//! and facilitators. The deferred scheme runs on protocol version 1, which
//! identifies chains by network names (e.g., `"base-sepolia"`).
//!
//! # Key Types
//!
//! - [`v1`] — version-1 payment payloads, requirements, and 402 bodies
//! - [`VerifyRequest`] / [`SettleRequest`] — raw JSON request wrappers with
//!   typed projection via [`TypedVerifyRequest::from_proto`]
//! - [`VerifyResponse`] — `{isValid, payer, invalidReason}` envelope
//! - [`SettleResponse`] — `{success, transaction, network, errorReason, payer}` envelope
//! - [`SupportedResponse`] — response from a facilitator's `/supported` endpoint
//!
//! # Wire Format
//!
//! All types serialize to JSON using camelCase field names. The protocol
//! version is indicated by the `x402Version` field.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

pub mod v1;

/// Protocol version marker that serializes as the integer `V`.
///
/// Deserialization rejects any other value, so a version-1 message type
/// cannot be constructed from a version-2 document.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Version<const V: u8>;

impl<const V: u8> Version<V> {
    /// The numeric protocol version.
    pub const VALUE: u8 = V;
}

impl<const V: u8> PartialEq<u8> for Version<V> {
    fn eq(&self, other: &u8) -> bool {
        *other == V
    }
}

impl<const V: u8> From<Version<V>> for u8 {
    fn from(_: Version<V>) -> Self {
        V
    }
}

impl<const V: u8> Serialize for Version<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(V)
    }
}

impl<'de, const V: u8> Deserialize<'de> for Version<V> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let num = u8::deserialize(deserializer)?;
        if num == V {
            Ok(Self)
        } else {
            Err(serde::de::Error::custom(format!(
                "expected version {V}, got {num}"
            )))
        }
    }
}

impl<const V: u8> Display for Version<V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{V}")
    }
}

/// A `u64` value that serializes as a string.
///
/// Some JSON parsers (particularly in `JavaScript`) cannot accurately
/// represent large integers. This type serializes `u64` values as strings
/// to preserve precision across all platforms. Voucher nonces use it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct U64String(u64);

impl U64String {
    /// Returns the inner `u64` value.
    #[must_use]
    pub const fn inner(&self) -> u64 {
        self.0
    }
}

impl FromStr for U64String {
    type Err = <u64 as FromStr>::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Self)
    }
}

impl From<u64> for U64String {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<U64String> for u64 {
    fn from(value: U64String) -> Self {
        value.0
    }
}

impl Display for U64String {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for U64String {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for U64String {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse::<u64>().map(Self).map_err(serde::de::Error::custom)
    }
}

/// Describes a payment method supported by a facilitator.
///
/// Returned in the [`SupportedResponse`] to indicate what payment schemes,
/// networks, and protocol versions a facilitator can handle.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedPaymentKind {
    /// The x402 protocol version.
    pub x402_version: u8,
    /// The payment scheme identifier (e.g., "deferred").
    pub scheme: String,
    /// The network name (e.g., "base-sepolia").
    pub network: String,
    /// Optional scheme-specific extra data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// Response from a facilitator's `/supported` endpoint.
#[derive(Clone, Default, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedResponse {
    /// List of supported payment kinds.
    pub kinds: Vec<SupportedPaymentKind>,
    /// Map of network names to signer addresses.
    #[serde(default)]
    pub signers: HashMap<String, Vec<String>>,
}

/// Request to verify a payment before settlement.
///
/// This wrapper contains the payment payload and requirements sent by a
/// seller to a facilitator for verification. The inner JSON structure
/// varies by scheme, so the wrapper stays untyped until a scheme handler
/// projects it with [`TypedVerifyRequest::from_proto`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest(serde_json::Value);

/// Request to settle a verified payment on-chain.
///
/// Structurally identical to [`VerifyRequest`] on the wire, but represented
/// as a distinct type so the compiler can prevent accidental misuse (e.g.,
/// passing a verify request where a settle request is expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettleRequest(serde_json::Value);

impl VerifyRequest {
    /// Consumes the request and returns the inner JSON value.
    #[must_use]
    pub fn into_json(self) -> serde_json::Value {
        self.0
    }

    /// Extracts the payment payload's network name, if present.
    ///
    /// Used by routing layers to pick the chain handler before the full
    /// typed parse happens.
    #[must_use]
    pub fn network_name(&self) -> Option<&str> {
        self.0.get("paymentPayload")?.get("network")?.as_str()
    }
}

impl SettleRequest {
    /// Consumes the request and returns the inner JSON value.
    #[must_use]
    pub fn into_json(self) -> serde_json::Value {
        self.0
    }

    /// Extracts the payment payload's network name, if present.
    #[must_use]
    pub fn network_name(&self) -> Option<&str> {
        self.0.get("paymentPayload")?.get("network")?.as_str()
    }
}

impl From<serde_json::Value> for VerifyRequest {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

impl From<serde_json::Value> for SettleRequest {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

impl From<VerifyRequest> for SettleRequest {
    fn from(request: VerifyRequest) -> Self {
        Self(request.into_json())
    }
}

/// A fully typed verify/settle request body.
///
/// # Type Parameters
///
/// - `V` - The protocol version
/// - `TPayload` - The payment payload type
/// - `TRequirements` - The payment requirements type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedVerifyRequest<const V: u8, TPayload, TRequirements> {
    /// Protocol version marker.
    pub x402_version: Version<V>,
    /// The signed payment authorization.
    pub payment_payload: TPayload,
    /// The payment requirements to verify against.
    pub payment_requirements: TRequirements,
}

impl<const V: u8, TPayload, TRequirements> TypedVerifyRequest<V, TPayload, TRequirements>
where
    Self: DeserializeOwned,
{
    /// Projects a raw [`VerifyRequest`] into this typed shape.
    ///
    /// # Errors
    ///
    /// Returns a JSON error if the request body does not match the typed
    /// structure.
    pub fn from_proto(request: VerifyRequest) -> Result<Self, serde_json::Error> {
        serde_json::from_value(request.into_json())
    }

    /// Projects a raw [`SettleRequest`] into this typed shape.
    ///
    /// # Errors
    ///
    /// Returns a JSON error if the request body does not match the typed
    /// structure.
    pub fn from_settle(request: SettleRequest) -> Result<Self, serde_json::Error> {
        serde_json::from_value(request.into_json())
    }
}

/// Result returned by a facilitator after verifying a payment payload
/// against the provided payment requirements.
///
/// Indicates whether the payment authorization is valid and identifies the
/// payer. If invalid, it includes a machine-readable reason code from the
/// deferred verification taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum VerifyResponse {
    /// The payload matches the requirements and passes all checks.
    Valid {
        /// The address of the payer.
        payer: String,
    },
    /// The payload was well-formed but failed verification.
    Invalid {
        /// Machine-readable reason verification failed.
        reason: String,
        /// The payer address, if identifiable.
        payer: Option<String>,
    },
}

impl VerifyResponse {
    /// Constructs a successful verification response with the given payer address.
    #[must_use]
    pub const fn valid(payer: String) -> Self {
        Self::Valid { payer }
    }

    /// Constructs a failed verification response.
    #[must_use]
    pub const fn invalid(payer: Option<String>, reason: String) -> Self {
        Self::Invalid { reason, payer }
    }

    /// Returns `true` if the verification succeeded.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponseWire {
    is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    payer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    invalid_reason: Option<String>,
}

impl Serialize for VerifyResponse {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let wire = match self {
            Self::Valid { payer } => VerifyResponseWire {
                is_valid: true,
                payer: Some(payer.clone()),
                invalid_reason: None,
            },
            Self::Invalid { reason, payer } => VerifyResponseWire {
                is_valid: false,
                payer: payer.clone(),
                invalid_reason: Some(reason.clone()),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for VerifyResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wire = VerifyResponseWire::deserialize(deserializer)?;
        if wire.is_valid {
            let payer = wire
                .payer
                .ok_or_else(|| serde::de::Error::missing_field("payer"))?;
            Ok(Self::Valid { payer })
        } else {
            let reason = wire
                .invalid_reason
                .ok_or_else(|| serde::de::Error::missing_field("invalidReason"))?;
            Ok(Self::Invalid {
                reason,
                payer: wire.payer,
            })
        }
    }
}

/// Response from a payment settlement request.
///
/// Indicates whether the payment was successfully settled on-chain. On
/// failure the `transaction` field serializes as an empty string and the
/// payer is carried when identifiable, for audit.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SettleResponse {
    /// Settlement succeeded.
    Success {
        /// The address that paid.
        payer: String,
        /// The on-chain transaction hash.
        transaction: String,
        /// The network where settlement occurred.
        network: String,
    },
    /// Settlement failed.
    Error {
        /// Machine-readable reason for failure.
        reason: String,
        /// The payer address, if identifiable.
        payer: Option<String>,
        /// The network where settlement was attempted.
        network: String,
    },
}

impl SettleResponse {
    /// Returns `true` if the settlement succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettleResponseWire {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payer: Option<String>,
    transaction: String,
    network: String,
}

impl Serialize for SettleResponse {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let wire = match self {
            Self::Success {
                payer,
                transaction,
                network,
            } => SettleResponseWire {
                success: true,
                error_reason: None,
                payer: Some(payer.clone()),
                transaction: transaction.clone(),
                network: network.clone(),
            },
            Self::Error {
                reason,
                payer,
                network,
            } => SettleResponseWire {
                success: false,
                error_reason: Some(reason.clone()),
                payer: payer.clone(),
                transaction: String::new(),
                network: network.clone(),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SettleResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wire = SettleResponseWire::deserialize(deserializer)?;
        if wire.success {
            let payer = wire
                .payer
                .ok_or_else(|| serde::de::Error::missing_field("payer"))?;
            Ok(Self::Success {
                payer,
                transaction: wire.transaction,
                network: wire.network,
            })
        } else {
            let reason = wire
                .error_reason
                .ok_or_else(|| serde::de::Error::missing_field("errorReason"))?;
            Ok(Self::Error {
                reason,
                payer: wire.payer,
                network: wire.network,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_marker_roundtrip() {
        let json = serde_json::to_string(&Version::<1>).unwrap();
        assert_eq!(json, "1");
        let parsed: Version<1> = serde_json::from_str("1").unwrap();
        assert_eq!(parsed, 1u8);
        let wrong: Result<Version<1>, _> = serde_json::from_str("2");
        assert!(wrong.is_err());
    }

    #[test]
    fn test_u64string_roundtrip() {
        let n = U64String::from(10u64);
        let json = serde_json::to_string(&n).unwrap();
        assert_eq!(json, "\"10\"");
        let parsed: U64String = serde_json::from_str("\"10\"").unwrap();
        assert_eq!(parsed.inner(), 10);
        let invalid: Result<U64String, _> = serde_json::from_str("\"-1\"");
        assert!(invalid.is_err());
    }

    #[test]
    fn test_verify_response_wire_shape() {
        let valid = VerifyResponse::valid("0xabc".into());
        let json = serde_json::to_value(&valid).unwrap();
        assert_eq!(json["isValid"], true);
        assert_eq!(json["payer"], "0xabc");

        let invalid =
            VerifyResponse::invalid(Some("0xabc".into()), "invalid_deferred_evm_payload_scheme".into());
        let json = serde_json::to_value(&invalid).unwrap();
        assert_eq!(json["isValid"], false);
        assert_eq!(json["invalidReason"], "invalid_deferred_evm_payload_scheme");

        let back: VerifyResponse = serde_json::from_value(json).unwrap();
        assert!(!back.is_valid());
    }

    #[test]
    fn test_settle_response_error_has_empty_transaction() {
        let error = SettleResponse::Error {
            reason: "insufficient_funds".into(),
            payer: Some("0xabc".into()),
            network: "base-sepolia".into(),
        };
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["transaction"], "");
        assert_eq!(json["errorReason"], "insufficient_funds");
        assert_eq!(json["payer"], "0xabc");

        let back: SettleResponse = serde_json::from_value(json).unwrap();
        assert!(!back.is_success());
    }

    #[test]
    fn test_settle_response_success_roundtrip() {
        let success = SettleResponse::Success {
            payer: "0xabc".into(),
            transaction: "0xdeadbeef".into(),
            network: "base".into(),
        };
        let json = serde_json::to_value(&success).unwrap();
        let back: SettleResponse = serde_json::from_value(json).unwrap();
        assert_eq!(back, success);
    }
}
