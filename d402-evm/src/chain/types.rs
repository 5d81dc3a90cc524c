//! Wire format types for EVM chain interactions.
//!
//! This module provides types that handle serialization and deserialization
//! of EVM-specific values in the deferred x402 wire format.

use alloy_primitives::{Address, U256, hex};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// An Ethereum address that serializes with EIP-55 checksum encoding.
///
/// This wrapper ensures addresses are always serialized in checksummed
/// format (e.g., `0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045`). Parsing
/// accepts lower, upper, or checksummed hex, so equality between two
/// parsed addresses is checksum-normalized by construction.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ChecksummedAddress(pub Address);

impl FromStr for ChecksummedAddress {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let address = Address::from_str(s)?;
        Ok(Self(address))
    }
}

impl Display for ChecksummedAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_checksum(None))
    }
}

impl Serialize for ChecksummedAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_checksum(None))
    }
}

impl<'de> Deserialize<'de> for ChecksummedAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl From<ChecksummedAddress> for Address {
    fn from(value: ChecksummedAddress) -> Self {
        value.0
    }
}

impl From<Address> for ChecksummedAddress {
    fn from(address: Address) -> Self {
        Self(address)
    }
}

impl PartialEq<ChecksummedAddress> for Address {
    fn eq(&self, other: &ChecksummedAddress) -> bool {
        self.eq(&other.0)
    }
}

/// A token amount in the token's smallest unit.
///
/// Wraps a [`U256`] and serializes as a decimal string (e.g., `"1000000"`
/// for 1 USDC), surviving JSON paths that cannot represent 256-bit
/// integers. Deserialization rejects signs, empty strings, and any
/// non-digit characters.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TokenAmount(pub U256);

impl TokenAmount {
    /// The zero amount.
    pub const ZERO: Self = Self(U256::ZERO);

    /// Checked addition, `None` on overflow.
    #[must_use]
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }
}

/// Error returned when parsing an invalid token amount string.
#[derive(Debug, thiserror::Error)]
pub enum TokenAmountParseError {
    /// The string is empty.
    #[error("Token amount must not be empty")]
    Empty,
    /// The string is not a decimal integer within the 256-bit range.
    #[error("Invalid token amount: {0}")]
    Invalid(#[from] alloy_primitives::ruint::ParseError),
}

impl FromStr for TokenAmount {
    type Err = TokenAmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(TokenAmountParseError::Empty);
        }
        Ok(U256::from_str_radix(s, 10).map(Self)?)
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<U256> for TokenAmount {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        Self(U256::from(value))
    }
}

impl From<TokenAmount> for U256 {
    fn from(value: TokenAmount) -> Self {
        value.0
    }
}

impl Serialize for TokenAmount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A numeric chain ID for EVM-compatible networks.
///
/// This type wraps the numeric chain ID used by EVM networks (e.g., `8453`
/// for Base). Vouchers carry it as a plain JSON number.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Eip155ChainReference(u64);

impl Eip155ChainReference {
    /// Creates a new chain reference from a numeric chain ID.
    #[must_use]
    pub const fn new(chain_id: u64) -> Self {
        Self(chain_id)
    }

    /// Returns the numeric chain ID.
    #[must_use]
    pub const fn inner(&self) -> u64 {
        self.0
    }

    /// Returns the x402 v1 network name for this chain, if known.
    #[must_use]
    pub fn network_name(&self) -> Option<&'static str> {
        d402::networks::network_name_by_chain_id(self.0)
    }
}

impl From<u64> for Eip155ChainReference {
    fn from(chain_id: u64) -> Self {
        Self(chain_id)
    }
}

impl Display for Eip155ChainReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksummed_address_serializes_checksummed() {
        let addr: ChecksummedAddress = "0xd8da6bf26964af9d7eed9e03e53415d37aa96045"
            .parse()
            .unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045\"");
    }

    #[test]
    fn test_checksummed_address_equality_is_case_insensitive() {
        let lower: ChecksummedAddress = "0xd8da6bf26964af9d7eed9e03e53415d37aa96045"
            .parse()
            .unwrap();
        let checksummed: ChecksummedAddress = "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045"
            .parse()
            .unwrap();
        assert_eq!(lower, checksummed);
    }

    #[test]
    fn test_token_amount_roundtrip() {
        let amount: TokenAmount = "1000000".parse().unwrap();
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "\"1000000\"");
        let back: TokenAmount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, amount);
    }

    #[test]
    fn test_token_amount_zero() {
        let zero: TokenAmount = "0".parse().unwrap();
        assert_eq!(zero, TokenAmount::ZERO);
        assert_eq!(serde_json::to_string(&zero).unwrap(), "\"0\"");
    }

    #[test]
    fn test_token_amount_rejects_garbage() {
        assert!("".parse::<TokenAmount>().is_err());
        assert!("-1".parse::<TokenAmount>().is_err());
        assert!("+1".parse::<TokenAmount>().is_err());
        assert!("1.5".parse::<TokenAmount>().is_err());
        assert!("0x10".parse::<TokenAmount>().is_err());
        // One digit past the largest representable U256.
        let too_wide = "1".repeat(79);
        assert!(too_wide.parse::<TokenAmount>().is_err());
    }

    #[test]
    fn test_chain_reference_network_name() {
        assert_eq!(
            Eip155ChainReference::new(84532).network_name(),
            Some("base-sepolia")
        );
        assert_eq!(Eip155ChainReference::new(999_999).network_name(), None);
    }
}
