//! Payment scheme identifier for the deferred settlement flow.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Scheme marker for deferred payments.
///
/// This type serializes as the string `"deferred"` and rejects any other
/// value on deserialization, so payloads and requirements for other
/// schemes fail to parse instead of being silently accepted.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct DeferredScheme;

impl DeferredScheme {
    /// The wire representation of the scheme identifier.
    pub const NAME: &'static str = "deferred";
}

impl AsRef<str> for DeferredScheme {
    fn as_ref(&self) -> &str {
        Self::NAME
    }
}

impl Display for DeferredScheme {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Self::NAME)
    }
}

/// Error returned when parsing a scheme identifier other than `"deferred"`.
#[derive(Debug, thiserror::Error)]
#[error("Unknown payment scheme {0}, expected \"deferred\"")]
pub struct SchemeParseError(String);

impl FromStr for DeferredScheme {
    type Err = SchemeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == Self::NAME {
            Ok(Self)
        } else {
            Err(SchemeParseError(s.into()))
        }
    }
}

impl Serialize for DeferredScheme {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(Self::NAME)
    }
}

impl<'de> Deserialize<'de> for DeferredScheme {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
