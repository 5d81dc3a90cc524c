//! Registry of well-known x402 v1 network names.
//!
//! The v1 protocol identifies chains by human-readable network names
//! (e.g., `"base-sepolia"`). Vouchers, on the other hand, carry the
//! numeric EVM chain id they are bound to. This module maps between the
//! two.

/// A well-known network name paired with its numeric EVM chain id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownNetwork {
    /// The x402 v1 network name (e.g., `"base-sepolia"`).
    pub name: &'static str,
    /// The numeric EVM chain id (e.g., `84532`).
    pub chain_id: u64,
}

/// All network names this crate recognizes.
pub const KNOWN_NETWORKS: &[KnownNetwork] = &[
    KnownNetwork {
        name: "base",
        chain_id: 8453,
    },
    KnownNetwork {
        name: "base-sepolia",
        chain_id: 84532,
    },
    KnownNetwork {
        name: "polygon",
        chain_id: 137,
    },
    KnownNetwork {
        name: "polygon-amoy",
        chain_id: 80002,
    },
    KnownNetwork {
        name: "avalanche",
        chain_id: 43114,
    },
    KnownNetwork {
        name: "avalanche-fuji",
        chain_id: 43113,
    },
    KnownNetwork {
        name: "celo",
        chain_id: 42220,
    },
    KnownNetwork {
        name: "celo-sepolia",
        chain_id: 11_142_220,
    },
];

/// Resolves a network name to its numeric EVM chain id.
#[must_use]
pub fn chain_id_by_network_name(name: &str) -> Option<u64> {
    KNOWN_NETWORKS
        .iter()
        .find(|n| n.name == name)
        .map(|n| n.chain_id)
}

/// Resolves a numeric EVM chain id back to its network name.
///
/// This is the reverse of [`chain_id_by_network_name`].
#[must_use]
pub fn network_name_by_chain_id(chain_id: u64) -> Option<&'static str> {
    KNOWN_NETWORKS
        .iter()
        .find(|n| n.chain_id == chain_id)
        .map(|n| n.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_id_by_network_name() {
        assert_eq!(chain_id_by_network_name("base"), Some(8453));
        assert_eq!(chain_id_by_network_name("base-sepolia"), Some(84532));
        assert_eq!(chain_id_by_network_name("polygon"), Some(137));
        assert_eq!(chain_id_by_network_name("unknown"), None);
    }

    #[test]
    fn test_network_name_by_chain_id() {
        assert_eq!(network_name_by_chain_id(8453), Some("base"));
        assert_eq!(network_name_by_chain_id(84532), Some("base-sepolia"));
        assert_eq!(network_name_by_chain_id(999_999), None);
    }

    #[test]
    fn test_registry_has_no_duplicates() {
        for (i, a) in KNOWN_NETWORKS.iter().enumerate() {
            for b in &KNOWN_NETWORKS[i + 1..] {
                assert_ne!(a.name, b.name);
                assert_ne!(a.chain_id, b.chain_id);
            }
        }
    }
}
