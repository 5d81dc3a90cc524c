//! Known EVM networks and the built-in USDC deposit defaults.
//!
//! The deposit-decision algorithm falls back to these configurations when
//! the caller supplies no matching deposit config for the payment asset.

use alloy_primitives::{Address, U256, address};

/// Base Mainnet chain ID.
pub const BASE_MAINNET: u64 = 8453;

/// Base Sepolia (testnet) chain ID.
pub const BASE_SEPOLIA: u64 = 84532;

/// USDC contract address on Base Mainnet.
pub const USDC_BASE: Address = address!("833589fCD6eDb6E08f4c7C32D4f71b54bdA02913");

/// USDC contract address on Base Sepolia.
pub const USDC_BASE_SEPOLIA: Address = address!("036CbD53842c5426634e7929541eC2318f3dCF7e");

/// Default EIP-712 domain name for USDC.
pub const DEFAULT_USDC_NAME: &str = "USD Coin";

/// Default EIP-712 domain version for USDC.
pub const DEFAULT_USDC_VERSION: &str = "2";

/// Default escrow balance threshold below which a deposit is attached,
/// in atomic units.
pub const DEFAULT_DEPOSIT_THRESHOLD: u64 = 10_000;

/// Default escrow top-up amount, in atomic units.
pub const DEFAULT_DEPOSIT_AMOUNT: u64 = 1_000_000;

/// EIP-712 domain parameters of an ERC-20 permit-capable token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEip712Domain {
    /// The token name as used in the EIP-712 domain.
    pub name: String,
    /// The token version as used in the EIP-712 domain.
    pub version: String,
}

/// Configuration for topping up a buyer's escrow balance in one asset.
#[derive(Debug, Clone)]
pub struct DepositConfig {
    /// The asset this config applies to.
    pub asset: Address,
    /// Top-up amount in atomic units.
    pub amount: U256,
    /// Balance threshold in atomic units below which a top-up is attached.
    pub threshold: U256,
    /// EIP-712 domain parameters for the asset's permit.
    pub domain: TokenEip712Domain,
}

/// Returns the built-in USDC deposit config for a chain, if the asset is
/// the well-known USDC deployment there.
#[must_use]
pub fn default_deposit_config(chain_id: u64, asset: Address) -> Option<DepositConfig> {
    let usdc = match chain_id {
        BASE_MAINNET => USDC_BASE,
        BASE_SEPOLIA => USDC_BASE_SEPOLIA,
        _ => return None,
    };
    if asset != usdc {
        return None;
    }
    Some(DepositConfig {
        asset: usdc,
        amount: U256::from(DEFAULT_DEPOSIT_AMOUNT),
        threshold: U256::from(DEFAULT_DEPOSIT_THRESHOLD),
        domain: TokenEip712Domain {
            name: DEFAULT_USDC_NAME.to_owned(),
            version: DEFAULT_USDC_VERSION.to_owned(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_usdc_only() {
        let config = default_deposit_config(BASE_SEPOLIA, USDC_BASE_SEPOLIA).unwrap();
        assert_eq!(config.amount, U256::from(1_000_000u64));
        assert_eq!(config.threshold, U256::from(10_000u64));
        assert_eq!(config.domain.name, "USD Coin");
        assert_eq!(config.domain.version, "2");

        assert!(default_deposit_config(BASE_SEPOLIA, USDC_BASE).is_none());
        assert!(default_deposit_config(1, USDC_BASE).is_none());
    }
}
