//! Facilitator server configuration.
//!
//! Loads configuration from a TOML file with support for environment
//! variable expansion in string values. Variables use `$VAR` or `${VAR}`
//! syntax.
//!
//! # Example Configuration
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 4022
//! receipt_timeout_secs = 300
//!
//! [chains."base-sepolia"]
//! rpc_url = "https://sepolia.base.org"
//! signer_private_key = "$SIGNER_KEY_BASE_SEPOLIA"
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` — Path to configuration file (default: `config.toml`)
//! - `HOST` — Override server bind address
//! - `PORT` — Override server port
//! - Chain-specific signer keys referenced by `$VAR` in the config file

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Top-level facilitator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacilitatorConfig {
    /// Server bind address (default: `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Server port (default: `4022`).
    #[serde(default = "default_port")]
    pub port: u16,

    /// How long to wait for settlement transaction receipts, in seconds
    /// (default: 300, matching the default `maxTimeoutSeconds`).
    #[serde(default = "default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,

    /// Chain configurations keyed by x402 network name.
    #[serde(default)]
    pub chains: HashMap<String, ChainConfig>,
}

/// Per-chain configuration for an EVM network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// HTTP RPC endpoint URL.
    pub rpc_url: String,

    /// Private key for the facilitator signer (hex, with or without `0x`
    /// prefix). Supports `$VAR` / `${VAR}` for environment variable
    /// expansion.
    pub signer_private_key: String,

    /// Whether the chain supports EIP-1559 gas pricing (default: true).
    #[serde(default = "default_eip1559")]
    pub eip1559: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0))
}

fn default_port() -> u16 {
    4022
}

fn default_receipt_timeout_secs() -> u64 {
    300
}

fn default_eip1559() -> bool {
    true
}

impl FacilitatorConfig {
    /// Loads configuration from the path given by the `CONFIG` environment
    /// variable, falling back to `config.toml` in the current directory.
    ///
    /// After loading, all string values with `$VAR` / `${VAR}` references
    /// are expanded from the process environment. `HOST` and `PORT` env
    /// vars override the file values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = std::env::var("CONFIG").unwrap_or_else(|_| "config.toml".to_owned());
        Self::load_from(&path)
    }

    /// Loads configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = if Path::new(path).exists() {
            std::fs::read_to_string(path)?
        } else {
            // No config file: empty TOML, rely on defaults.
            String::new()
        };

        let expanded = expand_env_vars(&content);
        let mut config: Self = toml::from_str(&expanded)?;

        if let Ok(host) = std::env::var("HOST") {
            if let Ok(addr) = host.parse() {
                config.host = addr;
            }
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(p) = port.parse() {
                config.port = p;
            }
        }

        Ok(config)
    }
}

/// Expands `$VAR` and `${VAR}` patterns in a string from environment
/// variables. Unresolved variables are left as-is.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' {
            let braced = chars.peek() == Some(&'{');
            if braced {
                chars.next();
            }

            let mut var_name = String::new();
            while let Some(&c) = chars.peek() {
                if braced {
                    if c == '}' {
                        chars.next();
                        break;
                    }
                } else if !c.is_ascii_alphanumeric() && c != '_' {
                    break;
                }
                var_name.push(c);
                chars.next();
            }

            if var_name.is_empty() {
                result.push('$');
                if braced {
                    result.push('{');
                }
            } else if let Ok(val) = std::env::var(&var_name) {
                result.push_str(&val);
            } else {
                result.push('$');
                if braced {
                    result.push('{');
                }
                result.push_str(&var_name);
                if braced {
                    result.push('}');
                }
            }
        } else {
            result.push(ch);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: FacilitatorConfig = toml::from_str("").unwrap();
        assert_eq!(config.port, 4022);
        assert_eq!(config.receipt_timeout_secs, 300);
        assert!(config.chains.is_empty());
    }

    #[test]
    fn test_chain_table_parses() {
        let config: FacilitatorConfig = toml::from_str(
            r#"
            port = 9000

            [chains."base-sepolia"]
            rpc_url = "https://sepolia.base.org"
            signer_private_key = "0xabc"
            eip1559 = false
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 9000);
        let chain = &config.chains["base-sepolia"];
        assert_eq!(chain.rpc_url, "https://sepolia.base.org");
        assert!(!chain.eip1559);
    }

    #[test]
    fn test_expand_env_vars() {
        // Safety: test-only mutation of this process's environment.
        unsafe { std::env::set_var("D402_TEST_KEY", "0xsecret") };
        assert_eq!(expand_env_vars("key = \"$D402_TEST_KEY\""), "key = \"0xsecret\"");
        assert_eq!(
            expand_env_vars("key = \"${D402_TEST_KEY}\""),
            "key = \"0xsecret\""
        );
        assert_eq!(
            expand_env_vars("key = \"$D402_TEST_MISSING\""),
            "key = \"$D402_TEST_MISSING\""
        );
    }
}
