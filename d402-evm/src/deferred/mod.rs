//! The deferred payment scheme for EVM chains.
//!
//! The deferred scheme enables pay-per-request API access with a single
//! on-chain settlement. Each request, the buyer signs a voucher whose
//! `valueAggregate` is the *total cumulative* amount owed to the seller
//! across the lifetime of the voucher series. The seller stores the latest
//! voucher and redeems it against the `DeferredPaymentEscrow` contract
//! whenever it chooses; the escrow pays out the aggregate minus whatever
//! was already collected.
//!
//! # Roles
//!
//! - **Buyer** ([`client`]): mints a new voucher series or aggregates onto
//!   an existing one, signs it via EIP-712, and optionally attaches a
//!   deposit authorization to top up its escrow balance.
//! - **Seller** ([`server`]): tells the buyer whether to mint or aggregate
//!   by building the `extra` member of its payment requirements.
//! - **Facilitator** ([`facilitator`]): verifies payloads, stores vouchers
//!   ([`store`]), and performs on-chain settlement.

pub mod client;
pub mod codec;
pub mod error;
pub mod server;
pub mod store;
pub mod typed_data;
pub mod types;

#[cfg(feature = "facilitator")]
pub mod facilitator;

pub use d402::scheme::DeferredScheme;
pub use error::DeferredErrorReason;
pub use types::*;

/// Number of seconds a freshly built voucher remains redeemable.
pub const VOUCHER_VALIDITY_SECONDS: u64 = 30 * 24 * 60 * 60;

/// Upper bound on the number of outstanding vouchers consulted when
/// computing escrow account details for one (buyer, seller) pair.
pub const ACCOUNT_DETAILS_VOUCHER_LIMIT: usize = 1000;
