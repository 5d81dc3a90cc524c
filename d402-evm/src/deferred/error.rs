//! The closed set of machine-readable failure reasons for deferred
//! payment verification and settlement.
//!
//! Reason codes travel inside `{isValid: false, invalidReason}` and
//! `{success: false, errorReason}` envelopes. Producers return the first
//! failure; upstream layers bubble codes without rewriting them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::{Display, Formatter};

/// Machine-readable reason codes for deferred payment failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum DeferredErrorReason {
    /// The payload's scheme field is not "deferred".
    InvalidDeferredEvmPayloadScheme,
    /// The requirements' scheme field is not "deferred".
    InvalidDeferredEvmRequirementsScheme,
    /// Payload and requirements name different networks.
    InvalidDeferredEvmPayloadNetworkMismatch,
    /// The voucher's chain id does not match the network's chain id.
    InvalidDeferredEvmPayloadChainId,
    /// The named network is not a known network.
    InvalidNetworkUnsupported,
    /// The on-chain client serves a different chain than the voucher names.
    InvalidClientNetwork,
    /// The voucher's aggregate does not cover the required amount.
    InvalidDeferredEvmPayloadVoucherValue,
    /// The voucher's seller does not match the requirements' `payTo`.
    InvalidDeferredEvmPayloadRecipientMismatch,
    /// The voucher's asset does not match the requirements' asset.
    InvalidDeferredEvmPayloadAssetMismatch,
    /// The voucher expired.
    InvalidDeferredEvmPayloadVoucherExpired,
    /// The voucher's timestamp is in the future.
    InvalidDeferredEvmPayloadTimestampTooEarly,
    /// A new voucher carried a non-zero nonce.
    InvalidDeferredEvmPayloadVoucherNonZeroNonce,
    /// A new voucher carried a zero aggregate.
    InvalidDeferredEvmPayloadVoucherZeroValueAggregate,
    /// The voucher's series id differs from the offered one.
    InvalidDeferredEvmPayloadVoucherIdMismatch,
    /// Successive vouchers name different buyers.
    InvalidDeferredEvmPayloadVoucherBuyerMismatch,
    /// Successive vouchers name different sellers.
    InvalidDeferredEvmPayloadVoucherSellerMismatch,
    /// Successive vouchers name different assets.
    InvalidDeferredEvmPayloadVoucherAssetMismatch,
    /// Successive vouchers name different escrow contracts.
    InvalidDeferredEvmPayloadVoucherEscrowMismatch,
    /// Successive vouchers name different chains.
    InvalidDeferredEvmPayloadVoucherChainIdMismatch,
    /// The voucher's nonce is not the successor of the prior nonce.
    InvalidDeferredEvmPayloadVoucherNonceMismatch,
    /// The voucher's aggregate decreased within the series.
    InvalidDeferredEvmPayloadVoucherValueAggregateDecreasing,
    /// The voucher's timestamp decreased within the series.
    InvalidDeferredEvmPayloadVoucherTimestampDecreasing,
    /// The voucher's expiry decreased within the series.
    InvalidDeferredEvmPayloadVoucherExpiryDecreasing,
    /// The voucher signature does not recover to the buyer.
    InvalidDeferredEvmPayloadSignature,
    /// The permit signature does not recover to the buyer.
    InvalidDeferredEvmPayloadPermitSignature,
    /// The permit deadline passed.
    InvalidDeferredEvmPayloadPermitExpired,
    /// The deposit authorization signature does not recover to the buyer.
    InvalidDeferredEvmPayloadDepositAuthorizationSignature,
    /// The deposit authorization expired.
    InvalidDeferredEvmPayloadDepositAuthorizationExpired,
    /// The deposit authorization nonce was already used on-chain.
    InvalidDeferredEvmPayloadDepositNonceUsed,
    /// The flush authorization signature does not recover to the signer.
    InvalidDeferredEvmPayloadFlushAuthorizationSignature,
    /// The flush authorization expired.
    InvalidDeferredEvmPayloadFlushAuthorizationExpired,
    /// No voucher is stored under the claimed (id, nonce).
    InvalidDeferredEvmPayloadVoucherNotFound,
    /// A voucher is stored under the claimed (id, nonce) but its fields
    /// differ from the claimed voucher.
    InvalidDeferredEvmPayloadVoucherFoundNotDuplicate,
    /// Two vouchers expected to be identical differ.
    InvalidDeferredEvmPayloadVoucherNotDuplicate,
    /// The store rejected the settlement record.
    InvalidDeferredEvmPayloadVoucherCouldNotSettleStore,
    /// The store failed while recording the settlement.
    InvalidDeferredEvmPayloadVoucherErrorSettlingStore,
    /// The buyer's escrow balance does not cover the outstanding amount.
    InsufficientFunds,
    /// A balance check could not be completed on-chain.
    InsufficientFundsContractCallFailed,
    /// An on-chain write reverted or could not be submitted.
    InvalidTransactionReverted,
    /// An on-chain write was mined without success status, or its receipt
    /// never arrived.
    InvalidTransactionState,
    /// `getOutstandingAndCollectableAmount` failed.
    InvalidDeferredEvmContractCallFailedOutstandingAmount,
    /// `getAccount` failed.
    InvalidDeferredEvmContractCallFailedAccount,
    /// `getAccountDetails` failed.
    InvalidDeferredEvmContractCallFailedAccountDetails,
}

impl DeferredErrorReason {
    /// Returns the wire representation of this reason code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidDeferredEvmPayloadScheme => "invalid_deferred_evm_payload_scheme",
            Self::InvalidDeferredEvmRequirementsScheme => {
                "invalid_deferred_evm_requirements_scheme"
            }
            Self::InvalidDeferredEvmPayloadNetworkMismatch => {
                "invalid_deferred_evm_payload_network_mismatch"
            }
            Self::InvalidDeferredEvmPayloadChainId => "invalid_deferred_evm_payload_chain_id",
            Self::InvalidNetworkUnsupported => "invalid_network_unsupported",
            Self::InvalidClientNetwork => "invalid_client_network",
            Self::InvalidDeferredEvmPayloadVoucherValue => {
                "invalid_deferred_evm_payload_voucher_value"
            }
            Self::InvalidDeferredEvmPayloadRecipientMismatch => {
                "invalid_deferred_evm_payload_recipient_mismatch"
            }
            Self::InvalidDeferredEvmPayloadAssetMismatch => {
                "invalid_deferred_evm_payload_asset_mismatch"
            }
            Self::InvalidDeferredEvmPayloadVoucherExpired => {
                "invalid_deferred_evm_payload_voucher_expired"
            }
            Self::InvalidDeferredEvmPayloadTimestampTooEarly => {
                "invalid_deferred_evm_payload_timestamp_too_early"
            }
            Self::InvalidDeferredEvmPayloadVoucherNonZeroNonce => {
                "invalid_deferred_evm_payload_voucher_non_zero_nonce"
            }
            Self::InvalidDeferredEvmPayloadVoucherZeroValueAggregate => {
                "invalid_deferred_evm_payload_voucher_zero_value_aggregate"
            }
            Self::InvalidDeferredEvmPayloadVoucherIdMismatch => {
                "invalid_deferred_evm_payload_voucher_id_mismatch"
            }
            Self::InvalidDeferredEvmPayloadVoucherBuyerMismatch => {
                "invalid_deferred_evm_payload_voucher_buyer_mismatch"
            }
            Self::InvalidDeferredEvmPayloadVoucherSellerMismatch => {
                "invalid_deferred_evm_payload_voucher_seller_mismatch"
            }
            Self::InvalidDeferredEvmPayloadVoucherAssetMismatch => {
                "invalid_deferred_evm_payload_voucher_asset_mismatch"
            }
            Self::InvalidDeferredEvmPayloadVoucherEscrowMismatch => {
                "invalid_deferred_evm_payload_voucher_escrow_mismatch"
            }
            Self::InvalidDeferredEvmPayloadVoucherChainIdMismatch => {
                "invalid_deferred_evm_payload_voucher_chain_id_mismatch"
            }
            Self::InvalidDeferredEvmPayloadVoucherNonceMismatch => {
                "invalid_deferred_evm_payload_voucher_nonce_mismatch"
            }
            Self::InvalidDeferredEvmPayloadVoucherValueAggregateDecreasing => {
                "invalid_deferred_evm_payload_voucher_value_aggregate_decreasing"
            }
            Self::InvalidDeferredEvmPayloadVoucherTimestampDecreasing => {
                "invalid_deferred_evm_payload_voucher_timestamp_decreasing"
            }
            Self::InvalidDeferredEvmPayloadVoucherExpiryDecreasing => {
                "invalid_deferred_evm_payload_voucher_expiry_decreasing"
            }
            Self::InvalidDeferredEvmPayloadSignature => "invalid_deferred_evm_payload_signature",
            Self::InvalidDeferredEvmPayloadPermitSignature => {
                "invalid_deferred_evm_payload_permit_signature"
            }
            Self::InvalidDeferredEvmPayloadPermitExpired => {
                "invalid_deferred_evm_payload_permit_expired"
            }
            Self::InvalidDeferredEvmPayloadDepositAuthorizationSignature => {
                "invalid_deferred_evm_payload_deposit_authorization_signature"
            }
            Self::InvalidDeferredEvmPayloadDepositAuthorizationExpired => {
                "invalid_deferred_evm_payload_deposit_authorization_expired"
            }
            Self::InvalidDeferredEvmPayloadDepositNonceUsed => {
                "invalid_deferred_evm_payload_deposit_nonce_used"
            }
            Self::InvalidDeferredEvmPayloadFlushAuthorizationSignature => {
                "invalid_deferred_evm_payload_flush_authorization_signature"
            }
            Self::InvalidDeferredEvmPayloadFlushAuthorizationExpired => {
                "invalid_deferred_evm_payload_flush_authorization_expired"
            }
            Self::InvalidDeferredEvmPayloadVoucherNotFound => {
                "invalid_deferred_evm_payload_voucher_not_found"
            }
            Self::InvalidDeferredEvmPayloadVoucherFoundNotDuplicate => {
                "invalid_deferred_evm_payload_voucher_found_not_duplicate"
            }
            Self::InvalidDeferredEvmPayloadVoucherNotDuplicate => {
                "invalid_deferred_evm_payload_voucher_not_duplicate"
            }
            Self::InvalidDeferredEvmPayloadVoucherCouldNotSettleStore => {
                "invalid_deferred_evm_payload_voucher_could_not_settle_store"
            }
            Self::InvalidDeferredEvmPayloadVoucherErrorSettlingStore => {
                "invalid_deferred_evm_payload_voucher_error_settling_store"
            }
            Self::InsufficientFunds => "insufficient_funds",
            Self::InsufficientFundsContractCallFailed => "insufficient_funds_contract_call_failed",
            Self::InvalidTransactionReverted => "invalid_transaction_reverted",
            Self::InvalidTransactionState => "invalid_transaction_state",
            Self::InvalidDeferredEvmContractCallFailedOutstandingAmount => {
                "invalid_deferred_evm_contract_call_failed_outstanding_amount"
            }
            Self::InvalidDeferredEvmContractCallFailedAccount => {
                "invalid_deferred_evm_contract_call_failed_account"
            }
            Self::InvalidDeferredEvmContractCallFailedAccountDetails => {
                "invalid_deferred_evm_contract_call_failed_account_details"
            }
        }
    }
}

impl Display for DeferredErrorReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
