//! Wire format types for the deferred payment scheme.
//!
//! These types mirror the JSON exchanged in the `X-PAYMENT` header, the
//! seller's 402 requirements, and the facilitator REST API. Amounts and
//! nonces travel as decimal strings, timestamps as stringified seconds,
//! and addresses in EIP-55 checksum form. Payload-position structs reject
//! unknown fields so a decoded header is exactly what was encoded.

use alloy_primitives::{B256, Bytes, TxHash};
use d402::UnixTimestamp;
use d402::proto::{U64String, v1};
use serde::{Deserialize, Serialize};

use crate::chain::{ChecksummedAddress, TokenAmount};

/// A voucher: the buyer's signed promise to pay a seller a cumulative
/// amount under a specific escrow contract.
///
/// `value_aggregate` is the **total amount owed from this buyer to this
/// seller over the lifetime of this voucher series**, not the delta of the
/// latest request. Within a series (same `id`), `nonce` increases by one
/// per voucher and all identity fields stay constant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Voucher {
    /// 32-byte series identifier.
    pub id: B256,
    /// The paying party; must be the EIP-712 signer.
    pub buyer: ChecksummedAddress,
    /// The party being paid.
    pub seller: ChecksummedAddress,
    /// Total cumulative amount owed across the series, in atomic units.
    pub value_aggregate: TokenAmount,
    /// The ERC-20 being paid in.
    pub asset: ChecksummedAddress,
    /// Voucher creation time, seconds since epoch.
    pub timestamp: UnixTimestamp,
    /// Position within the series; `0` for a new voucher.
    pub nonce: U64String,
    /// The escrow contract that will honor this voucher.
    pub escrow: ChecksummedAddress,
    /// The chain the escrow contract lives on.
    pub chain_id: u64,
    /// Time after which the voucher is unredeemable, seconds since epoch.
    pub expiry: UnixTimestamp,
}

/// A voucher together with its EIP-712 signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SignedVoucher {
    /// EIP-712 signature over the voucher, produced by `voucher.buyer`.
    pub signature: Bytes,
    /// The voucher fields that were signed.
    pub voucher: Voucher,
}

/// The scheme-specific member of an `X-PAYMENT` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DeferredPayload {
    /// EIP-712 signature over `voucher`.
    pub signature: Bytes,
    /// The voucher being presented for this request.
    pub voucher: Voucher,
    /// Optional escrow top-up signed by the buyer, settled in the same
    /// transaction batch as the collect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deposit_authorization: Option<DepositAuthorizationPayload>,
}

/// Identifiers a buyer must mint a fresh voucher with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewVoucherParams {
    /// Series identifier chosen by the seller.
    pub id: B256,
    /// The escrow contract the voucher must name.
    pub escrow: ChecksummedAddress,
}

/// On-chain account snapshot a seller may attach to its requirements so
/// the buyer can decide whether to include a deposit authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowAccountSnapshot {
    /// The buyer's escrow balance for this (seller, asset), atomic units.
    pub balance: TokenAmount,
    /// The buyer's ERC-20 allowance granted to the escrow contract.
    pub asset_allowance: TokenAmount,
    /// The buyer's next EIP-2612 permit nonce on the asset contract.
    pub asset_permit_nonce: TokenAmount,
    /// URL of the facilitator that produced this snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facilitator_url: Option<String>,
}

/// The `extra` member of deferred payment requirements.
///
/// Tells the buyer whether to mint a new voucher series or aggregate onto
/// an existing one. Either variant may carry an [`EscrowAccountSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DeferredExtra {
    /// Mint nonce 0 with the given identifiers.
    #[serde(rename = "new")]
    New {
        /// Series id and escrow contract to mint with.
        voucher: NewVoucherParams,
        /// Optional escrow account snapshot.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        account: Option<EscrowAccountSnapshot>,
    },
    /// Build the next voucher in the series embedded here.
    #[serde(rename = "aggregation")]
    Aggregation {
        /// Signature of the prior voucher.
        signature: Bytes,
        /// The prior voucher to aggregate onto.
        voucher: Voucher,
        /// Optional escrow account snapshot.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        account: Option<EscrowAccountSnapshot>,
    },
}

impl DeferredExtra {
    /// Returns the account snapshot, if one is attached.
    #[must_use]
    pub const fn account(&self) -> Option<&EscrowAccountSnapshot> {
        match self {
            Self::New { account, .. } | Self::Aggregation { account, .. } => account.as_ref(),
        }
    }

    /// Returns the prior signed voucher for an aggregation offer.
    #[must_use]
    pub fn prior_voucher(&self) -> Option<SignedVoucher> {
        match self {
            Self::New { .. } => None,
            Self::Aggregation {
                signature, voucher, ..
            } => Some(SignedVoucher {
                signature: signature.clone(),
                voucher: voucher.clone(),
            }),
        }
    }
}

/// EIP-712 domain parameters of the asset contract a permit is signed
/// against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PermitDomain {
    /// Token name per the asset's EIP-712 domain.
    pub name: String,
    /// Token version per the asset's EIP-712 domain.
    pub version: String,
}

/// An EIP-2612 ERC-20 permit, signed against the asset contract's domain.
///
/// Lets the escrow contract pull `value` tokens from `owner` without a
/// separate approval transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Permit {
    /// The token owner (the buyer).
    pub owner: ChecksummedAddress,
    /// The spender being approved (the escrow contract).
    pub spender: ChecksummedAddress,
    /// Approved amount in atomic units.
    pub value: TokenAmount,
    /// The owner's sequential permit nonce on the asset contract.
    pub nonce: TokenAmount,
    /// Permit deadline, seconds since epoch.
    pub deadline: UnixTimestamp,
    /// The asset's EIP-712 domain name and version.
    pub domain: PermitDomain,
    /// EIP-712 signature over the permit.
    pub signature: Bytes,
}

/// An escrow deposit authorization, signed against the escrow's domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DepositAuthorization {
    /// The buyer whose escrow balance is topped up.
    pub buyer: ChecksummedAddress,
    /// The seller the deposited funds are reserved for.
    pub seller: ChecksummedAddress,
    /// The ERC-20 being deposited.
    pub asset: ChecksummedAddress,
    /// Deposit amount in atomic units.
    pub amount: TokenAmount,
    /// Unique 32-byte nonce (prevents replay).
    pub nonce: B256,
    /// Authorization expiry, seconds since epoch.
    pub expiry: UnixTimestamp,
    /// EIP-712 signature over the authorization.
    pub signature: Bytes,
}

/// The deposit side-channel of a deferred payload: an optional ERC-20
/// permit plus the escrow deposit authorization it funds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DepositAuthorizationPayload {
    /// Permit granting the escrow an allowance, when the current allowance
    /// does not cover the deposit amount.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permit: Option<Permit>,
    /// The escrow deposit authorization itself.
    pub deposit_authorization: DepositAuthorization,
}

/// An off-chain signed permission to withdraw the buyer's unencumbered
/// escrow balance back to the buyer's wallet.
///
/// Two shapes share this struct: a targeted flush carries `seller` and
/// `asset` together, a flush-all carries neither. The EIP-712 primary type
/// is selected from that presence at signing and verification time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FlushAuthorization {
    /// The buyer whose balance is flushed.
    pub buyer: ChecksummedAddress,
    /// Seller scope for a targeted flush.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller: Option<ChecksummedAddress>,
    /// Asset scope for a targeted flush.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<ChecksummedAddress>,
    /// Unique 32-byte nonce (prevents replay).
    pub nonce: B256,
    /// Authorization expiry, seconds since epoch.
    pub expiry: UnixTimestamp,
    /// EIP-712 signature over the authorization.
    pub signature: Bytes,
}

impl FlushAuthorization {
    /// Returns the (seller, asset) pair of a targeted flush, or `None`
    /// for a flush-all. Half-present pairs return `None` and fail
    /// signature verification downstream.
    #[must_use]
    pub fn target(&self) -> Option<(ChecksummedAddress, ChecksummedAddress)> {
        match (self.seller, self.asset) {
            (Some(seller), Some(asset)) => Some((seller, asset)),
            _ => None,
        }
    }

    /// `true` when seller and asset presence is consistent.
    #[must_use]
    pub const fn is_well_formed(&self) -> bool {
        self.seller.is_some() == self.asset.is_some()
    }
}

/// On-chain settlement record, created only after a successful collect
/// transaction receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoucherCollection {
    /// Series identifier of the collected voucher.
    pub voucher_id: B256,
    /// Nonce of the collected voucher.
    pub voucher_nonce: U64String,
    /// Hash of the collect transaction.
    pub transaction_hash: TxHash,
    /// Amount actually collected, which may be less than the voucher's
    /// aggregate if parts were collected before.
    pub collected_amount: TokenAmount,
    /// The ERC-20 collected.
    pub asset: ChecksummedAddress,
    /// The chain the collection happened on.
    pub chain_id: u64,
    /// When the collection was recorded, seconds since epoch.
    pub collected_at: UnixTimestamp,
}

/// A deferred `X-PAYMENT` payload.
///
/// The scheme field stays a plain string so the verifier can reject wrong
/// schemes with a reason code instead of a parse error.
pub type PaymentPayload = v1::PaymentPayload<String, DeferredPayload>;

/// Deferred payment requirements.
pub type PaymentRequirements =
    v1::PaymentRequirements<String, TokenAmount, ChecksummedAddress, DeferredExtra>;

/// A typed verify request for the deferred scheme.
pub type VerifyRequest = v1::VerifyRequest<PaymentPayload, PaymentRequirements>;

/// A typed settle request for the deferred scheme.
pub type SettleRequest = v1::SettleRequest<PaymentPayload, PaymentRequirements>;

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::b256;

    fn voucher_json() -> serde_json::Value {
        serde_json::json!({
            "id": "0x7a3e0000000000000000000000000000000000000000000000000000000004f1",
            "buyer": "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266",
            "seller": "0x1234567890123456789012345678901234567890",
            "valueAggregate": "1000000",
            "asset": "0x1111111111111111111111111111111111111111",
            "timestamp": "1716163200",
            "nonce": "0",
            "escrow": "0xFFfFfFffFFfffFFfFFfFFFFFffFFFffffFfFFFfF",
            "chainId": 84532,
            "expiry": "1718755200"
        })
    }

    #[test]
    fn test_voucher_roundtrip() {
        let voucher: Voucher = serde_json::from_value(voucher_json()).unwrap();
        assert_eq!(
            voucher.id,
            b256!("7a3e0000000000000000000000000000000000000000000000000000000004f1")
        );
        assert_eq!(voucher.nonce.inner(), 0);
        assert_eq!(voucher.chain_id, 84532);
        let json = serde_json::to_value(&voucher).unwrap();
        assert_eq!(json, voucher_json());
    }

    #[test]
    fn test_voucher_rejects_unknown_fields() {
        let mut json = voucher_json();
        json["value"] = serde_json::json!("5");
        let result: Result<Voucher, _> = serde_json::from_value(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_voucher_id_parses_case_insensitively() {
        let mut json = voucher_json();
        json["id"] =
            serde_json::json!("0x7A3E0000000000000000000000000000000000000000000000000000000004F1");
        let upper: Voucher = serde_json::from_value(json).unwrap();
        let lower: Voucher = serde_json::from_value(voucher_json()).unwrap();
        assert_eq!(upper.id, lower.id);
    }

    #[test]
    fn test_extra_tagged_union() {
        let new: DeferredExtra = serde_json::from_value(serde_json::json!({
            "type": "new",
            "voucher": {
                "id": "0x7a3e0000000000000000000000000000000000000000000000000000000004f1",
                "escrow": "0xFFfFfFffFFfffFFfFFfFFFFFffFFFffffFfFFFfF"
            }
        }))
        .unwrap();
        assert!(matches!(new, DeferredExtra::New { .. }));
        assert!(new.prior_voucher().is_none());

        let aggregation: DeferredExtra = serde_json::from_value(serde_json::json!({
            "type": "aggregation",
            "signature": "0xabcd",
            "voucher": voucher_json()
        }))
        .unwrap();
        let prior = aggregation.prior_voucher().unwrap();
        assert_eq!(prior.voucher.nonce.inner(), 0);
    }

    #[test]
    fn test_flush_authorization_shapes() {
        let targeted: FlushAuthorization = serde_json::from_value(serde_json::json!({
            "buyer": "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266",
            "seller": "0x1234567890123456789012345678901234567890",
            "asset": "0x1111111111111111111111111111111111111111",
            "nonce": "0x0000000000000000000000000000000000000000000000000000000000000001",
            "expiry": "1718755200",
            "signature": "0xabcd"
        }))
        .unwrap();
        assert!(targeted.is_well_formed());
        assert!(targeted.target().is_some());

        let flush_all: FlushAuthorization = serde_json::from_value(serde_json::json!({
            "buyer": "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266",
            "nonce": "0x0000000000000000000000000000000000000000000000000000000000000001",
            "expiry": "1718755200",
            "signature": "0xabcd"
        }))
        .unwrap();
        assert!(flush_all.is_well_formed());
        assert!(flush_all.target().is_none());
    }

    #[test]
    fn test_payment_payload_wire_shape() {
        let payload: PaymentPayload = serde_json::from_value(serde_json::json!({
            "x402Version": 1,
            "scheme": "deferred",
            "network": "base-sepolia",
            "payload": {
                "signature": "0xabcd",
                "voucher": voucher_json()
            }
        }))
        .unwrap();
        assert_eq!(payload.scheme, "deferred");
        assert!(payload.payload.deposit_authorization.is_none());
    }
}
