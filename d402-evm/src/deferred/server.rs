//! Seller-side payment requirements negotiation.
//!
//! Before answering 402, a seller decides whether the buyer should mint a
//! new voucher series or aggregate onto an existing one. The decision
//! pulls the buyer's identity from the request headers, the available
//! voucher from a store (local or via the facilitator), and an on-chain
//! account snapshot from the facilitator.
//!
//! Failures here never surface to the buyer: every fallible step falls
//! back to offering a fresh voucher series.

use alloy_primitives::{Address, B256};
use d402::facilitator::BoxFuture;
use rand::RngExt;
use rand::rng;

use super::codec::decode_payment_header;
use super::store::VoucherStore;
use super::types::{DeferredExtra, EscrowAccountSnapshot, NewVoucherParams, SignedVoucher};

/// Errors from talking to a deferred facilitator service.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorApiError {
    /// The facilitator could not be reached.
    #[error("Facilitator request failed: {0}")]
    Transport(String),
    /// The facilitator answered with an unexpected status.
    #[error("Facilitator returned status {0}")]
    Status(u16),
    /// The facilitator's response did not parse.
    #[error("Facilitator response invalid: {0}")]
    Decode(String),
}

/// The slice of the facilitator REST API the negotiation and the deposit
/// decision consume: buyer account snapshots and available vouchers.
pub trait DeferredFacilitatorApi: Send + Sync {
    /// Fetches the buyer's escrow account snapshot for one
    /// (seller, asset, escrow, chain) scope.
    fn buyer_account(
        &self,
        buyer: Address,
        seller: Address,
        asset: Address,
        escrow: Address,
        chain_id: u64,
    ) -> BoxFuture<'_, Result<EscrowAccountSnapshot, FacilitatorApiError>>;

    /// Fetches the voucher available for aggregation between a buyer and
    /// a seller, if any.
    fn available_voucher(
        &self,
        buyer: Address,
        seller: Address,
    ) -> BoxFuture<'_, Result<Option<SignedVoucher>, FacilitatorApiError>>;
}

/// Generates a fresh 32-byte voucher series identifier from a
/// cryptographically secure RNG.
#[must_use]
pub fn generate_voucher_id() -> B256 {
    let bytes: [u8; 32] = rng().random();
    B256::from(bytes)
}

/// The seller-side scope a payment negotiation runs in.
#[derive(Debug, Clone, Copy)]
pub struct SellerContext {
    /// The seller's receiving address.
    pub seller: Address,
    /// The escrow contract vouchers must name.
    pub escrow: Address,
    /// The asset payments are made in.
    pub asset: Address,
    /// The chain the escrow lives on.
    pub chain_id: u64,
}

/// Builds the `extra` member of deferred payment requirements.
///
/// - With no identifying header, the buyer is offered a fresh series.
/// - An `X-PAYMENT` header identifies the buyer through its voucher and
///   takes precedence over `X-BUYER`; a header that fails to decode
///   falls back silently to a fresh series.
/// - When a local store is given it is the authority on the previous
///   voucher; otherwise the facilitator is consulted. A failing lookup
///   counts as "no previous voucher".
/// - The facilitator account snapshot is attached when reachable, so the
///   buyer can make its deposit decision.
pub async fn get_payment_requirements_extra(
    x_payment_header: Option<&str>,
    x_buyer_header: Option<&str>,
    ctx: &SellerContext,
    facilitator: &dyn DeferredFacilitatorApi,
    local_store: Option<&dyn VoucherStore>,
) -> DeferredExtra {
    let fresh = |account: Option<EscrowAccountSnapshot>| DeferredExtra::New {
        voucher: NewVoucherParams {
            id: generate_voucher_id(),
            escrow: ctx.escrow.into(),
        },
        account,
    };

    let buyer = match (x_payment_header, x_buyer_header) {
        (None, None) => return fresh(None),
        (Some(header), _) => match decode_payment_header(header) {
            Ok(payload) => payload.payload.voucher.buyer.into(),
            Err(_) => return fresh(None),
        },
        (None, Some(header)) => match header.parse::<Address>() {
            Ok(address) => address,
            Err(_) => return fresh(None),
        },
    };

    let account = facilitator
        .buyer_account(buyer, ctx.seller, ctx.asset, ctx.escrow, ctx.chain_id)
        .await
        .ok();

    let previous = match local_store {
        Some(store) => store
            .get_available_voucher(buyer, ctx.seller)
            .await
            .unwrap_or(None),
        None => facilitator
            .available_voucher(buyer, ctx.seller)
            .await
            .unwrap_or(None),
    };

    match previous {
        Some(prior) => DeferredExtra::Aggregation {
            signature: prior.signature,
            voucher: prior.voucher,
            account,
        },
        None => fresh(account),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::TokenAmount;
    use crate::deferred::codec::encode_payment_header;
    use crate::deferred::store::MemoryVoucherStore;
    use crate::deferred::types::{DeferredPayload, PaymentPayload, Voucher};
    use alloy_primitives::{Bytes, address};
    use d402::UnixTimestamp;
    use d402::proto::v1;
    use std::collections::HashSet;

    const BUYER: Address = address!("f39fd6e51aad88f6f4ce6ab8827279cfffb92266");
    const OTHER_BUYER: Address = address!("00000000000000000000000000000000000000aa");

    fn ctx() -> SellerContext {
        SellerContext {
            seller: address!("1234567890123456789012345678901234567890"),
            escrow: address!("ffffffffffffffffffffffffffffffffffffffff"),
            asset: address!("1111111111111111111111111111111111111111"),
            chain_id: 84532,
        }
    }

    fn voucher_for(buyer: Address, nonce: u64) -> SignedVoucher {
        SignedVoucher {
            signature: Bytes::from(vec![0x11; 65]),
            voucher: Voucher {
                id: generate_voucher_id(),
                buyer: buyer.into(),
                seller: ctx().seller.into(),
                value_aggregate: TokenAmount::from(1_000_000u64),
                asset: ctx().asset.into(),
                timestamp: UnixTimestamp::from_secs(1_716_163_200),
                nonce: nonce.into(),
                escrow: ctx().escrow.into(),
                chain_id: 84532,
                expiry: UnixTimestamp::from_secs(1_718_755_200),
            },
        }
    }

    struct StubFacilitator {
        account: Option<EscrowAccountSnapshot>,
        voucher: Option<SignedVoucher>,
    }

    impl DeferredFacilitatorApi for StubFacilitator {
        fn buyer_account(
            &self,
            _buyer: Address,
            _seller: Address,
            _asset: Address,
            _escrow: Address,
            _chain_id: u64,
        ) -> BoxFuture<'_, Result<EscrowAccountSnapshot, FacilitatorApiError>> {
            Box::pin(async move {
                self.account
                    .clone()
                    .ok_or_else(|| FacilitatorApiError::Transport("unreachable".into()))
            })
        }

        fn available_voucher(
            &self,
            _buyer: Address,
            _seller: Address,
        ) -> BoxFuture<'_, Result<Option<SignedVoucher>, FacilitatorApiError>> {
            Box::pin(async move { Ok(self.voucher.clone()) })
        }
    }

    fn reachable_facilitator(voucher: Option<SignedVoucher>) -> StubFacilitator {
        StubFacilitator {
            account: Some(EscrowAccountSnapshot {
                balance: TokenAmount::from(1_000_000u64),
                asset_allowance: TokenAmount::ZERO,
                asset_permit_nonce: TokenAmount::ZERO,
                facilitator_url: None,
            }),
            voucher,
        }
    }

    fn payment_header_for(buyer: Address) -> String {
        let prior = voucher_for(buyer, 3);
        let payload = PaymentPayload {
            x402_version: v1::V1,
            scheme: "deferred".to_owned(),
            network: "base-sepolia".to_owned(),
            payload: DeferredPayload {
                signature: prior.signature,
                voucher: prior.voucher,
                deposit_authorization: None,
            },
        };
        encode_payment_header(&payload).unwrap()
    }

    #[tokio::test]
    async fn test_no_headers_offers_new_series() {
        let facilitator = reachable_facilitator(None);
        let extra =
            get_payment_requirements_extra(None, None, &ctx(), &facilitator, None).await;
        let DeferredExtra::New { account, .. } = extra else {
            panic!("expected a new-voucher offer");
        };
        // Without a buyer there is no account to snapshot.
        assert!(account.is_none());
    }

    #[tokio::test]
    async fn test_buyer_header_without_prior_offers_new_with_account() {
        let facilitator = reachable_facilitator(None);
        let buyer = BUYER.to_string();
        let extra =
            get_payment_requirements_extra(None, Some(&buyer), &ctx(), &facilitator, None).await;
        let DeferredExtra::New { account, .. } = extra else {
            panic!("expected a new-voucher offer");
        };
        assert!(account.is_some());
    }

    #[tokio::test]
    async fn test_buyer_header_with_prior_offers_aggregation() {
        let prior = voucher_for(BUYER, 4);
        let facilitator = reachable_facilitator(Some(prior.clone()));
        let buyer = BUYER.to_string();
        let extra =
            get_payment_requirements_extra(None, Some(&buyer), &ctx(), &facilitator, None).await;
        let DeferredExtra::Aggregation { voucher, account, .. } = extra else {
            panic!("expected an aggregation offer");
        };
        assert_eq!(voucher, prior.voucher);
        assert!(account.is_some());
    }

    #[tokio::test]
    async fn test_payment_header_beats_buyer_header() {
        let store = MemoryVoucherStore::new();
        let prior = voucher_for(BUYER, 0);
        store.store_voucher(prior.clone()).await.unwrap();
        let facilitator = reachable_facilitator(None);

        let header = payment_header_for(BUYER);
        let other = OTHER_BUYER.to_string();
        let extra = get_payment_requirements_extra(
            Some(&header),
            Some(&other),
            &ctx(),
            &facilitator,
            Some(&store),
        )
        .await;
        let DeferredExtra::Aggregation { voucher, .. } = extra else {
            panic!("expected an aggregation offer for the X-PAYMENT buyer");
        };
        assert_eq!(Address::from(voucher.buyer), BUYER);
    }

    #[tokio::test]
    async fn test_undecodable_payment_header_falls_back_to_new() {
        let facilitator = reachable_facilitator(Some(voucher_for(BUYER, 2)));
        let extra = get_payment_requirements_extra(
            Some("bm90IGEgcGF5bG9hZA=="),
            Some(&BUYER.to_string()),
            &ctx(),
            &facilitator,
            None,
        )
        .await;
        assert!(matches!(extra, DeferredExtra::New { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_facilitator_still_offers_new() {
        let facilitator = StubFacilitator {
            account: None,
            voucher: None,
        };
        let buyer = BUYER.to_string();
        let extra =
            get_payment_requirements_extra(None, Some(&buyer), &ctx(), &facilitator, None).await;
        let DeferredExtra::New { account, .. } = extra else {
            panic!("expected a new-voucher offer");
        };
        assert!(account.is_none());
    }

    #[tokio::test]
    async fn test_local_store_is_authoritative_over_facilitator() {
        // The facilitator would offer a voucher, but the local store is
        // empty, so a fresh series wins.
        let facilitator = reachable_facilitator(Some(voucher_for(BUYER, 2)));
        let store = MemoryVoucherStore::new();
        let buyer = BUYER.to_string();
        let extra = get_payment_requirements_extra(
            None,
            Some(&buyer),
            &ctx(),
            &facilitator,
            Some(&store),
        )
        .await;
        assert!(matches!(extra, DeferredExtra::New { .. }));
    }

    #[test]
    fn test_voucher_ids_are_unique_and_well_formed() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let id = generate_voucher_id();
            let hex = id.to_string();
            assert!(hex.starts_with("0x"));
            assert_eq!(hex.len(), 66);
            assert!(hex[2..].chars().all(|c| c.is_ascii_hexdigit()
                && !c.is_ascii_uppercase()));
            seen.insert(id);
        }
        assert_eq!(seen.len(), 1000);
    }
}
