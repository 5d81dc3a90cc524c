//! The verification pipeline for deferred payments.
//!
//! Each sub-verifier checks one concern and returns the first failing
//! [`DeferredErrorReason`]. The facilitator runs them in a fixed order
//! and short-circuits on the first failure; reason codes are bubbled
//! unchanged all the way to the 402 response.

use alloy_primitives::Address;
use alloy_provider::Provider;
use d402::UnixTimestamp;

use super::contract::IDeferredPaymentEscrow;
use crate::chain::Eip155ChainReference;
use crate::deferred::error::DeferredErrorReason;
use crate::deferred::store::VoucherStore;
use crate::deferred::typed_data::{
    recover_deposit_authorization_signer, recover_flush_authorization_signer,
    recover_permit_signer, recover_voucher_signer,
};
use crate::deferred::types::{
    DeferredExtra, DepositAuthorizationPayload, FlushAuthorization, PaymentPayload,
    PaymentRequirements, SignedVoucher, Voucher,
};
use d402::scheme::DeferredScheme;

/// Awaits a future, optionally instrumenting it with a tracing span.
macro_rules! traced {
    ($fut:expr, $span:expr) => {{
        #[cfg(feature = "telemetry")]
        {
            use tracing::Instrument;
            $fut.instrument($span).await
        }
        #[cfg(not(feature = "telemetry"))]
        {
            $fut.await
        }
    }};
}

/// Checks the payload against the requirements: schemes, network, chain
/// id, aggregate value, recipient, and asset.
///
/// # Errors
///
/// Returns the first failing [`DeferredErrorReason`].
pub fn verify_payment_requirements(
    payload: &PaymentPayload,
    requirements: &PaymentRequirements,
    extra: &DeferredExtra,
) -> Result<(), DeferredErrorReason> {
    if payload.scheme != DeferredScheme::NAME {
        return Err(DeferredErrorReason::InvalidDeferredEvmPayloadScheme);
    }
    if requirements.scheme != DeferredScheme::NAME {
        return Err(DeferredErrorReason::InvalidDeferredEvmRequirementsScheme);
    }
    if payload.network != requirements.network {
        return Err(DeferredErrorReason::InvalidDeferredEvmPayloadNetworkMismatch);
    }
    let chain_id = d402::networks::chain_id_by_network_name(&payload.network)
        .ok_or(DeferredErrorReason::InvalidNetworkUnsupported)?;
    let voucher = &payload.payload.voucher;
    if voucher.chain_id != chain_id {
        return Err(DeferredErrorReason::InvalidDeferredEvmPayloadChainId);
    }

    let required = match extra {
        DeferredExtra::New { .. } => Some(requirements.max_amount_required),
        DeferredExtra::Aggregation {
            voucher: prior, ..
        } => requirements
            .max_amount_required
            .checked_add(prior.value_aggregate),
    }
    .ok_or(DeferredErrorReason::InvalidDeferredEvmPayloadVoucherValue)?;
    if voucher.value_aggregate < required {
        return Err(DeferredErrorReason::InvalidDeferredEvmPayloadVoucherValue);
    }

    if voucher.seller != requirements.pay_to {
        return Err(DeferredErrorReason::InvalidDeferredEvmPayloadRecipientMismatch);
    }
    if voucher.asset != requirements.asset {
        return Err(DeferredErrorReason::InvalidDeferredEvmPayloadAssetMismatch);
    }
    Ok(())
}

/// Checks the voucher's freshness and its continuity with the seller's
/// offer: a new voucher must start the offered series at nonce 0 with a
/// positive aggregate; an aggregation voucher must extend the prior
/// voucher monotonically in every dimension.
///
/// # Errors
///
/// Returns the first failing [`DeferredErrorReason`].
pub fn verify_voucher_continuity(
    voucher: &Voucher,
    extra: &DeferredExtra,
    now: UnixTimestamp,
) -> Result<(), DeferredErrorReason> {
    if voucher.expiry <= now {
        return Err(DeferredErrorReason::InvalidDeferredEvmPayloadVoucherExpired);
    }
    if voucher.timestamp > now {
        return Err(DeferredErrorReason::InvalidDeferredEvmPayloadTimestampTooEarly);
    }

    match extra {
        DeferredExtra::New {
            voucher: params, ..
        } => {
            if voucher.nonce.inner() != 0 {
                return Err(DeferredErrorReason::InvalidDeferredEvmPayloadVoucherNonZeroNonce);
            }
            if voucher.value_aggregate == crate::chain::TokenAmount::ZERO {
                return Err(
                    DeferredErrorReason::InvalidDeferredEvmPayloadVoucherZeroValueAggregate,
                );
            }
            if voucher.id != params.id {
                return Err(DeferredErrorReason::InvalidDeferredEvmPayloadVoucherIdMismatch);
            }
            if voucher.escrow != params.escrow {
                return Err(DeferredErrorReason::InvalidDeferredEvmPayloadVoucherEscrowMismatch);
            }
        }
        DeferredExtra::Aggregation {
            voucher: prior, ..
        } => {
            if voucher.id != prior.id {
                return Err(DeferredErrorReason::InvalidDeferredEvmPayloadVoucherIdMismatch);
            }
            if voucher.buyer != prior.buyer {
                return Err(DeferredErrorReason::InvalidDeferredEvmPayloadVoucherBuyerMismatch);
            }
            if voucher.seller != prior.seller {
                return Err(DeferredErrorReason::InvalidDeferredEvmPayloadVoucherSellerMismatch);
            }
            if voucher.asset != prior.asset {
                return Err(DeferredErrorReason::InvalidDeferredEvmPayloadVoucherAssetMismatch);
            }
            if voucher.escrow != prior.escrow {
                return Err(DeferredErrorReason::InvalidDeferredEvmPayloadVoucherEscrowMismatch);
            }
            if voucher.chain_id != prior.chain_id {
                return Err(DeferredErrorReason::InvalidDeferredEvmPayloadVoucherChainIdMismatch);
            }
            if voucher.nonce.inner() != prior.nonce.inner() + 1 {
                return Err(DeferredErrorReason::InvalidDeferredEvmPayloadVoucherNonceMismatch);
            }
            if voucher.value_aggregate < prior.value_aggregate {
                return Err(
                    DeferredErrorReason::InvalidDeferredEvmPayloadVoucherValueAggregateDecreasing,
                );
            }
            if voucher.timestamp < prior.timestamp {
                return Err(
                    DeferredErrorReason::InvalidDeferredEvmPayloadVoucherTimestampDecreasing,
                );
            }
            if voucher.expiry < prior.expiry {
                return Err(DeferredErrorReason::InvalidDeferredEvmPayloadVoucherExpiryDecreasing);
            }
        }
    }
    Ok(())
}

/// Recovers the voucher's EIP-712 signer and requires it to be the
/// voucher's buyer.
///
/// # Errors
///
/// Returns [`DeferredErrorReason::InvalidDeferredEvmPayloadSignature`].
pub fn verify_voucher_signature(
    voucher: &Voucher,
    signature: &alloy_primitives::Bytes,
) -> Result<Address, DeferredErrorReason> {
    let recovered = recover_voucher_signer(voucher, signature)
        .map_err(|_| DeferredErrorReason::InvalidDeferredEvmPayloadSignature)?;
    if recovered == Address::from(voucher.buyer) {
        Ok(recovered)
    } else {
        Err(DeferredErrorReason::InvalidDeferredEvmPayloadSignature)
    }
}

/// Strict field-for-field equality of two signed vouchers, signature
/// included. Ids and signatures compare case-insensitively and addresses
/// checksum-normalized, which the parsed representations guarantee.
///
/// # Errors
///
/// Returns [`DeferredErrorReason::InvalidDeferredEvmPayloadVoucherNotDuplicate`].
pub fn verify_voucher_duplicate(
    stored: &SignedVoucher,
    claimed: &SignedVoucher,
) -> Result<(), DeferredErrorReason> {
    if stored == claimed {
        Ok(())
    } else {
        Err(DeferredErrorReason::InvalidDeferredEvmPayloadVoucherNotDuplicate)
    }
}

/// Requires the claimed voucher to be present in the store under its
/// `(id, nonce)` key, byte-for-byte. This prevents settling a voucher
/// the buyer never committed.
///
/// # Errors
///
/// Returns `…VoucherNotFound` when the key is absent (or the store
/// fails), `…VoucherFoundNotDuplicate` when the stored voucher differs.
pub async fn verify_voucher_availability(
    store: &dyn VoucherStore,
    claimed: &SignedVoucher,
) -> Result<(), DeferredErrorReason> {
    let stored = store
        .get_voucher(claimed.voucher.id, Some(claimed.voucher.nonce.inner()))
        .await
        .map_err(|_| DeferredErrorReason::InvalidDeferredEvmPayloadVoucherNotFound)?
        .ok_or(DeferredErrorReason::InvalidDeferredEvmPayloadVoucherNotFound)?;
    verify_voucher_duplicate(&stored, claimed)
        .map_err(|_| DeferredErrorReason::InvalidDeferredEvmPayloadVoucherFoundNotDuplicate)
}

/// Checks the voucher against chain state: the client must serve the
/// voucher's chain, and the buyer's escrow balance must cover the
/// voucher's outstanding amount.
///
/// # Errors
///
/// Contract-call failures map to the dedicated
/// `…contract_call_failed_…` codes; a short balance maps to
/// [`DeferredErrorReason::InsufficientFunds`].
pub async fn verify_onchain_state<P: Provider>(
    provider: &P,
    chain: &Eip155ChainReference,
    voucher: &Voucher,
) -> Result<(), DeferredErrorReason> {
    if chain.inner() != voucher.chain_id {
        return Err(DeferredErrorReason::InvalidClientNetwork);
    }
    let escrow = IDeferredPaymentEscrow::new(voucher.escrow.into(), provider);
    let sol_voucher = IDeferredPaymentEscrow::Voucher::from(voucher);

    let outstanding_call = escrow.getOutstandingAndCollectableAmount(sol_voucher);
    let account_call = escrow.getAccount(
        voucher.buyer.into(),
        voucher.seller.into(),
        voucher.asset.into(),
    );

    let (outstanding, account) = tokio::try_join!(
        async {
            let fut = outstanding_call.call().into_future();
            traced!(
                fut,
                tracing::info_span!("get_outstanding_amount", otel.kind = "client")
            )
            .map_err(|_| {
                DeferredErrorReason::InvalidDeferredEvmContractCallFailedOutstandingAmount
            })
        },
        async {
            let fut = account_call.call().into_future();
            traced!(
                fut,
                tracing::info_span!("get_account", otel.kind = "client")
            )
            .map_err(|_| DeferredErrorReason::InvalidDeferredEvmContractCallFailedAccount)
        },
    )?;

    if account.balance < outstanding.outstanding {
        return Err(DeferredErrorReason::InsufficientFunds);
    }
    Ok(())
}

/// Verifies a deposit authorization side-channel: the inner
/// authorization must be unexpired and signed by the voucher's buyer
/// under the escrow's domain; an attached permit must be unexpired and
/// signed by the buyer under the asset's domain.
///
/// # Errors
///
/// Returns the first failing [`DeferredErrorReason`].
pub fn verify_deposit_authorization(
    deposit: &DepositAuthorizationPayload,
    voucher: &Voucher,
    now: UnixTimestamp,
) -> Result<(), DeferredErrorReason> {
    let authorization = &deposit.deposit_authorization;
    if authorization.expiry <= now {
        return Err(DeferredErrorReason::InvalidDeferredEvmPayloadDepositAuthorizationExpired);
    }
    let signer = recover_deposit_authorization_signer(
        authorization,
        voucher.chain_id,
        voucher.escrow.into(),
    )
    .map_err(|_| DeferredErrorReason::InvalidDeferredEvmPayloadDepositAuthorizationSignature)?;
    if signer != Address::from(voucher.buyer) {
        return Err(DeferredErrorReason::InvalidDeferredEvmPayloadDepositAuthorizationSignature);
    }

    if let Some(permit) = &deposit.permit {
        if permit.deadline <= now {
            return Err(DeferredErrorReason::InvalidDeferredEvmPayloadPermitExpired);
        }
        let signer = recover_permit_signer(permit, voucher.chain_id, voucher.asset.into())
            .map_err(|_| DeferredErrorReason::InvalidDeferredEvmPayloadPermitSignature)?;
        if signer != Address::from(voucher.buyer) {
            return Err(DeferredErrorReason::InvalidDeferredEvmPayloadPermitSignature);
        }
    }
    Ok(())
}

/// Verifies a flush authorization: well-formed shape, unexpired, and
/// signed by `signer` under the primary type its shape selects.
///
/// # Errors
///
/// Returns the first failing [`DeferredErrorReason`].
pub fn verify_flush_authorization(
    flush: &FlushAuthorization,
    signer: Address,
    chain_id: u64,
    escrow: Address,
    now: UnixTimestamp,
) -> Result<(), DeferredErrorReason> {
    if !flush.is_well_formed() {
        return Err(DeferredErrorReason::InvalidDeferredEvmPayloadFlushAuthorizationSignature);
    }
    if flush.expiry <= now {
        return Err(DeferredErrorReason::InvalidDeferredEvmPayloadFlushAuthorizationExpired);
    }
    let recovered = recover_flush_authorization_signer(flush, chain_id, escrow)
        .map_err(|_| DeferredErrorReason::InvalidDeferredEvmPayloadFlushAuthorizationSignature)?;
    if recovered == signer {
        Ok(())
    } else {
        Err(DeferredErrorReason::InvalidDeferredEvmPayloadFlushAuthorizationSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::TokenAmount;
    use crate::deferred::store::MemoryVoucherStore;
    use crate::deferred::typed_data::{
        escrow_domain, permit_domain, sign_typed, sign_voucher,
    };
    use crate::deferred::types::{
        DeferredPayload, DepositAuthorization, NewVoucherParams, Permit, PermitDomain,
    };
    use crate::deferred::typed_data;
    use alloy_primitives::{Bytes, B256, address, b256};
    use alloy_signer_local::PrivateKeySigner;
    use d402::proto::v1;

    const NOW: u64 = 1_716_163_200;
    const SELLER: Address = address!("1234567890123456789012345678901234567890");
    const ASSET: Address = address!("1111111111111111111111111111111111111111");
    const ESCROW: Address = address!("ffffffffffffffffffffffffffffffffffffffff");
    const SERIES: B256 =
        b256!("7a3e0000000000000000000000000000000000000000000000000000000004f1");

    fn buyer_signer() -> PrivateKeySigner {
        "0xcb160425c35458024591e64638d6f7720dac915a0fb035c5964f6d51de0987d9"
            .parse()
            .unwrap()
    }

    fn now() -> UnixTimestamp {
        UnixTimestamp::from_secs(NOW)
    }

    fn voucher(buyer: Address, nonce: u64, value: u64) -> Voucher {
        Voucher {
            id: SERIES,
            buyer: buyer.into(),
            seller: SELLER.into(),
            value_aggregate: TokenAmount::from(value),
            asset: ASSET.into(),
            timestamp: now(),
            nonce: nonce.into(),
            escrow: ESCROW.into(),
            chain_id: 84532,
            expiry: UnixTimestamp::from_secs(NOW + 2_592_000),
        }
    }

    fn new_extra() -> DeferredExtra {
        DeferredExtra::New {
            voucher: NewVoucherParams {
                id: SERIES,
                escrow: ESCROW.into(),
            },
            account: None,
        }
    }

    async fn signed(signer: &PrivateKeySigner, voucher: Voucher) -> SignedVoucher {
        let signature = sign_voucher(signer, &voucher).await.unwrap();
        SignedVoucher { signature, voucher }
    }

    fn payload(voucher: Voucher, signature: Bytes) -> PaymentPayload {
        PaymentPayload {
            x402_version: v1::V1,
            scheme: "deferred".to_owned(),
            network: "base-sepolia".to_owned(),
            payload: DeferredPayload {
                signature,
                voucher,
                deposit_authorization: None,
            },
        }
    }

    fn requirements(max_amount: u64, extra: DeferredExtra) -> PaymentRequirements {
        PaymentRequirements {
            scheme: "deferred".to_owned(),
            network: "base-sepolia".to_owned(),
            max_amount_required: TokenAmount::from(max_amount),
            resource: "https://api.example.com/jokes".to_owned(),
            description: "One joke".to_owned(),
            mime_type: "application/json".to_owned(),
            output_schema: None,
            pay_to: SELLER.into(),
            max_timeout_seconds: 300,
            asset: ASSET.into(),
            extra: Some(extra),
        }
    }

    #[test]
    fn test_requirements_scheme_codes() {
        let buyer = buyer_signer().address();
        let voucher = voucher(buyer, 0, 1_000_000);
        let requirements = requirements(1_000_000, new_extra());

        let mut wrong_payload_scheme = payload(voucher.clone(), Bytes::new());
        wrong_payload_scheme.scheme = "exact".to_owned();
        assert_eq!(
            verify_payment_requirements(&wrong_payload_scheme, &requirements, &new_extra()),
            Err(DeferredErrorReason::InvalidDeferredEvmPayloadScheme)
        );

        let ok_payload = payload(voucher, Bytes::new());
        let mut wrong_requirements = requirements.clone();
        wrong_requirements.scheme = "exact".to_owned();
        assert_eq!(
            verify_payment_requirements(&ok_payload, &wrong_requirements, &new_extra()),
            Err(DeferredErrorReason::InvalidDeferredEvmRequirementsScheme)
        );

        let mut wrong_network = requirements.clone();
        wrong_network.network = "base".to_owned();
        assert_eq!(
            verify_payment_requirements(&ok_payload, &wrong_network, &new_extra()),
            Err(DeferredErrorReason::InvalidDeferredEvmPayloadNetworkMismatch)
        );
    }

    #[test]
    fn test_unsupported_network_code() {
        let buyer = buyer_signer().address();
        let mut bad_payload = payload(voucher(buyer, 0, 1_000_000), Bytes::new());
        bad_payload.network = "moonbase".to_owned();
        let mut bad_requirements = requirements(1_000_000, new_extra());
        bad_requirements.network = "moonbase".to_owned();
        assert_eq!(
            verify_payment_requirements(&bad_payload, &bad_requirements, &new_extra()),
            Err(DeferredErrorReason::InvalidNetworkUnsupported)
        );
    }

    #[test]
    fn test_chain_id_mismatch_code() {
        let buyer = buyer_signer().address();
        let mut voucher = voucher(buyer, 0, 1_000_000);
        voucher.chain_id = 8453;
        assert_eq!(
            verify_payment_requirements(
                &payload(voucher, Bytes::new()),
                &requirements(1_000_000, new_extra()),
                &new_extra()
            ),
            Err(DeferredErrorReason::InvalidDeferredEvmPayloadChainId)
        );
    }

    #[test]
    fn test_value_recipient_asset_codes() {
        let buyer = buyer_signer().address();

        // Aggregate must cover max + prior value.
        let prior = voucher(buyer, 0, 100_000);
        let agg_extra = DeferredExtra::Aggregation {
            signature: Bytes::new(),
            voucher: prior,
            account: None,
        };
        let short = voucher(buyer, 1, 140_000);
        assert_eq!(
            verify_payment_requirements(
                &payload(short, Bytes::new()),
                &requirements(50_000, agg_extra.clone()),
                &agg_extra
            ),
            Err(DeferredErrorReason::InvalidDeferredEvmPayloadVoucherValue)
        );

        // S4: seller mismatch.
        let mut wrong_seller = voucher(buyer, 0, 1_000_000);
        wrong_seller.seller = address!("9999999999999999999999999999999999999999").into();
        assert_eq!(
            verify_payment_requirements(
                &payload(wrong_seller, Bytes::new()),
                &requirements(1_000_000, new_extra()),
                &new_extra()
            ),
            Err(DeferredErrorReason::InvalidDeferredEvmPayloadRecipientMismatch)
        );

        let mut wrong_asset = voucher(buyer, 0, 1_000_000);
        wrong_asset.asset = address!("2222222222222222222222222222222222222222").into();
        assert_eq!(
            verify_payment_requirements(
                &payload(wrong_asset, Bytes::new()),
                &requirements(1_000_000, new_extra()),
                &new_extra()
            ),
            Err(DeferredErrorReason::InvalidDeferredEvmPayloadAssetMismatch)
        );
    }

    #[test]
    fn test_continuity_freshness_codes() {
        let buyer = buyer_signer().address();

        let mut expired = voucher(buyer, 0, 1_000_000);
        expired.expiry = UnixTimestamp::from_secs(NOW - 1);
        assert_eq!(
            verify_voucher_continuity(&expired, &new_extra(), now()),
            Err(DeferredErrorReason::InvalidDeferredEvmPayloadVoucherExpired)
        );

        let mut future = voucher(buyer, 0, 1_000_000);
        future.timestamp = UnixTimestamp::from_secs(NOW + 10);
        assert_eq!(
            verify_voucher_continuity(&future, &new_extra(), now()),
            Err(DeferredErrorReason::InvalidDeferredEvmPayloadTimestampTooEarly)
        );
    }

    #[test]
    fn test_continuity_new_voucher_codes() {
        let buyer = buyer_signer().address();

        let nonzero = voucher(buyer, 3, 1_000_000);
        assert_eq!(
            verify_voucher_continuity(&nonzero, &new_extra(), now()),
            Err(DeferredErrorReason::InvalidDeferredEvmPayloadVoucherNonZeroNonce)
        );

        let zero_value = voucher(buyer, 0, 0);
        assert_eq!(
            verify_voucher_continuity(&zero_value, &new_extra(), now()),
            Err(DeferredErrorReason::InvalidDeferredEvmPayloadVoucherZeroValueAggregate)
        );

        let mut wrong_series = voucher(buyer, 0, 1_000_000);
        wrong_series.id =
            b256!("00000000000000000000000000000000000000000000000000000000000000cc");
        assert_eq!(
            verify_voucher_continuity(&wrong_series, &new_extra(), now()),
            Err(DeferredErrorReason::InvalidDeferredEvmPayloadVoucherIdMismatch)
        );

        let ok = voucher(buyer, 0, 1_000_000);
        assert_eq!(verify_voucher_continuity(&ok, &new_extra(), now()), Ok(()));
    }

    #[test]
    fn test_continuity_aggregation_codes() {
        let buyer = buyer_signer().address();
        let prior = voucher(buyer, 4, 400_000);
        let extra = DeferredExtra::Aggregation {
            signature: Bytes::new(),
            voucher: prior.clone(),
            account: None,
        };
        let successor = |mutate: fn(&mut Voucher)| {
            let mut next = prior.clone();
            next.nonce = 5u64.into();
            next.value_aggregate = TokenAmount::from(450_000u64);
            next.timestamp = UnixTimestamp::from_secs(NOW + 60);
            next.expiry = UnixTimestamp::from_secs(NOW + 60 + 2_592_000);
            mutate(&mut next);
            next
        };

        let cases: Vec<(fn(&mut Voucher), DeferredErrorReason)> = vec![
            (
                |v| v.id = B256::ZERO,
                DeferredErrorReason::InvalidDeferredEvmPayloadVoucherIdMismatch,
            ),
            (
                |v| v.buyer = address!("00000000000000000000000000000000000000aa").into(),
                DeferredErrorReason::InvalidDeferredEvmPayloadVoucherBuyerMismatch,
            ),
            (
                |v| v.seller = address!("00000000000000000000000000000000000000bb").into(),
                DeferredErrorReason::InvalidDeferredEvmPayloadVoucherSellerMismatch,
            ),
            (
                |v| v.asset = address!("00000000000000000000000000000000000000cc").into(),
                DeferredErrorReason::InvalidDeferredEvmPayloadVoucherAssetMismatch,
            ),
            (
                |v| v.escrow = address!("00000000000000000000000000000000000000dd").into(),
                DeferredErrorReason::InvalidDeferredEvmPayloadVoucherEscrowMismatch,
            ),
            (
                |v| v.chain_id = 1,
                DeferredErrorReason::InvalidDeferredEvmPayloadVoucherChainIdMismatch,
            ),
            (
                |v| v.nonce = 7u64.into(),
                DeferredErrorReason::InvalidDeferredEvmPayloadVoucherNonceMismatch,
            ),
            (
                |v| v.value_aggregate = TokenAmount::from(399_999u64),
                DeferredErrorReason::InvalidDeferredEvmPayloadVoucherValueAggregateDecreasing,
            ),
            (
                |v| v.timestamp = UnixTimestamp::from_secs(NOW - 100),
                DeferredErrorReason::InvalidDeferredEvmPayloadVoucherTimestampDecreasing,
            ),
            (
                |v| v.expiry = UnixTimestamp::from_secs(NOW + 2_591_000),
                DeferredErrorReason::InvalidDeferredEvmPayloadVoucherExpiryDecreasing,
            ),
        ];
        let check_at = UnixTimestamp::from_secs(NOW + 60);
        for (mutate, expected) in cases {
            let next = successor(mutate);
            assert_eq!(
                verify_voucher_continuity(&next, &extra, check_at),
                Err(expected)
            );
        }

        let ok = successor(|_| {});
        assert_eq!(verify_voucher_continuity(&ok, &extra, check_at), Ok(()));
    }

    #[tokio::test]
    async fn test_signature_verification_codes() {
        let signer = buyer_signer();
        let voucher = voucher(signer.address(), 0, 1_000_000);
        let signature = sign_voucher(&signer, &voucher).await.unwrap();
        assert_eq!(
            verify_voucher_signature(&voucher, &signature),
            Ok(signer.address())
        );

        // Signed by a stranger claiming to be the buyer.
        let stranger = PrivateKeySigner::random();
        let forged = sign_voucher(&stranger, &voucher).await.unwrap();
        assert_eq!(
            verify_voucher_signature(&voucher, &forged),
            Err(DeferredErrorReason::InvalidDeferredEvmPayloadSignature)
        );

        let garbage = Bytes::from(vec![0u8; 5]);
        assert_eq!(
            verify_voucher_signature(&voucher, &garbage),
            Err(DeferredErrorReason::InvalidDeferredEvmPayloadSignature)
        );
    }

    #[tokio::test]
    async fn test_availability_codes() {
        let signer = buyer_signer();
        let store = MemoryVoucherStore::new();
        let committed = signed(&signer, voucher(signer.address(), 0, 1_000_000)).await;

        // S6: never stored.
        assert_eq!(
            verify_voucher_availability(&store, &committed).await,
            Err(DeferredErrorReason::InvalidDeferredEvmPayloadVoucherNotFound)
        );

        store.store_voucher(committed.clone()).await.unwrap();
        assert_eq!(verify_voucher_availability(&store, &committed).await, Ok(()));

        // Same key, different signature: found but not a duplicate.
        let mut tampered = committed.clone();
        tampered.signature = Bytes::from(vec![0x55; 65]);
        assert_eq!(
            verify_voucher_availability(&store, &tampered).await,
            Err(DeferredErrorReason::InvalidDeferredEvmPayloadVoucherFoundNotDuplicate)
        );
    }

    #[tokio::test]
    async fn test_duplicate_rejects_field_changes() {
        let signer = buyer_signer();
        let original = signed(&signer, voucher(signer.address(), 0, 1_000_000)).await;
        assert_eq!(verify_voucher_duplicate(&original, &original.clone()), Ok(()));

        let mut different = original.clone();
        different.voucher.value_aggregate = TokenAmount::from(2_000_000u64);
        assert_eq!(
            verify_voucher_duplicate(&original, &different),
            Err(DeferredErrorReason::InvalidDeferredEvmPayloadVoucherNotDuplicate)
        );
    }

    async fn deposit_payload(
        signer: &PrivateKeySigner,
        with_permit: bool,
    ) -> DepositAuthorizationPayload {
        let mut authorization = DepositAuthorization {
            buyer: signer.address().into(),
            seller: SELLER.into(),
            asset: ASSET.into(),
            amount: TokenAmount::from(1_000_000u64),
            nonce: b256!("00000000000000000000000000000000000000000000000000000000000000aa"),
            expiry: UnixTimestamp::from_secs(NOW + 2_592_000),
            signature: Bytes::new(),
        };
        let domain = escrow_domain(84532, ESCROW);
        let message = typed_data::DepositAuthorization::from(&authorization);
        authorization.signature = sign_typed(signer, &message, &domain).await.unwrap();

        let permit = if with_permit {
            let mut permit = Permit {
                owner: signer.address().into(),
                spender: ESCROW.into(),
                value: TokenAmount::from(1_000_000u64),
                nonce: TokenAmount::ZERO,
                deadline: UnixTimestamp::from_secs(NOW + 2_592_000),
                domain: PermitDomain {
                    name: "USD Coin".to_owned(),
                    version: "2".to_owned(),
                },
                signature: Bytes::new(),
            };
            let domain = permit_domain(&permit.domain, 84532, ASSET);
            let message = typed_data::Permit::from(&permit);
            permit.signature = sign_typed(signer, &message, &domain).await.unwrap();
            Some(permit)
        } else {
            None
        };

        DepositAuthorizationPayload {
            permit,
            deposit_authorization: authorization,
        }
    }

    #[tokio::test]
    async fn test_deposit_authorization_verifies() {
        let signer = buyer_signer();
        let voucher = voucher(signer.address(), 0, 1_000_000);
        let deposit = deposit_payload(&signer, true).await;
        assert_eq!(
            verify_deposit_authorization(&deposit, &voucher, now()),
            Ok(())
        );
    }

    #[tokio::test]
    async fn test_deposit_authorization_codes() {
        let signer = buyer_signer();
        let voucher = voucher(signer.address(), 0, 1_000_000);

        let mut expired = deposit_payload(&signer, false).await;
        expired.deposit_authorization.expiry = UnixTimestamp::from_secs(NOW - 1);
        assert_eq!(
            verify_deposit_authorization(&expired, &voucher, now()),
            Err(DeferredErrorReason::InvalidDeferredEvmPayloadDepositAuthorizationExpired)
        );

        let stranger = PrivateKeySigner::random();
        let forged = deposit_payload(&stranger, false).await;
        assert_eq!(
            verify_deposit_authorization(&forged, &voucher, now()),
            Err(DeferredErrorReason::InvalidDeferredEvmPayloadDepositAuthorizationSignature)
        );

        // Valid deposit authorization, permit signed by a stranger.
        let good = deposit_payload(&signer, false).await;
        let bad_permit = deposit_payload(&stranger, true).await.permit;
        let mixed = DepositAuthorizationPayload {
            permit: bad_permit,
            deposit_authorization: good.deposit_authorization,
        };
        assert_eq!(
            verify_deposit_authorization(&mixed, &voucher, now()),
            Err(DeferredErrorReason::InvalidDeferredEvmPayloadPermitSignature)
        );

        let mut stale_permit = deposit_payload(&signer, true).await;
        if let Some(permit) = stale_permit.permit.as_mut() {
            permit.deadline = UnixTimestamp::from_secs(NOW - 1);
        }
        assert_eq!(
            verify_deposit_authorization(&stale_permit, &voucher, now()),
            Err(DeferredErrorReason::InvalidDeferredEvmPayloadPermitExpired)
        );
    }

    #[tokio::test]
    async fn test_flush_authorization_codes() {
        let signer = buyer_signer();
        let mut flush = FlushAuthorization {
            buyer: signer.address().into(),
            seller: Some(SELLER.into()),
            asset: Some(ASSET.into()),
            nonce: b256!("00000000000000000000000000000000000000000000000000000000000000bb"),
            expiry: UnixTimestamp::from_secs(NOW + 600),
            signature: Bytes::new(),
        };
        flush.signature =
            crate::deferred::typed_data::sign_flush_authorization(&signer, &flush, 84532, ESCROW)
                .await
                .unwrap();

        assert_eq!(
            verify_flush_authorization(&flush, signer.address(), 84532, ESCROW, now()),
            Ok(())
        );

        let mut expired = flush.clone();
        expired.expiry = UnixTimestamp::from_secs(NOW - 1);
        assert_eq!(
            verify_flush_authorization(&expired, signer.address(), 84532, ESCROW, now()),
            Err(DeferredErrorReason::InvalidDeferredEvmPayloadFlushAuthorizationExpired)
        );

        let mut half_scoped = flush.clone();
        half_scoped.asset = None;
        assert_eq!(
            verify_flush_authorization(&half_scoped, signer.address(), 84532, ESCROW, now()),
            Err(DeferredErrorReason::InvalidDeferredEvmPayloadFlushAuthorizationSignature)
        );

        let stranger = PrivateKeySigner::random();
        assert_eq!(
            verify_flush_authorization(&flush, stranger.address(), 84532, ESCROW, now()),
            Err(DeferredErrorReason::InvalidDeferredEvmPayloadFlushAuthorizationSignature)
        );
    }
}
