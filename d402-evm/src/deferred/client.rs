//! Buyer-side voucher construction and signing.
//!
//! A buyer answers a 402 by either minting a fresh voucher series or
//! aggregating onto the series the seller offered, then signing the
//! result and encoding it into the `X-PAYMENT` header. Separately, the
//! buyer may decide to attach a deposit authorization when its escrow
//! balance is running low.

use alloy_primitives::{Address, B256, U256};
use d402::UnixTimestamp;
use d402::proto::v1;
use d402::scheme::DeferredScheme;
use rand::RngExt;
use rand::rng;

use super::codec::{PaymentHeaderError, encode_payment_header};
use super::server::DeferredFacilitatorApi;
use super::typed_data::{
    self, SignerLike, SigningError, recover_voucher_signer, sign_typed, sign_voucher,
};
use super::types::{
    DeferredExtra, DeferredPayload, DepositAuthorization, DepositAuthorizationPayload, Permit,
    PermitDomain, PaymentPayload, PaymentRequirements, Voucher,
};
use super::VOUCHER_VALIDITY_SECONDS;
use crate::networks::{DepositConfig, default_deposit_config};

/// Errors from buyer-side voucher construction.
#[derive(Debug, thiserror::Error)]
pub enum DeferredClientError {
    /// The requirements carry no deferred `extra` member.
    #[error("Payment requirements carry no deferred extra data")]
    MissingExtra,
    /// A new-voucher offer was required but the extra is an aggregation.
    #[error("Payment requirements do not offer a new voucher")]
    ExpectedNewOffer,
    /// An aggregation offer was required but the extra is a new offer.
    #[error("Payment requirements do not offer an aggregation")]
    ExpectedAggregationOffer,
    /// The requirements name a network this crate does not know.
    #[error("Unknown network {0}")]
    UnsupportedNetwork(String),
    /// The prior voucher's seller does not match the requirements' `payTo`.
    #[error("Prior voucher seller does not match payTo")]
    RecipientMismatch,
    /// The prior voucher's asset does not match the requirements' asset.
    #[error("Prior voucher asset does not match the requirements asset")]
    AssetMismatch,
    /// The prior voucher's chain id does not match the network.
    #[error("Prior voucher chain id does not match the network")]
    ChainIdMismatch,
    /// The prior voucher expired.
    #[error("Prior voucher is expired")]
    VoucherExpired,
    /// The prior voucher's timestamp is in the future.
    #[error("Prior voucher timestamp is in the future")]
    FutureTimestamp,
    /// The prior voucher's signature does not recover to the buyer.
    #[error("Prior voucher signature was not produced by the buyer")]
    InvalidPriorSignature,
    /// Aggregating would overflow the 256-bit value range.
    #[error("Voucher aggregate overflows the 256-bit range")]
    AggregateOverflow,
    /// The wallet rejected or cannot perform typed-data signing.
    #[error(transparent)]
    Signing(#[from] SigningError),
    /// The signed payload could not be encoded into a header.
    #[error(transparent)]
    Encoding(#[from] PaymentHeaderError),
}

/// Creates the first voucher of a new series from a `type: "new"` offer.
///
/// Uses the current system time; see [`create_new_voucher_at`].
///
/// # Errors
///
/// Returns [`DeferredClientError`] if the offer shape or network is wrong.
pub fn create_new_voucher(
    buyer: Address,
    requirements: &PaymentRequirements,
) -> Result<Voucher, DeferredClientError> {
    create_new_voucher_at(buyer, requirements, UnixTimestamp::now())
}

/// Creates the first voucher of a new series, with an explicit clock.
///
/// The voucher carries `nonce = 0`, `valueAggregate = maxAmountRequired`,
/// and a 30-day expiry horizon.
///
/// # Errors
///
/// Returns [`DeferredClientError`] if the offer shape or network is wrong.
pub fn create_new_voucher_at(
    buyer: Address,
    requirements: &PaymentRequirements,
    now: UnixTimestamp,
) -> Result<Voucher, DeferredClientError> {
    let extra = requirements
        .extra
        .as_ref()
        .ok_or(DeferredClientError::MissingExtra)?;
    let DeferredExtra::New {
        voucher: params, ..
    } = extra
    else {
        return Err(DeferredClientError::ExpectedNewOffer);
    };
    let chain_id = d402::networks::chain_id_by_network_name(&requirements.network)
        .ok_or_else(|| DeferredClientError::UnsupportedNetwork(requirements.network.clone()))?;
    Ok(Voucher {
        id: params.id,
        buyer: buyer.into(),
        seller: requirements.pay_to,
        value_aggregate: requirements.max_amount_required,
        asset: requirements.asset,
        timestamp: now,
        nonce: 0u64.into(),
        escrow: params.escrow,
        chain_id,
        expiry: now + VOUCHER_VALIDITY_SECONDS,
    })
}

/// Creates the successor voucher from a `type: "aggregation"` offer.
///
/// Uses the current system time; see [`aggregate_voucher_at`].
///
/// # Errors
///
/// Returns [`DeferredClientError`] if any aggregation precondition fails.
pub fn aggregate_voucher(
    buyer: Address,
    requirements: &PaymentRequirements,
) -> Result<Voucher, DeferredClientError> {
    aggregate_voucher_at(buyer, requirements, UnixTimestamp::now())
}

/// Creates the successor voucher, with an explicit clock.
///
/// Preconditions are checked in a fixed order, each with its own error:
/// seller matches `payTo`, asset matches, chain id matches the network,
/// the prior voucher is unexpired and not from the future, and the prior
/// signature was produced by `buyer`.
///
/// # Errors
///
/// Returns [`DeferredClientError`] for the first failing precondition.
pub fn aggregate_voucher_at(
    buyer: Address,
    requirements: &PaymentRequirements,
    now: UnixTimestamp,
) -> Result<Voucher, DeferredClientError> {
    let extra = requirements
        .extra
        .as_ref()
        .ok_or(DeferredClientError::MissingExtra)?;
    let DeferredExtra::Aggregation {
        signature, voucher: prior, ..
    } = extra
    else {
        return Err(DeferredClientError::ExpectedAggregationOffer);
    };

    if prior.seller != requirements.pay_to {
        return Err(DeferredClientError::RecipientMismatch);
    }
    if prior.asset != requirements.asset {
        return Err(DeferredClientError::AssetMismatch);
    }
    let chain_id = d402::networks::chain_id_by_network_name(&requirements.network)
        .ok_or_else(|| DeferredClientError::UnsupportedNetwork(requirements.network.clone()))?;
    if prior.chain_id != chain_id {
        return Err(DeferredClientError::ChainIdMismatch);
    }
    if now >= prior.expiry {
        return Err(DeferredClientError::VoucherExpired);
    }
    if now < prior.timestamp {
        return Err(DeferredClientError::FutureTimestamp);
    }
    let signer = recover_voucher_signer(prior, signature)
        .map_err(|_| DeferredClientError::InvalidPriorSignature)?;
    if signer != buyer {
        return Err(DeferredClientError::InvalidPriorSignature);
    }

    let value_aggregate = prior
        .value_aggregate
        .checked_add(requirements.max_amount_required)
        .ok_or(DeferredClientError::AggregateOverflow)?;
    Ok(Voucher {
        id: prior.id,
        buyer: prior.buyer,
        seller: prior.seller,
        value_aggregate,
        asset: prior.asset,
        timestamp: now,
        nonce: (prior.nonce.inner() + 1).into(),
        escrow: prior.escrow,
        chain_id: prior.chain_id,
        expiry: now + VOUCHER_VALIDITY_SECONDS,
    })
}

/// A payment payload whose voucher has not been signed yet.
#[derive(Debug, Clone)]
pub struct UnsignedPaymentPayload {
    /// The network the payment targets.
    pub network: String,
    /// The voucher awaiting signature.
    pub voucher: Voucher,
    /// Optional deposit side-channel to attach.
    pub deposit_authorization: Option<DepositAuthorizationPayload>,
}

/// Builds the unsigned payload for a 402 offer, dispatching on the offer
/// type. Uses the current system time; see [`prepare_payment_header_at`].
///
/// # Errors
///
/// Returns [`DeferredClientError`] if voucher construction fails.
pub fn prepare_payment_header(
    buyer: Address,
    requirements: &PaymentRequirements,
    extra_payload: Option<DepositAuthorizationPayload>,
) -> Result<UnsignedPaymentPayload, DeferredClientError> {
    prepare_payment_header_at(buyer, requirements, extra_payload, UnixTimestamp::now())
}

/// Builds the unsigned payload for a 402 offer, with an explicit clock.
///
/// # Errors
///
/// Returns [`DeferredClientError`] if voucher construction fails.
pub fn prepare_payment_header_at(
    buyer: Address,
    requirements: &PaymentRequirements,
    extra_payload: Option<DepositAuthorizationPayload>,
    now: UnixTimestamp,
) -> Result<UnsignedPaymentPayload, DeferredClientError> {
    let extra = requirements
        .extra
        .as_ref()
        .ok_or(DeferredClientError::MissingExtra)?;
    let voucher = match extra {
        DeferredExtra::New { .. } => create_new_voucher_at(buyer, requirements, now)?,
        DeferredExtra::Aggregation { .. } => aggregate_voucher_at(buyer, requirements, now)?,
    };
    Ok(UnsignedPaymentPayload {
        network: requirements.network.clone(),
        voucher,
        deposit_authorization: extra_payload,
    })
}

/// Signs the voucher of an unsigned payload and assembles the full
/// payment payload.
///
/// # Errors
///
/// Returns [`DeferredClientError::Signing`] if the wallet rejects the
/// request.
pub async fn sign_payment_header<S: SignerLike>(
    signer: &S,
    unsigned: UnsignedPaymentPayload,
) -> Result<PaymentPayload, DeferredClientError> {
    let signature = sign_voucher(signer, &unsigned.voucher).await?;
    Ok(PaymentPayload {
        x402_version: v1::V1,
        scheme: DeferredScheme.to_string(),
        network: unsigned.network,
        payload: DeferredPayload {
            signature,
            voucher: unsigned.voucher,
            deposit_authorization: unsigned.deposit_authorization,
        },
    })
}

/// Builds, signs, and encodes an `X-PAYMENT` header for a 402 offer.
///
/// This is `encode ∘ sign_payment_header ∘ prepare_payment_header`.
///
/// # Errors
///
/// Returns [`DeferredClientError`] if any stage fails.
pub async fn create_payment_header<S: SignerLike>(
    signer: &S,
    requirements: &PaymentRequirements,
    extra_payload: Option<DepositAuthorizationPayload>,
) -> Result<String, DeferredClientError> {
    let unsigned = prepare_payment_header(signer.address(), requirements, extra_payload)?;
    let payload = sign_payment_header(signer, unsigned).await?;
    Ok(encode_payment_header(&payload)?)
}

/// Decides whether to attach a deposit authorization to the next payment,
/// and builds one when the buyer's escrow balance is running low.
///
/// Uses the current system time; see [`create_payment_extra_payload_at`].
///
/// # Errors
///
/// Returns [`DeferredClientError`] on signing failure; a facilitator that
/// cannot be reached yields `Ok(None)`.
pub async fn create_payment_extra_payload<S: SignerLike>(
    signer: &S,
    requirements: &PaymentRequirements,
    deposit_configs: &[DepositConfig],
    facilitator: &dyn DeferredFacilitatorApi,
) -> Result<Option<DepositAuthorizationPayload>, DeferredClientError> {
    create_payment_extra_payload_at(
        signer,
        requirements,
        deposit_configs,
        facilitator,
        UnixTimestamp::now(),
    )
    .await
}

/// The deposit-decision algorithm, with an explicit clock.
///
/// 1. Without an account snapshot in the requirements, do nothing.
/// 2. With balance at or above `threshold + maxAmountRequired`, do nothing.
/// 3. Otherwise re-fetch a fresh snapshot from the facilitator; an
///    unreachable facilitator or sufficient fresh balance also means
///    nothing to do.
/// 4. Build and sign a deposit authorization for the matching config's
///    amount, adding a permit iff the asset allowance is below it.
///
/// # Errors
///
/// Returns [`DeferredClientError`] on signing failure or an unknown
/// network.
pub async fn create_payment_extra_payload_at<S: SignerLike>(
    signer: &S,
    requirements: &PaymentRequirements,
    deposit_configs: &[DepositConfig],
    facilitator: &dyn DeferredFacilitatorApi,
    now: UnixTimestamp,
) -> Result<Option<DepositAuthorizationPayload>, DeferredClientError> {
    let Some(extra) = requirements.extra.as_ref() else {
        return Ok(None);
    };
    let Some(account) = extra.account() else {
        return Ok(None);
    };
    let chain_id = d402::networks::chain_id_by_network_name(&requirements.network)
        .ok_or_else(|| DeferredClientError::UnsupportedNetwork(requirements.network.clone()))?;
    let asset: Address = requirements.asset.into();
    let Some(config) = deposit_configs
        .iter()
        .find(|c| c.asset == asset)
        .cloned()
        .or_else(|| default_deposit_config(chain_id, asset))
    else {
        return Ok(None);
    };

    let needed = config
        .threshold
        .checked_add(requirements.max_amount_required.into())
        .ok_or(DeferredClientError::AggregateOverflow)?;
    if <U256 as From<_>>::from(account.balance) >= needed {
        return Ok(None);
    }

    let escrow: Address = match extra {
        DeferredExtra::New { voucher, .. } => voucher.escrow.into(),
        DeferredExtra::Aggregation { voucher, .. } => voucher.escrow.into(),
    };
    let buyer = signer.address();
    let seller: Address = requirements.pay_to.into();

    // The snapshot in the requirements may be stale; only a fresh read
    // justifies asking the buyer to sign a deposit.
    let Ok(fresh) = facilitator
        .buyer_account(buyer, seller, asset, escrow, chain_id)
        .await
    else {
        return Ok(None);
    };
    if <U256 as From<_>>::from(fresh.balance) >= needed {
        return Ok(None);
    }

    let nonce: [u8; 32] = rng().random();
    let nonce = B256::from(nonce);
    let expiry = now + VOUCHER_VALIDITY_SECONDS;

    let mut deposit_authorization = DepositAuthorization {
        buyer: buyer.into(),
        seller: seller.into(),
        asset: asset.into(),
        amount: config.amount.into(),
        nonce,
        expiry,
        signature: alloy_primitives::Bytes::new(),
    };
    let domain = typed_data::escrow_domain(chain_id, escrow);
    let message = typed_data::DepositAuthorization::from(&deposit_authorization);
    deposit_authorization.signature = sign_typed(signer, &message, &domain).await?;

    let permit = if <U256 as From<_>>::from(fresh.asset_allowance) < config.amount {
        let mut permit = Permit {
            owner: buyer.into(),
            spender: escrow.into(),
            value: config.amount.into(),
            nonce: fresh.asset_permit_nonce,
            deadline: expiry,
            domain: PermitDomain {
                name: config.domain.name.clone(),
                version: config.domain.version.clone(),
            },
            signature: alloy_primitives::Bytes::new(),
        };
        let domain = typed_data::permit_domain(&permit.domain, chain_id, asset);
        let message = typed_data::Permit::from(&permit);
        permit.signature = sign_typed(signer, &message, &domain).await?;
        Some(permit)
    } else {
        None
    };

    Ok(Some(DepositAuthorizationPayload {
        permit,
        deposit_authorization,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::TokenAmount;
    use crate::deferred::codec::decode_payment_header;
    use crate::deferred::server::FacilitatorApiError;
    use crate::deferred::types::{EscrowAccountSnapshot, NewVoucherParams, SignedVoucher};
    use alloy_primitives::{address, b256};
    use alloy_signer_local::PrivateKeySigner;
    use d402::facilitator::BoxFuture;

    const FROZEN_NOW: u64 = 1_716_163_200; // 2024-05-20T00:00:00Z
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

    fn new_offer() -> DeferredExtra {
        DeferredExtra::New {
            voucher: NewVoucherParams {
                id: SERIES,
                escrow: ESCROW.into(),
            },
            account: None,
        }
    }

    fn aggregation_offer(prior: &SignedVoucher) -> DeferredExtra {
        DeferredExtra::Aggregation {
            signature: prior.signature.clone(),
            voucher: prior.voucher.clone(),
            account: None,
        }
    }

    #[test]
    fn test_create_new_voucher_happy_path() {
        let buyer = buyer_signer().address();
        let now = UnixTimestamp::from_secs(FROZEN_NOW);
        let voucher =
            create_new_voucher_at(buyer, &requirements(1_000_000, new_offer()), now).unwrap();
        assert_eq!(voucher.id, SERIES);
        assert_eq!(voucher.nonce.inner(), 0);
        assert_eq!(voucher.value_aggregate, TokenAmount::from(1_000_000u64));
        assert_eq!(voucher.timestamp.as_secs(), FROZEN_NOW);
        assert_eq!(voucher.expiry.as_secs(), FROZEN_NOW + 2_592_000);
        assert_eq!(voucher.chain_id, 84532);
        assert_eq!(Address::from(voucher.buyer), buyer);
    }

    #[tokio::test]
    async fn test_sign_encode_decode_is_byte_stable() {
        let signer = buyer_signer();
        let now = UnixTimestamp::from_secs(FROZEN_NOW);
        let requirements = requirements(1_000_000, new_offer());
        let unsigned =
            prepare_payment_header_at(signer.address(), &requirements, None, now).unwrap();
        let payload = sign_payment_header(&signer, unsigned).await.unwrap();
        let header = encode_payment_header(&payload).unwrap();
        let decoded = decode_payment_header(&header).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(encode_payment_header(&decoded).unwrap(), header);
    }

    #[tokio::test]
    async fn test_aggregation_ten_rounds() {
        let signer = buyer_signer();
        let buyer = signer.address();
        let mut now = UnixTimestamp::from_secs(FROZEN_NOW);

        let initial = requirements(100_000, new_offer());
        let voucher = create_new_voucher_at(buyer, &initial, now).unwrap();
        let signature = sign_voucher(&signer, &voucher).await.unwrap();
        let mut prior = SignedVoucher { signature, voucher };

        for round in 1..=10u64 {
            now = now + 60;
            let next_requirements = requirements(50_000, aggregation_offer(&prior));
            let voucher = aggregate_voucher_at(buyer, &next_requirements, now).unwrap();
            assert_eq!(voucher.nonce.inner(), round);
            assert!(voucher.timestamp >= prior.voucher.timestamp);
            assert!(voucher.expiry >= prior.voucher.expiry);
            assert!(voucher.value_aggregate >= prior.voucher.value_aggregate);
            let signature = sign_voucher(&signer, &voucher).await.unwrap();
            prior = SignedVoucher { signature, voucher };
        }

        assert_eq!(prior.voucher.nonce.inner(), 10);
        assert_eq!(prior.voucher.value_aggregate, TokenAmount::from(600_000u64));
    }

    #[tokio::test]
    async fn test_aggregation_rejects_expired_prior() {
        let signer = buyer_signer();
        let buyer = signer.address();
        let now = UnixTimestamp::from_secs(FROZEN_NOW);

        let voucher = create_new_voucher_at(buyer, &requirements(100_000, new_offer()), now)
            .unwrap();
        let signature = sign_voucher(&signer, &voucher).await.unwrap();
        let prior = SignedVoucher { signature, voucher };

        let later = UnixTimestamp::from_secs(prior.voucher.expiry.as_secs() + 1);
        let result = prepare_payment_header_at(
            buyer,
            &requirements(50_000, aggregation_offer(&prior)),
            None,
            later,
        );
        assert!(matches!(result, Err(DeferredClientError::VoucherExpired)));
    }

    #[tokio::test]
    async fn test_aggregation_precondition_order() {
        let signer = buyer_signer();
        let buyer = signer.address();
        let now = UnixTimestamp::from_secs(FROZEN_NOW);
        let voucher = create_new_voucher_at(buyer, &requirements(100_000, new_offer()), now)
            .unwrap();
        let signature = sign_voucher(&signer, &voucher).await.unwrap();
        let prior = SignedVoucher { signature, voucher };

        let mut wrong_seller = requirements(50_000, aggregation_offer(&prior));
        wrong_seller.pay_to = address!("9999999999999999999999999999999999999999").into();
        assert!(matches!(
            aggregate_voucher_at(buyer, &wrong_seller, now + 1),
            Err(DeferredClientError::RecipientMismatch)
        ));

        let mut wrong_asset = requirements(50_000, aggregation_offer(&prior));
        wrong_asset.asset = address!("2222222222222222222222222222222222222222").into();
        assert!(matches!(
            aggregate_voucher_at(buyer, &wrong_asset, now + 1),
            Err(DeferredClientError::AssetMismatch)
        ));

        let mut wrong_network = requirements(50_000, aggregation_offer(&prior));
        wrong_network.network = "base".to_owned();
        assert!(matches!(
            aggregate_voucher_at(buyer, &wrong_network, now + 1),
            Err(DeferredClientError::ChainIdMismatch)
        ));

        // A future-dated prior voucher is rejected.
        let earlier = UnixTimestamp::from_secs(FROZEN_NOW - 10);
        assert!(matches!(
            aggregate_voucher_at(buyer, &requirements(50_000, aggregation_offer(&prior)), earlier),
            Err(DeferredClientError::FutureTimestamp)
        ));

        // A prior voucher signed by somebody else is rejected.
        let stranger = PrivateKeySigner::random();
        assert!(matches!(
            aggregate_voucher_at(
                stranger.address(),
                &requirements(50_000, aggregation_offer(&prior)),
                now + 1
            ),
            Err(DeferredClientError::InvalidPriorSignature)
        ));
    }

    struct StubFacilitator {
        account: Option<EscrowAccountSnapshot>,
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
            Box::pin(async move { Ok(None) })
        }
    }

    fn snapshot(balance: u64, allowance: u64) -> EscrowAccountSnapshot {
        EscrowAccountSnapshot {
            balance: TokenAmount::from(balance),
            asset_allowance: TokenAmount::from(allowance),
            asset_permit_nonce: TokenAmount::from(7u64),
            facilitator_url: None,
        }
    }

    fn usdc_requirements(account: EscrowAccountSnapshot) -> PaymentRequirements {
        let mut requirements = requirements(
            50_000,
            DeferredExtra::New {
                voucher: NewVoucherParams {
                    id: SERIES,
                    escrow: ESCROW.into(),
                },
                account: Some(account),
            },
        );
        requirements.asset = crate::networks::USDC_BASE_SEPOLIA.into();
        requirements
    }

    #[tokio::test]
    async fn test_no_deposit_when_account_missing() {
        let signer = buyer_signer();
        let facilitator = StubFacilitator {
            account: Some(snapshot(0, 0)),
        };
        let requirements = requirements(50_000, new_offer());
        let result = create_payment_extra_payload_at(
            &signer,
            &requirements,
            &[],
            &facilitator,
            UnixTimestamp::from_secs(FROZEN_NOW),
        )
        .await
        .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_no_deposit_when_balance_has_headroom() {
        let signer = buyer_signer();
        // threshold 10_000 + max 50_000 = 60_000 needed.
        let facilitator = StubFacilitator {
            account: Some(snapshot(60_000, 0)),
        };
        let requirements = usdc_requirements(snapshot(60_000, 0));
        let result = create_payment_extra_payload_at(
            &signer,
            &requirements,
            &[],
            &facilitator,
            UnixTimestamp::from_secs(FROZEN_NOW),
        )
        .await
        .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_no_deposit_when_facilitator_unreachable() {
        let signer = buyer_signer();
        let facilitator = StubFacilitator { account: None };
        let requirements = usdc_requirements(snapshot(500, 0));
        let result = create_payment_extra_payload_at(
            &signer,
            &requirements,
            &[],
            &facilitator,
            UnixTimestamp::from_secs(FROZEN_NOW),
        )
        .await
        .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_deposit_with_permit_when_allowance_low() {
        let signer = buyer_signer();
        let facilitator = StubFacilitator {
            account: Some(snapshot(500, 0)),
        };
        let requirements = usdc_requirements(snapshot(500, 0));
        let now = UnixTimestamp::from_secs(FROZEN_NOW);
        let result = create_payment_extra_payload_at(&signer, &requirements, &[], &facilitator, now)
            .await
            .unwrap()
            .unwrap();

        let deposit = &result.deposit_authorization;
        assert_eq!(deposit.amount, TokenAmount::from(1_000_000u64));
        assert_eq!(deposit.expiry.as_secs(), FROZEN_NOW + 2_592_000);
        assert_eq!(Address::from(deposit.buyer), signer.address());

        let permit = result.permit.as_ref().unwrap();
        assert_eq!(permit.value, TokenAmount::from(1_000_000u64));
        assert_eq!(permit.nonce, TokenAmount::from(7u64));
        assert_eq!(permit.deadline, deposit.expiry);
        assert_eq!(Address::from(permit.spender), ESCROW);
        assert_eq!(permit.domain.name, "USD Coin");
        assert_eq!(permit.domain.version, "2");
    }

    #[tokio::test]
    async fn test_deposit_without_permit_when_allowance_covers() {
        let signer = buyer_signer();
        let facilitator = StubFacilitator {
            account: Some(snapshot(500, 2_000_000)),
        };
        let requirements = usdc_requirements(snapshot(500, 2_000_000));
        let result = create_payment_extra_payload_at(
            &signer,
            &requirements,
            &[],
            &facilitator,
            UnixTimestamp::from_secs(FROZEN_NOW),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(result.permit.is_none());
    }

    #[tokio::test]
    async fn test_deposit_nonces_are_unique() {
        let signer = buyer_signer();
        let facilitator = StubFacilitator {
            account: Some(snapshot(500, 2_000_000)),
        };
        let requirements = usdc_requirements(snapshot(500, 2_000_000));
        let now = UnixTimestamp::from_secs(FROZEN_NOW);
        let first = create_payment_extra_payload_at(&signer, &requirements, &[], &facilitator, now)
            .await
            .unwrap()
            .unwrap();
        let second =
            create_payment_extra_payload_at(&signer, &requirements, &[], &facilitator, now)
                .await
                .unwrap()
                .unwrap();
        assert_ne!(
            first.deposit_authorization.nonce,
            second.deposit_authorization.nonce
        );
    }
}
