//! Facilitator-side verification and settlement for the deferred scheme.
//!
//! [`DeferredEvmFacilitator`] orchestrates the verifier ([`verify`]), the
//! on-chain writes ([`settle`]), and a [`VoucherStore`]. Verification
//! failures surface as reason codes inside `VerifyResponse` /
//! `SettleResponse` envelopes; only malformed request bodies are errors.

pub mod contract;
pub mod settle;
pub mod verify;

pub use contract::{IDeferredPaymentEscrow, IERC20Permit};

use alloy_primitives::{Address, Bytes, TxHash, U256};
use alloy_provider::Provider;
use d402::facilitator::{BoxFuture, Facilitator, FacilitatorError};
use d402::proto::{self, SupportedPaymentKind};
use d402::scheme::DeferredScheme;
use d402::{SettleResponse, UnixTimestamp, VerifyResponse};
use std::collections::HashMap;
use std::sync::Arc;

use super::ACCOUNT_DETAILS_VOUCHER_LIMIT;
use super::error::DeferredErrorReason;
use super::store::{Pagination, VoucherQuery, VoucherStore, VoucherStoreError};
use super::types::{
    self, DepositAuthorizationPayload, EscrowAccountSnapshot, FlushAuthorization, PaymentPayload,
    PaymentRequirements, SignedVoucher, Voucher,
};
use crate::chain::{Eip155MetaTransactionProvider, MetaTransactionSendError};

/// Facilitator for deferred payments on one EVM chain.
///
/// Holds the chain provider used for reads and settlement writes, plus
/// the voucher store shared with the REST surface.
pub struct DeferredEvmFacilitator<P> {
    provider: P,
    store: Arc<dyn VoucherStore>,
}

impl<P> std::fmt::Debug for DeferredEvmFacilitator<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredEvmFacilitator")
            .finish_non_exhaustive()
    }
}

impl<P> DeferredEvmFacilitator<P> {
    /// Creates a facilitator over a chain provider and a voucher store.
    pub fn new(provider: P, store: Arc<dyn VoucherStore>) -> Self {
        Self { provider, store }
    }

    /// Returns the voucher store this facilitator records into.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn VoucherStore> {
        &self.store
    }
}

impl<P> DeferredEvmFacilitator<P>
where
    P: Eip155MetaTransactionProvider<Error = MetaTransactionSendError> + Send + Sync,
    P::Inner: Provider,
{
    /// Runs the verification pipeline and returns the payer on success.
    ///
    /// Order: requirements equivalence, voucher continuity, voucher
    /// signature, prior-voucher availability (aggregations only), then
    /// on-chain state. The first failure short-circuits.
    async fn check(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
        extra: &types::DeferredExtra,
    ) -> Result<Address, DeferredErrorReason> {
        verify::verify_payment_requirements(payload, requirements, extra)?;
        let voucher = &payload.payload.voucher;
        verify::verify_voucher_continuity(voucher, extra, UnixTimestamp::now())?;
        let payer = verify::verify_voucher_signature(voucher, &payload.payload.signature)?;
        if let Some(prior) = extra.prior_voucher() {
            verify::verify_voucher_availability(self.store.as_ref(), &prior).await?;
        }
        verify::verify_onchain_state(self.provider.inner(), self.provider.chain(), voucher)
            .await?;
        Ok(payer)
    }

    fn require_extra<'a>(
        requirements: &'a PaymentRequirements,
    ) -> Result<&'a types::DeferredExtra, FacilitatorError> {
        requirements.extra.as_ref().ok_or_else(|| {
            FacilitatorError::InvalidFormat(
                "payment requirements carry no deferred extra data".into(),
            )
        })
    }

    /// Verifies a typed deferred payment.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorError::InvalidFormat`] when the requirements
    /// carry no deferred extra; verification failures come back as
    /// [`VerifyResponse::Invalid`].
    pub async fn verify_payment(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, FacilitatorError> {
        let extra = Self::require_extra(requirements)?;
        let response = match self.check(payload, requirements, extra).await {
            Ok(payer) => VerifyResponse::valid(payer.to_string()),
            Err(reason) => VerifyResponse::invalid(
                Some(payload.payload.voucher.buyer.to_string()),
                reason.to_string(),
            ),
        };
        Ok(response)
    }

    /// Settles a typed deferred payment: re-verifies, requires the
    /// voucher to be committed to the store, and collects on-chain.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorError::InvalidFormat`] when the requirements
    /// carry no deferred extra; settlement failures come back as
    /// [`SettleResponse::Error`].
    pub async fn settle_payment(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, FacilitatorError> {
        let extra = Self::require_extra(requirements)?;
        let network = payload.network.clone();
        let payer = payload.payload.voucher.buyer.to_string();
        let failure = |reason: DeferredErrorReason| SettleResponse::Error {
            reason: reason.to_string(),
            payer: Some(payer.clone()),
            network: network.clone(),
        };

        if let Err(reason) = self.check(payload, requirements, extra).await {
            return Ok(failure(reason));
        }

        // Settlement only accepts vouchers the store has committed to.
        let voucher = &payload.payload.voucher;
        let stored = match self
            .store
            .get_voucher(voucher.id, Some(voucher.nonce.inner()))
            .await
        {
            Ok(Some(stored)) => stored,
            Ok(None) | Err(_) => {
                return Ok(failure(
                    DeferredErrorReason::InvalidDeferredEvmPayloadVoucherNotFound,
                ));
            }
        };

        let deposit = payload.payload.deposit_authorization.as_ref();
        match self
            .settle_voucher(&stored.voucher, &stored.signature, deposit)
            .await
        {
            Ok((tx_hash, _collected)) => Ok(SettleResponse::Success {
                payer,
                transaction: tx_hash.to_string(),
                network,
            }),
            Err(reason) => Ok(failure(reason)),
        }
    }

    /// Settles one stored voucher on-chain, optionally preceded by a
    /// deposit authorization, and records the resulting collection.
    ///
    /// # Errors
    ///
    /// Returns the first failing [`DeferredErrorReason`].
    pub async fn settle_voucher(
        &self,
        voucher: &Voucher,
        signature: &Bytes,
        deposit: Option<&DepositAuthorizationPayload>,
    ) -> Result<(TxHash, U256), DeferredErrorReason> {
        let claimed = SignedVoucher {
            signature: signature.clone(),
            voucher: voucher.clone(),
        };
        verify::verify_voucher_availability(self.store.as_ref(), &claimed).await?;
        verify::verify_voucher_signature(voucher, signature)?;
        verify::verify_onchain_state(self.provider.inner(), self.provider.chain(), voucher)
            .await?;

        if let Some(deposit) = deposit {
            verify::verify_deposit_authorization(deposit, voucher, UnixTimestamp::now())?;
            self.assert_deposit_nonce_unused(voucher, deposit).await?;
            settle::deposit_with_authorization(&self.provider, deposit, voucher.escrow.into())
                .await?;
        }

        let (tx_hash, collected) =
            settle::collect_voucher(&self.provider, voucher, signature).await?;

        match self
            .store
            .settle_voucher(voucher.clone(), tx_hash, collected)
            .await
        {
            Ok(()) => Ok((tx_hash, collected)),
            Err(VoucherStoreError::AlreadyExists) => {
                Err(DeferredErrorReason::InvalidDeferredEvmPayloadVoucherCouldNotSettleStore)
            }
            Err(VoucherStoreError::Backend(_)) => {
                Err(DeferredErrorReason::InvalidDeferredEvmPayloadVoucherErrorSettlingStore)
            }
        }
    }

    /// Re-verifies a voucher the store already holds: signature and
    /// on-chain state, keyed by `(id, nonce)`.
    ///
    /// # Errors
    ///
    /// Returns the first failing [`DeferredErrorReason`];
    /// `…voucher_not_found` when the store has no such voucher.
    pub async fn verify_stored_voucher(
        &self,
        id: alloy_primitives::B256,
        nonce: u64,
    ) -> Result<Address, DeferredErrorReason> {
        let stored = self
            .store
            .get_voucher(id, Some(nonce))
            .await
            .map_err(|_| DeferredErrorReason::InvalidDeferredEvmPayloadVoucherNotFound)?
            .ok_or(DeferredErrorReason::InvalidDeferredEvmPayloadVoucherNotFound)?;
        let payer = verify::verify_voucher_signature(&stored.voucher, &stored.signature)?;
        verify::verify_onchain_state(
            self.provider.inner(),
            self.provider.chain(),
            &stored.voucher,
        )
        .await?;
        Ok(payer)
    }

    /// Settles a voucher the store already holds, keyed by `(id, nonce)`.
    ///
    /// # Errors
    ///
    /// Returns the first failing [`DeferredErrorReason`];
    /// `…voucher_not_found` when the store has no such voucher.
    pub async fn settle_stored_voucher(
        &self,
        id: alloy_primitives::B256,
        nonce: u64,
    ) -> Result<(TxHash, U256), DeferredErrorReason> {
        let stored = self
            .store
            .get_voucher(id, Some(nonce))
            .await
            .map_err(|_| DeferredErrorReason::InvalidDeferredEvmPayloadVoucherNotFound)?
            .ok_or(DeferredErrorReason::InvalidDeferredEvmPayloadVoucherNotFound)?;
        self.settle_voucher(&stored.voucher, &stored.signature, None)
            .await
    }

    async fn assert_deposit_nonce_unused(
        &self,
        voucher: &Voucher,
        deposit: &DepositAuthorizationPayload,
    ) -> Result<(), DeferredErrorReason> {
        let escrow = IDeferredPaymentEscrow::new(voucher.escrow.into(), self.provider.inner());
        let data = escrow
            .getVerificationData(
                IDeferredPaymentEscrow::Voucher::from(voucher),
                deposit.deposit_authorization.nonce,
            )
            .call()
            .await
            .map_err(|_| DeferredErrorReason::InsufficientFundsContractCallFailed)?;
        if data.isDepositNonceUsed {
            return Err(DeferredErrorReason::InvalidDeferredEvmPayloadDepositNonceUsed);
        }
        Ok(())
    }

    /// Computes the buyer's escrow account details, passing the stored
    /// outstanding vouchers (up to 1,000 per-series tips) alongside the
    /// query so the escrow can net them out of the balance.
    ///
    /// # Errors
    ///
    /// Returns the first failing [`DeferredErrorReason`].
    pub async fn get_escrow_account_details(
        &self,
        buyer: Address,
        seller: Address,
        asset: Address,
        escrow: Address,
        chain_id: u64,
    ) -> Result<EscrowAccountSnapshot, DeferredErrorReason> {
        if self.provider.chain().inner() != chain_id {
            return Err(DeferredErrorReason::InvalidClientNetwork);
        }
        let vouchers = self
            .store
            .get_vouchers(
                VoucherQuery {
                    buyer: Some(buyer),
                    seller: Some(seller),
                    latest: true,
                },
                Pagination {
                    limit: ACCOUNT_DETAILS_VOUCHER_LIMIT,
                    offset: 0,
                },
            )
            .await
            .map_err(|_| {
                DeferredErrorReason::InvalidDeferredEvmContractCallFailedAccountDetails
            })?;

        let ids: Vec<_> = vouchers.iter().map(|v| v.voucher.id).collect();
        let values: Vec<U256> = vouchers
            .iter()
            .map(|v| v.voucher.value_aggregate.into())
            .collect();

        let contract = IDeferredPaymentEscrow::new(escrow, self.provider.inner());
        let details = contract
            .getAccountDetails(buyer, seller, asset, ids, values)
            .call()
            .await
            .map_err(|_| {
                DeferredErrorReason::InvalidDeferredEvmContractCallFailedAccountDetails
            })?;

        Ok(EscrowAccountSnapshot {
            balance: details.balance.into(),
            asset_allowance: details.allowance.into(),
            asset_permit_nonce: details.nonce.into(),
            facilitator_url: None,
        })
    }

    /// Verifies and submits a flush authorization against the escrow.
    ///
    /// # Errors
    ///
    /// Returns the first failing [`DeferredErrorReason`].
    pub async fn flush_with_authorization(
        &self,
        flush: &FlushAuthorization,
        escrow: Address,
        chain_id: u64,
    ) -> Result<TxHash, DeferredErrorReason> {
        if self.provider.chain().inner() != chain_id {
            return Err(DeferredErrorReason::InvalidClientNetwork);
        }
        verify::verify_flush_authorization(
            flush,
            flush.buyer.into(),
            chain_id,
            escrow,
            UnixTimestamp::now(),
        )?;
        settle::flush_with_authorization(&self.provider, flush, escrow).await
    }
}

impl<P> Facilitator for DeferredEvmFacilitator<P>
where
    P: Eip155MetaTransactionProvider<Error = MetaTransactionSendError> + Send + Sync,
    P::Inner: Provider,
{
    fn verify(
        &self,
        request: proto::VerifyRequest,
    ) -> BoxFuture<'_, Result<proto::VerifyResponse, FacilitatorError>> {
        Box::pin(async move {
            let request = types::VerifyRequest::from_proto(request)?;
            self.verify_payment(&request.payment_payload, &request.payment_requirements)
                .await
        })
    }

    fn settle(
        &self,
        request: proto::SettleRequest,
    ) -> BoxFuture<'_, Result<proto::SettleResponse, FacilitatorError>> {
        Box::pin(async move {
            let request = types::SettleRequest::from_settle(request)?;
            self.settle_payment(&request.payment_payload, &request.payment_requirements)
                .await
        })
    }

    fn supported(&self) -> BoxFuture<'_, Result<proto::SupportedResponse, FacilitatorError>> {
        Box::pin(async move {
            let chain = self.provider.chain();
            let mut kinds = Vec::with_capacity(1);
            let mut signers = HashMap::with_capacity(1);
            if let Some(network) = chain.network_name() {
                kinds.push(SupportedPaymentKind {
                    x402_version: 1,
                    scheme: DeferredScheme::NAME.to_owned(),
                    network: network.to_owned(),
                    extra: None,
                });
                signers.insert(
                    network.to_owned(),
                    self.provider
                        .signer_addresses()
                        .iter()
                        .map(ToString::to_string)
                        .collect(),
                );
            }
            Ok(proto::SupportedResponse { kinds, signers })
        })
    }
}
