//! On-chain settlement writes for the deferred scheme.
//!
//! Three write paths exist: collecting a voucher, depositing with a
//! buyer-signed authorization (optionally preceded by an ERC-20 permit),
//! and flushing a buyer's unencumbered balance. Every write goes through
//! [`Eip155MetaTransactionProvider::send_transaction`], which waits for
//! the receipt — a submitted-but-unobserved transaction is an error,
//! never a success.

use alloy_primitives::{Address, TxHash, U256};
use alloy_sol_types::SolCall;
#[cfg(feature = "telemetry")]
use tracing_core::Level;

use super::contract::IDeferredPaymentEscrow;
use crate::chain::{Eip155MetaTransactionProvider, MetaTransaction, MetaTransactionSendError};
use crate::deferred::error::DeferredErrorReason;
use crate::deferred::typed_data::parse_signature;
use crate::deferred::types::{DepositAuthorizationPayload, FlushAuthorization, Voucher};

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

fn map_send_error(error: MetaTransactionSendError) -> DeferredErrorReason {
    match error {
        // Failed to submit: nothing reached the chain.
        MetaTransactionSendError::Transport(_) => DeferredErrorReason::InvalidTransactionReverted,
        // Submitted but the receipt never confirmed success.
        MetaTransactionSendError::PendingTransaction(_) => {
            DeferredErrorReason::InvalidTransactionState
        }
    }
}

async fn submit<P>(
    provider: &P,
    to: Address,
    calldata: alloy_primitives::Bytes,
) -> Result<alloy_rpc_types_eth::TransactionReceipt, DeferredErrorReason>
where
    P: Eip155MetaTransactionProvider<Error = MetaTransactionSendError> + Sync,
{
    let receipt = provider
        .send_transaction(MetaTransaction {
            to,
            calldata,
            confirmations: 1,
        })
        .await
        .map_err(map_send_error)?;
    if receipt.status() {
        Ok(receipt)
    } else {
        #[cfg(feature = "telemetry")]
        tracing::event!(
            Level::WARN,
            status = "failed",
            tx = %receipt.transaction_hash,
            "settlement transaction reverted on-chain"
        );
        Err(DeferredErrorReason::InvalidTransactionState)
    }
}

/// Submits `collect(voucher, signature)` against the voucher's escrow and
/// returns the transaction hash together with the amount the
/// `VoucherCollected` event reports (0 when no event is present).
///
/// # Errors
///
/// Submission failures map to `invalid_transaction_reverted`; a mined
/// failure or a lost receipt maps to `invalid_transaction_state`.
pub async fn collect_voucher<P>(
    provider: &P,
    voucher: &Voucher,
    signature: &alloy_primitives::Bytes,
) -> Result<(TxHash, U256), DeferredErrorReason>
where
    P: Eip155MetaTransactionProvider<Error = MetaTransactionSendError> + Sync,
{
    let call = IDeferredPaymentEscrow::collectCall {
        voucher: IDeferredPaymentEscrow::Voucher::from(voucher),
        signature: signature.clone(),
    };
    let receipt_fut = submit(provider, voucher.escrow.into(), call.abi_encode().into());
    let receipt = traced!(
        receipt_fut,
        tracing::info_span!("call_collect",
            voucher_id = %voucher.id,
            nonce = %voucher.nonce,
            value_aggregate = %voucher.value_aggregate,
            escrow = %voucher.escrow,
            otel.kind = "client",
        )
    )?;

    let mut collected = U256::ZERO;
    for log in receipt.logs() {
        if let Ok(decoded) = log.log_decode::<IDeferredPaymentEscrow::VoucherCollected>() {
            let event = decoded.inner.data;
            if event.id == voucher.id {
                collected = event.amount;
                break;
            }
        }
    }

    #[cfg(feature = "telemetry")]
    tracing::event!(
        Level::INFO,
        status = "ok",
        tx = %receipt.transaction_hash,
        collected = %collected,
        "collect succeeded"
    );
    Ok((receipt.transaction_hash, collected))
}

/// Tops up the buyer's escrow balance from a signed deposit
/// authorization, submitting the attached ERC-20 permit first when one
/// is present. The two transactions are strictly sequential; `deposit`
/// is only submitted after the permit receipt reports success.
///
/// # Errors
///
/// Uses the same two transaction reason codes as [`collect_voucher`].
pub async fn deposit_with_authorization<P>(
    provider: &P,
    deposit: &DepositAuthorizationPayload,
    escrow: Address,
) -> Result<TxHash, DeferredErrorReason>
where
    P: Eip155MetaTransactionProvider<Error = MetaTransactionSendError> + Sync,
{
    let authorization = &deposit.deposit_authorization;

    if let Some(permit) = &deposit.permit {
        let signature = parse_signature(&permit.signature)
            .map_err(|_| DeferredErrorReason::InvalidDeferredEvmPayloadPermitSignature)?;
        let v = 27 + u8::from(signature.v());
        let call = super::contract::IERC20Permit::permitCall {
            owner: permit.owner.into(),
            spender: permit.spender.into(),
            value: permit.value.into(),
            deadline: U256::from(permit.deadline.as_secs()),
            v,
            r: signature.r().into(),
            s: signature.s().into(),
        };
        let asset: Address = authorization.asset.into();
        let permit_fut = submit(provider, asset, call.abi_encode().into());
        traced!(
            permit_fut,
            tracing::info_span!("call_permit",
                owner = %permit.owner,
                spender = %permit.spender,
                value = %permit.value,
                asset = %authorization.asset,
                otel.kind = "client",
            )
        )?;
    }

    let call = IDeferredPaymentEscrow::depositWithAuthorizationCall {
        authorization: IDeferredPaymentEscrow::DepositAuthorization::from(authorization),
        signature: authorization.signature.clone(),
    };
    let deposit_fut = submit(provider, escrow, call.abi_encode().into());
    let receipt = traced!(
        deposit_fut,
        tracing::info_span!("call_depositWithAuthorization",
            buyer = %authorization.buyer,
            seller = %authorization.seller,
            amount = %authorization.amount,
            escrow = %escrow,
            otel.kind = "client",
        )
    )?;
    Ok(receipt.transaction_hash)
}

/// Submits `flushWithAuthorization` against the escrow, dispatching the
/// overload from the authorization's shape.
///
/// # Errors
///
/// Uses the same two transaction reason codes as [`collect_voucher`].
pub async fn flush_with_authorization<P>(
    provider: &P,
    flush: &FlushAuthorization,
    escrow: Address,
) -> Result<TxHash, DeferredErrorReason>
where
    P: Eip155MetaTransactionProvider<Error = MetaTransactionSendError> + Sync,
{
    let calldata: alloy_primitives::Bytes = match flush.target() {
        Some((seller, asset)) => IDeferredPaymentEscrow::flushWithAuthorization_0Call {
            authorization: IDeferredPaymentEscrow::FlushAuthorization {
                buyer: flush.buyer.into(),
                seller: seller.into(),
                asset: asset.into(),
                nonce: flush.nonce,
                expiry: flush.expiry.as_secs(),
            },
            signature: flush.signature.clone(),
        }
        .abi_encode()
        .into(),
        None => IDeferredPaymentEscrow::flushWithAuthorization_1Call {
            authorization: IDeferredPaymentEscrow::FlushAllAuthorization {
                buyer: flush.buyer.into(),
                nonce: flush.nonce,
                expiry: flush.expiry.as_secs(),
            },
            signature: flush.signature.clone(),
        }
        .abi_encode()
        .into(),
    };

    let flush_fut = submit(provider, escrow, calldata);
    let receipt = traced!(
        flush_fut,
        tracing::info_span!("call_flushWithAuthorization",
            buyer = %flush.buyer,
            escrow = %escrow,
            otel.kind = "client",
        )
    )?;
    Ok(receipt.transaction_hash)
}
