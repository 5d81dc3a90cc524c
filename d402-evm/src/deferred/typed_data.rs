//! EIP-712 typed-data signing and recovery for the deferred scheme.
//!
//! Five primary types are signed in this scheme:
//!
//! - [`Voucher`] and [`DepositAuthorization`] under the escrow's domain
//!   (`DeferredPaymentEscrow` version `1`)
//! - [`Permit`] (EIP-2612) under the asset contract's domain
//! - [`FlushAuthorization`] / [`FlushAllAuthorization`] under the escrow's
//!   domain, selected by whether the input carries a (seller, asset) pair
//!
//! Field names, orderings, and uint widths are part of the on-chain
//! contract and must not change.

use alloy_primitives::{Address, B256, Bytes, Signature, U256};
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{Eip712Domain, SolStruct, eip712_domain, sol};
use std::sync::Arc;

use super::types as wire;

/// EIP-712 domain name of the deferred payment escrow contract.
pub const ESCROW_DOMAIN_NAME: &str = "DeferredPaymentEscrow";

/// EIP-712 domain version of the deferred payment escrow contract.
pub const ESCROW_DOMAIN_VERSION: &str = "1";

sol! {
    /// EIP-712 struct for a deferred payment voucher.
    ///
    /// Signed under the escrow's domain. The facilitator reconstructs this
    /// struct from the wire voucher to verify the buyer's signature.
    struct Voucher {
        bytes32 id;
        address buyer;
        address seller;
        uint256 valueAggregate;
        address asset;
        uint64 timestamp;
        uint256 nonce;
        address escrow;
        uint256 chainId;
        uint64 expiry;
    }

    /// EIP-712 struct for an EIP-2612 ERC-20 permit.
    ///
    /// Signed under the **asset contract's** domain, with name and version
    /// taken from the permit object.
    struct Permit {
        address owner;
        address spender;
        uint256 value;
        uint256 nonce;
        uint256 deadline;
    }

    /// EIP-712 struct for an escrow deposit authorization.
    struct DepositAuthorization {
        address buyer;
        address seller;
        address asset;
        uint256 amount;
        bytes32 nonce;
        uint64 expiry;
    }

    /// EIP-712 struct for a targeted flush authorization.
    struct FlushAuthorization {
        address buyer;
        address seller;
        address asset;
        bytes32 nonce;
        uint64 expiry;
    }

    /// EIP-712 struct for a flush-all authorization.
    struct FlushAllAuthorization {
        address buyer;
        bytes32 nonce;
        uint64 expiry;
    }
}

impl From<&wire::Voucher> for Voucher {
    fn from(voucher: &wire::Voucher) -> Self {
        Self {
            id: voucher.id,
            buyer: voucher.buyer.into(),
            seller: voucher.seller.into(),
            valueAggregate: voucher.value_aggregate.into(),
            asset: voucher.asset.into(),
            timestamp: voucher.timestamp.as_secs(),
            nonce: U256::from(voucher.nonce.inner()),
            escrow: voucher.escrow.into(),
            chainId: U256::from(voucher.chain_id),
            expiry: voucher.expiry.as_secs(),
        }
    }
}

impl From<&wire::DepositAuthorization> for DepositAuthorization {
    fn from(auth: &wire::DepositAuthorization) -> Self {
        Self {
            buyer: auth.buyer.into(),
            seller: auth.seller.into(),
            asset: auth.asset.into(),
            amount: auth.amount.into(),
            nonce: auth.nonce,
            expiry: auth.expiry.as_secs(),
        }
    }
}

impl From<&wire::Permit> for Permit {
    fn from(permit: &wire::Permit) -> Self {
        Self {
            owner: permit.owner.into(),
            spender: permit.spender.into(),
            value: permit.value.into(),
            nonce: permit.nonce.into(),
            deadline: U256::from(permit.deadline.as_secs()),
        }
    }
}

/// Builds the escrow contract's EIP-712 domain.
#[must_use]
pub fn escrow_domain(chain_id: u64, escrow: Address) -> Eip712Domain {
    eip712_domain! {
        name: ESCROW_DOMAIN_NAME,
        version: ESCROW_DOMAIN_VERSION,
        chain_id: chain_id,
        verifying_contract: escrow,
    }
}

/// Builds an asset contract's EIP-712 domain from permit parameters.
#[must_use]
pub fn permit_domain(domain: &wire::PermitDomain, chain_id: u64, asset: Address) -> Eip712Domain {
    let name = domain.name.clone();
    let version = domain.version.clone();
    eip712_domain! {
        name: name,
        version: version,
        chain_id: chain_id,
        verifying_contract: asset,
    }
}

/// A trait that abstracts typed-data signing, allowing both owned signers
/// and Arc-wrapped signers.
///
/// This is the wallet capability set the deferred scheme needs: an address
/// and the ability to sign a 32-byte EIP-712 digest. Alloy's `Signer`
/// trait is not implemented for `Arc<T>`, but users may want to share
/// signers via `Arc` (especially since `PrivateKeySigner` is not `Clone`).
pub trait SignerLike: Send + Sync {
    /// Returns the address of the signer.
    fn address(&self) -> Address;

    /// Signs the given hash.
    fn sign_hash(
        &self,
        hash: &B256,
    ) -> impl Future<Output = Result<Signature, alloy_signer::Error>> + Send;
}

impl SignerLike for PrivateKeySigner {
    fn address(&self) -> Address {
        Self::address(self)
    }

    async fn sign_hash(&self, hash: &B256) -> Result<Signature, alloy_signer::Error> {
        alloy_signer::Signer::sign_hash(self, hash).await
    }
}

impl<T: SignerLike + Send + Sync> SignerLike for Arc<T> {
    fn address(&self) -> Address {
        (**self).address()
    }

    async fn sign_hash(&self, hash: &B256) -> Result<Signature, alloy_signer::Error> {
        (**self).sign_hash(hash).await
    }
}

/// Errors from producing an EIP-712 signature.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    /// The wallet rejected the signing request.
    #[error("Signing failed: {0}")]
    Signer(String),
    /// The wallet cannot sign EIP-712 typed data.
    #[error("Wallet does not support EIP-712 typed-data signing")]
    UnsupportedWallet,
}

impl From<alloy_signer::Error> for SigningError {
    fn from(e: alloy_signer::Error) -> Self {
        match e {
            alloy_signer::Error::UnsupportedOperation(_) => Self::UnsupportedWallet,
            other => Self::Signer(format!("{other:?}")),
        }
    }
}

/// Errors from parsing or recovering an EIP-712 signature.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    /// The signature is not a 64- or 65-byte EVM signature.
    #[error("Invalid signature encoding")]
    Encoding,
    /// ECDSA recovery failed.
    #[error("Signature recovery failed: {0}")]
    Recovery(String),
}

/// Signs any EIP-712 struct under the given domain.
///
/// # Errors
///
/// Returns [`SigningError`] if the wallet rejects the request.
pub async fn sign_typed<S: SignerLike, T: SolStruct>(
    signer: &S,
    message: &T,
    domain: &Eip712Domain,
) -> Result<Bytes, SigningError> {
    let hash = message.eip712_signing_hash(domain);
    let signature = signer.sign_hash(&hash).await?;
    Ok(signature.as_bytes().into())
}

/// Signs a voucher under its escrow's domain.
///
/// # Errors
///
/// Returns [`SigningError`] if the wallet rejects the request.
pub async fn sign_voucher<S: SignerLike>(
    signer: &S,
    voucher: &wire::Voucher,
) -> Result<Bytes, SigningError> {
    let domain = escrow_domain(voucher.chain_id, voucher.escrow.into());
    let message = Voucher::from(voucher);
    sign_typed(signer, &message, &domain).await
}

/// Parses a raw EVM signature, tolerating both the 65-byte and the
/// 64-byte (ERC-2098 compact) encodings.
///
/// # Errors
///
/// Returns [`SignatureError::Encoding`] for any other length or an
/// unparseable 65-byte body.
pub fn parse_signature(bytes: &Bytes) -> Result<Signature, SignatureError> {
    if bytes.len() == 65 {
        Signature::from_raw(bytes)
            .map(Signature::normalized_s)
            .map_err(|_| SignatureError::Encoding)
    } else if bytes.len() == 64 {
        Ok(Signature::from_erc2098(bytes).normalized_s())
    } else {
        Err(SignatureError::Encoding)
    }
}

/// Recovers the signer of any EIP-712 struct.
///
/// # Errors
///
/// Returns [`SignatureError`] on malformed signatures or failed recovery.
pub fn recover_typed<T: SolStruct>(
    message: &T,
    domain: &Eip712Domain,
    signature: &Bytes,
) -> Result<Address, SignatureError> {
    let signature = parse_signature(signature)?;
    let hash = message.eip712_signing_hash(domain);
    signature
        .recover_address_from_prehash(&hash)
        .map_err(|e| SignatureError::Recovery(e.to_string()))
}

/// Recovers the address that signed a voucher.
///
/// # Errors
///
/// Returns [`SignatureError`] on malformed signatures or failed recovery.
pub fn recover_voucher_signer(
    voucher: &wire::Voucher,
    signature: &Bytes,
) -> Result<Address, SignatureError> {
    let domain = escrow_domain(voucher.chain_id, voucher.escrow.into());
    let message = Voucher::from(voucher);
    recover_typed(&message, &domain, signature)
}

/// Recovers the address that signed a deposit authorization, under the
/// escrow's domain.
///
/// # Errors
///
/// Returns [`SignatureError`] on malformed signatures or failed recovery.
pub fn recover_deposit_authorization_signer(
    auth: &wire::DepositAuthorization,
    chain_id: u64,
    escrow: Address,
) -> Result<Address, SignatureError> {
    let domain = escrow_domain(chain_id, escrow);
    let message = DepositAuthorization::from(auth);
    recover_typed(&message, &domain, &auth.signature)
}

/// Recovers the address that signed an EIP-2612 permit, under the asset's
/// domain.
///
/// # Errors
///
/// Returns [`SignatureError`] on malformed signatures or failed recovery.
pub fn recover_permit_signer(
    permit: &wire::Permit,
    chain_id: u64,
    asset: Address,
) -> Result<Address, SignatureError> {
    let domain = permit_domain(&permit.domain, chain_id, asset);
    let message = Permit::from(permit);
    recover_typed(&message, &domain, &permit.signature)
}

/// Recovers the address that signed a flush authorization.
///
/// The primary type is selected from the authorization's shape: targeted
/// flushes verify as `FlushAuthorization`, flush-alls as
/// `FlushAllAuthorization`.
///
/// # Errors
///
/// Returns [`SignatureError`] on malformed signatures or failed recovery.
pub fn recover_flush_authorization_signer(
    flush: &wire::FlushAuthorization,
    chain_id: u64,
    escrow: Address,
) -> Result<Address, SignatureError> {
    let domain = escrow_domain(chain_id, escrow);
    match flush.target() {
        Some((seller, asset)) => {
            let message = FlushAuthorization {
                buyer: flush.buyer.into(),
                seller: seller.into(),
                asset: asset.into(),
                nonce: flush.nonce,
                expiry: flush.expiry.as_secs(),
            };
            recover_typed(&message, &domain, &flush.signature)
        }
        None => {
            let message = FlushAllAuthorization {
                buyer: flush.buyer.into(),
                nonce: flush.nonce,
                expiry: flush.expiry.as_secs(),
            };
            recover_typed(&message, &domain, &flush.signature)
        }
    }
}

/// Signs a flush authorization, selecting the primary type from the
/// presence of the (seller, asset) pair.
///
/// # Errors
///
/// Returns [`SigningError`] if the wallet rejects the request.
pub async fn sign_flush_authorization<S: SignerLike>(
    signer: &S,
    flush: &wire::FlushAuthorization,
    chain_id: u64,
    escrow: Address,
) -> Result<Bytes, SigningError> {
    let domain = escrow_domain(chain_id, escrow);
    match flush.target() {
        Some((seller, asset)) => {
            let message = FlushAuthorization {
                buyer: flush.buyer.into(),
                seller: seller.into(),
                asset: asset.into(),
                nonce: flush.nonce,
                expiry: flush.expiry.as_secs(),
            };
            sign_typed(signer, &message, &domain).await
        }
        None => {
            let message = FlushAllAuthorization {
                buyer: flush.buyer.into(),
                nonce: flush.nonce,
                expiry: flush.expiry.as_secs(),
            };
            sign_typed(signer, &message, &domain).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::TokenAmount;
    use alloy_primitives::{address, b256};
    use d402::UnixTimestamp;

    fn test_signer() -> PrivateKeySigner {
        "0xcb160425c35458024591e64638d6f7720dac915a0fb035c5964f6d51de0987d9"
            .parse()
            .unwrap()
    }

    fn test_voucher(buyer: Address) -> wire::Voucher {
        wire::Voucher {
            id: b256!("7a3e0000000000000000000000000000000000000000000000000000000004f1"),
            buyer: buyer.into(),
            seller: address!("1234567890123456789012345678901234567890").into(),
            value_aggregate: TokenAmount::from(1_000_000u64),
            asset: address!("1111111111111111111111111111111111111111").into(),
            timestamp: UnixTimestamp::from_secs(1_716_163_200),
            nonce: 0u64.into(),
            escrow: address!("ffffffffffffffffffffffffffffffffffffffff").into(),
            chain_id: 84532,
            expiry: UnixTimestamp::from_secs(1_716_163_200 + 2_592_000),
        }
    }

    #[tokio::test]
    async fn test_voucher_sign_and_recover() {
        let signer = test_signer();
        let voucher = test_voucher(signer.address());
        let signature = sign_voucher(&signer, &voucher).await.unwrap();
        assert_eq!(signature.len(), 65);
        let recovered = recover_voucher_signer(&voucher, &signature).unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[tokio::test]
    async fn test_recover_does_not_match_other_address() {
        let signer = test_signer();
        let other = PrivateKeySigner::random();
        let voucher = test_voucher(signer.address());
        let signature = sign_voucher(&signer, &voucher).await.unwrap();
        let recovered = recover_voucher_signer(&voucher, &signature).unwrap();
        assert_ne!(recovered, other.address());
    }

    #[tokio::test]
    async fn test_signature_is_bound_to_voucher_fields() {
        let signer = test_signer();
        let voucher = test_voucher(signer.address());
        let signature = sign_voucher(&signer, &voucher).await.unwrap();

        let mut tampered = voucher.clone();
        tampered.value_aggregate = TokenAmount::from(2_000_000u64);
        let recovered = recover_voucher_signer(&tampered, &signature).unwrap();
        assert_ne!(recovered, signer.address());
    }

    #[tokio::test]
    async fn test_signature_is_bound_to_domain() {
        let signer = test_signer();
        let voucher = test_voucher(signer.address());
        let signature = sign_voucher(&signer, &voucher).await.unwrap();

        // Same fields, different escrow contract: different domain, so the
        // recovered address must change.
        let mut moved = voucher.clone();
        moved.escrow = address!("eeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee").into();
        let recovered = recover_voucher_signer(&moved, &signature).unwrap();
        assert_ne!(recovered, signer.address());
    }

    #[tokio::test]
    async fn test_compact_signature_recovers() {
        let signer = test_signer();
        let voucher = test_voucher(signer.address());
        let signature = sign_voucher(&signer, &voucher).await.unwrap();
        let parsed = parse_signature(&signature).unwrap();
        // ERC-2098: r || (s with the y-parity bit folded into the top bit).
        let mut compact = [0u8; 64];
        compact[..32].copy_from_slice(&parsed.r().to_be_bytes::<32>());
        let mut y_parity_and_s = parsed.s().to_be_bytes::<32>();
        if parsed.v() {
            y_parity_and_s[0] |= 0x80;
        }
        compact[32..].copy_from_slice(&y_parity_and_s);
        let compact = Bytes::from(compact.to_vec());
        assert_eq!(compact.len(), 64);
        let recovered = recover_voucher_signer(&voucher, &compact).unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[test]
    fn test_rejects_malformed_signature() {
        let voucher = test_voucher(test_signer().address());
        let too_short = Bytes::from(vec![0u8; 10]);
        assert!(matches!(
            recover_voucher_signer(&voucher, &too_short),
            Err(SignatureError::Encoding)
        ));
    }

    #[tokio::test]
    async fn test_flush_primary_type_dispatch() {
        let signer = test_signer();
        let escrow = address!("ffffffffffffffffffffffffffffffffffffffff");
        let targeted = wire::FlushAuthorization {
            buyer: signer.address().into(),
            seller: Some(address!("1234567890123456789012345678901234567890").into()),
            asset: Some(address!("1111111111111111111111111111111111111111").into()),
            nonce: b256!("0000000000000000000000000000000000000000000000000000000000000001"),
            expiry: UnixTimestamp::from_secs(2_000_000_000),
            signature: Bytes::new(),
        };
        let signature = sign_flush_authorization(&signer, &targeted, 84532, escrow)
            .await
            .unwrap();
        let signed = wire::FlushAuthorization {
            signature: signature.clone(),
            ..targeted.clone()
        };
        let recovered = recover_flush_authorization_signer(&signed, 84532, escrow).unwrap();
        assert_eq!(recovered, signer.address());

        // The same signature must not verify under the flush-all primary type.
        let flush_all = wire::FlushAuthorization {
            seller: None,
            asset: None,
            ..signed
        };
        let recovered = recover_flush_authorization_signer(&flush_all, 84532, escrow).unwrap();
        assert_ne!(recovered, signer.address());
    }
}
