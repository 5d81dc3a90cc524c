//! Voucher persistence contract and the in-memory reference store.
//!
//! Every other component consumes vouchers through [`VoucherStore`]. The
//! semantics that matter:
//!
//! - A voucher is keyed by `(id, nonce)`; all vouchers sharing an `id`
//!   form a series, and the highest nonce is the series *tip*.
//! - The voucher *available* to a (buyer, seller) pair is the per-series
//!   tip with the greatest timestamp.
//! - `store_voucher` is atomic and rejects an already-present key.
//! - `settle_voucher` appends a [`VoucherCollection`] record; readers
//!   either see the new collection or not, never a torn read.
//!
//! [`MemoryVoucherStore`] is a list-of-records implementation intended for
//! tests and the reference facilitator binary, not for production use.

use alloy_primitives::{Address, B256, TxHash, U256};
use d402::facilitator::BoxFuture;
use d402::UnixTimestamp;
use std::sync::Mutex;

use super::types::{SignedVoucher, Voucher, VoucherCollection};
use crate::chain::TokenAmount;

/// Page bounds for store queries.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    /// Maximum number of records to return.
    pub limit: usize,
    /// Number of records to skip.
    pub offset: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
        }
    }
}

/// Filter for [`VoucherStore::get_vouchers`].
#[derive(Debug, Clone, Copy, Default)]
pub struct VoucherQuery {
    /// Restrict to vouchers with this buyer.
    pub buyer: Option<Address>,
    /// Restrict to vouchers with this seller.
    pub seller: Option<Address>,
    /// Return only the tip of each matching series.
    pub latest: bool,
}

/// Filter for [`VoucherStore::get_voucher_collections`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectionQuery {
    /// Restrict to collections of this series.
    pub id: Option<B256>,
    /// Restrict to collections of this voucher nonce.
    pub nonce: Option<u64>,
}

/// Errors returned by voucher store implementations.
#[derive(Debug, thiserror::Error)]
pub enum VoucherStoreError {
    /// A voucher with the same `(id, nonce)` is already stored.
    #[error("Voucher already exists")]
    AlreadyExists,
    /// The backing storage failed.
    #[error("Voucher store failure: {0}")]
    Backend(String),
}

/// Abstract persistent store for signed vouchers and their settlement
/// records.
///
/// Implementations must serialize concurrent settlement attempts of the
/// same `(id, nonce)`; the duplicate check in voucher availability
/// verification is only meaningful under that guarantee.
pub trait VoucherStore: Send + Sync {
    /// Returns the voucher stored under `(id, nonce)`, or the tip of the
    /// series when `nonce` is `None`.
    fn get_voucher(
        &self,
        id: B256,
        nonce: Option<u64>,
    ) -> BoxFuture<'_, Result<Option<SignedVoucher>, VoucherStoreError>>;

    /// Returns the vouchers of a series, sorted by nonce descending.
    fn get_voucher_series(
        &self,
        id: B256,
        pagination: Pagination,
    ) -> BoxFuture<'_, Result<Vec<SignedVoucher>, VoucherStoreError>>;

    /// Returns vouchers matching the query, sorted by nonce descending
    /// then timestamp descending. With `latest` set, at most one voucher
    /// per series is returned (the tip).
    fn get_vouchers(
        &self,
        query: VoucherQuery,
        pagination: Pagination,
    ) -> BoxFuture<'_, Result<Vec<SignedVoucher>, VoucherStoreError>>;

    /// Returns the voucher available for aggregation between a buyer and
    /// a seller: among the tips of all series matching the pair, the one
    /// with the greatest timestamp.
    fn get_available_voucher(
        &self,
        buyer: Address,
        seller: Address,
    ) -> BoxFuture<'_, Result<Option<SignedVoucher>, VoucherStoreError>>;

    /// Stores a signed voucher. Fails with
    /// [`VoucherStoreError::AlreadyExists`] if `(id, nonce)` is present.
    fn store_voucher(
        &self,
        voucher: SignedVoucher,
    ) -> BoxFuture<'_, Result<(), VoucherStoreError>>;

    /// Records an on-chain collection of a voucher.
    fn settle_voucher(
        &self,
        voucher: Voucher,
        tx_hash: TxHash,
        collected_amount: U256,
    ) -> BoxFuture<'_, Result<(), VoucherStoreError>>;

    /// Returns settlement records matching the query, newest first.
    fn get_voucher_collections(
        &self,
        query: CollectionQuery,
        pagination: Pagination,
    ) -> BoxFuture<'_, Result<Vec<VoucherCollection>, VoucherStoreError>>;
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    vouchers: Vec<SignedVoucher>,
    collections: Vec<VoucherCollection>,
}

/// In-memory list-of-records voucher store.
///
/// Intended for tests and single-process reference deployments. All
/// operations take one lock, which gives the atomicity the contract
/// requires.
#[derive(Debug, Default)]
pub struct MemoryVoucherStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryVoucherStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryStoreInner> {
        // A poisoned lock means a panic mid-mutation; propagating the
        // panic is the only sound option for an in-memory fixture.
        self.inner.lock().expect("voucher store lock poisoned")
    }
}

fn sort_nonce_desc_then_timestamp_desc(vouchers: &mut [SignedVoucher]) {
    vouchers.sort_by(|a, b| {
        b.voucher
            .nonce
            .cmp(&a.voucher.nonce)
            .then(b.voucher.timestamp.cmp(&a.voucher.timestamp))
    });
}

fn series_tips(vouchers: Vec<SignedVoucher>) -> Vec<SignedVoucher> {
    let mut tips: Vec<SignedVoucher> = Vec::new();
    for candidate in vouchers {
        match tips
            .iter_mut()
            .find(|tip| tip.voucher.id == candidate.voucher.id)
        {
            Some(tip) => {
                if candidate.voucher.nonce > tip.voucher.nonce {
                    *tip = candidate;
                }
            }
            None => tips.push(candidate),
        }
    }
    tips
}

fn paginate<T>(records: Vec<T>, pagination: Pagination) -> Vec<T> {
    records
        .into_iter()
        .skip(pagination.offset)
        .take(pagination.limit)
        .collect()
}

impl VoucherStore for MemoryVoucherStore {
    fn get_voucher(
        &self,
        id: B256,
        nonce: Option<u64>,
    ) -> BoxFuture<'_, Result<Option<SignedVoucher>, VoucherStoreError>> {
        Box::pin(async move {
            let inner = self.lock();
            let found = match nonce {
                Some(nonce) => inner
                    .vouchers
                    .iter()
                    .find(|v| v.voucher.id == id && v.voucher.nonce.inner() == nonce),
                None => inner
                    .vouchers
                    .iter()
                    .filter(|v| v.voucher.id == id)
                    .max_by_key(|v| v.voucher.nonce),
            };
            Ok(found.cloned())
        })
    }

    fn get_voucher_series(
        &self,
        id: B256,
        pagination: Pagination,
    ) -> BoxFuture<'_, Result<Vec<SignedVoucher>, VoucherStoreError>> {
        Box::pin(async move {
            let inner = self.lock();
            let mut series: Vec<SignedVoucher> = inner
                .vouchers
                .iter()
                .filter(|v| v.voucher.id == id)
                .cloned()
                .collect();
            drop(inner);
            series.sort_by(|a, b| b.voucher.nonce.cmp(&a.voucher.nonce));
            Ok(paginate(series, pagination))
        })
    }

    fn get_vouchers(
        &self,
        query: VoucherQuery,
        pagination: Pagination,
    ) -> BoxFuture<'_, Result<Vec<SignedVoucher>, VoucherStoreError>> {
        Box::pin(async move {
            let inner = self.lock();
            let matches: Vec<SignedVoucher> = inner
                .vouchers
                .iter()
                .filter(|v| {
                    query.buyer.is_none_or(|buyer| v.voucher.buyer.0 == buyer)
                        && query.seller.is_none_or(|seller| v.voucher.seller.0 == seller)
                })
                .cloned()
                .collect();
            drop(inner);
            let mut matches = if query.latest {
                series_tips(matches)
            } else {
                matches
            };
            sort_nonce_desc_then_timestamp_desc(&mut matches);
            Ok(paginate(matches, pagination))
        })
    }

    fn get_available_voucher(
        &self,
        buyer: Address,
        seller: Address,
    ) -> BoxFuture<'_, Result<Option<SignedVoucher>, VoucherStoreError>> {
        Box::pin(async move {
            let inner = self.lock();
            let matches: Vec<SignedVoucher> = inner
                .vouchers
                .iter()
                .filter(|v| v.voucher.buyer.0 == buyer && v.voucher.seller.0 == seller)
                .cloned()
                .collect();
            drop(inner);
            let tips = series_tips(matches);
            Ok(tips
                .into_iter()
                .max_by_key(|v| (v.voucher.timestamp, v.voucher.nonce)))
        })
    }

    fn store_voucher(
        &self,
        voucher: SignedVoucher,
    ) -> BoxFuture<'_, Result<(), VoucherStoreError>> {
        Box::pin(async move {
            let mut inner = self.lock();
            let exists = inner.vouchers.iter().any(|v| {
                v.voucher.id == voucher.voucher.id && v.voucher.nonce == voucher.voucher.nonce
            });
            if exists {
                return Err(VoucherStoreError::AlreadyExists);
            }
            inner.vouchers.push(voucher);
            Ok(())
        })
    }

    fn settle_voucher(
        &self,
        voucher: Voucher,
        tx_hash: TxHash,
        collected_amount: U256,
    ) -> BoxFuture<'_, Result<(), VoucherStoreError>> {
        Box::pin(async move {
            let collection = VoucherCollection {
                voucher_id: voucher.id,
                voucher_nonce: voucher.nonce,
                transaction_hash: tx_hash,
                collected_amount: TokenAmount(collected_amount),
                asset: voucher.asset,
                chain_id: voucher.chain_id,
                collected_at: UnixTimestamp::now(),
            };
            let mut inner = self.lock();
            inner.collections.push(collection);
            Ok(())
        })
    }

    fn get_voucher_collections(
        &self,
        query: CollectionQuery,
        pagination: Pagination,
    ) -> BoxFuture<'_, Result<Vec<VoucherCollection>, VoucherStoreError>> {
        Box::pin(async move {
            let inner = self.lock();
            let mut matches: Vec<VoucherCollection> = inner
                .collections
                .iter()
                .filter(|c| {
                    query.id.is_none_or(|id| c.voucher_id == id)
                        && query.nonce.is_none_or(|nonce| c.voucher_nonce.inner() == nonce)
                })
                .cloned()
                .collect();
            drop(inner);
            matches.sort_by(|a, b| b.collected_at.cmp(&a.collected_at));
            Ok(paginate(matches, pagination))
        })
    }
}
