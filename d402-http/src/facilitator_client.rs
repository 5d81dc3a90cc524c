//! A client for a remote deferred x402 facilitator.

use alloy_primitives::{Address, B256};
use d402::facilitator::{BoxFuture, Facilitator, FacilitatorError};
use d402::proto::{self, SettleResponse, SupportedResponse, VerifyResponse};
use d402_evm::deferred::server::{DeferredFacilitatorApi, FacilitatorApiError};
use d402_evm::deferred::store::{CollectionQuery, Pagination, VoucherQuery};
use d402_evm::deferred::types::{
    FlushAuthorization, SignedVoucher, VerifyRequest, VoucherCollection,
};
use http::StatusCode;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Errors that can occur while interacting with a remote facilitator.
#[derive(Debug, thiserror::Error)]
pub enum DeferredFacilitatorClientError {
    /// A request URL could not be constructed.
    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),
    /// The HTTP request failed.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    /// The facilitator answered with an unexpected status code.
    #[error("Unexpected response status {0}")]
    UnexpectedStatus(StatusCode),
}

impl From<DeferredFacilitatorClientError> for FacilitatorApiError {
    fn from(error: DeferredFacilitatorClientError) -> Self {
        match error {
            DeferredFacilitatorClientError::UnexpectedStatus(status) => {
                Self::Status(status.as_u16())
            }
            DeferredFacilitatorClientError::Transport(e) if e.is_decode() => {
                Self::Decode(e.to_string())
            }
            other => Self::Transport(other.to_string()),
        }
    }
}

/// Body of `POST /deferred/vouchers`: a payment payload to verify and
/// store.
pub type StoreVoucherRequest = VerifyRequest;

/// Body of `POST /deferred/buyers/{buyer}/flush`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushRequest {
    /// The buyer-signed flush authorization.
    pub flush_authorization: FlushAuthorization,
    /// The escrow contract to flush from.
    pub escrow: Address,
    /// The chain the escrow lives on.
    pub chain_id: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AccountQuery {
    seller: Address,
    asset: Address,
    escrow: Address,
    chain_id: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    buyer: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seller: Option<Address>,
    latest: bool,
    limit: usize,
    offset: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CollectionsQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<B256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<u64>,
    limit: usize,
    offset: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PageQuery {
    limit: usize,
    offset: usize,
}

/// A client for communicating with a remote deferred facilitator.
///
/// Handles the generic verify/settle/supported endpoints and the
/// `/deferred/*` voucher REST surface via JSON HTTP.
#[derive(Clone, Debug)]
pub struct DeferredFacilitatorClient {
    base_url: Url,
    client: Client,
}

impl DeferredFacilitatorClient {
    /// Creates a client for the facilitator at `base_url`.
    ///
    /// Requests carry no timeout; see [`Self::with_timeout`].
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            client: Client::new(),
        }
    }

    /// Creates a client whose requests time out after `timeout`.
    ///
    /// Use the payment requirements' `maxTimeoutSeconds` here so client
    /// calls never outlive the payment exchange they serve.
    ///
    /// # Errors
    ///
    /// Returns the underlying builder error if the client cannot be
    /// constructed.
    pub fn with_timeout(base_url: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url, client })
    }

    /// Returns the facilitator's base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, DeferredFacilitatorClientError> {
        // Url::join drops the last path segment of a base without a
        // trailing slash, so normalize first.
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        Ok(base.join(path)?)
    }

    async fn expect_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, DeferredFacilitatorClientError> {
        let status = response.status();
        if !status.is_success() {
            return Err(DeferredFacilitatorClientError::UnexpectedStatus(status));
        }
        Ok(response.json::<T>().await?)
    }

    /// `POST /verify` — verifies a payment payload.
    ///
    /// # Errors
    ///
    /// Returns [`DeferredFacilitatorClientError`] on transport or status
    /// failures.
    pub async fn verify(
        &self,
        request: &VerifyRequest,
    ) -> Result<VerifyResponse, DeferredFacilitatorClientError> {
        let url = self.endpoint("verify")?;
        let response = self.client.post(url).json(request).send().await?;
        Self::expect_json(response).await
    }

    /// `POST /settle` — settles a payment payload on-chain.
    ///
    /// # Errors
    ///
    /// Returns [`DeferredFacilitatorClientError`] on transport or status
    /// failures.
    pub async fn settle(
        &self,
        request: &VerifyRequest,
    ) -> Result<SettleResponse, DeferredFacilitatorClientError> {
        let url = self.endpoint("settle")?;
        let response = self.client.post(url).json(request).send().await?;
        Self::expect_json(response).await
    }

    /// `GET /supported` — lists the facilitator's supported payment kinds.
    ///
    /// # Errors
    ///
    /// Returns [`DeferredFacilitatorClientError`] on transport or status
    /// failures.
    pub async fn supported(&self) -> Result<SupportedResponse, DeferredFacilitatorClientError> {
        let url = self.endpoint("supported")?;
        let response = self.client.get(url).send().await?;
        Self::expect_json(response).await
    }

    /// `GET /deferred/vouchers/{id}/{nonce}` — fetches one stored voucher.
    ///
    /// # Errors
    ///
    /// Returns [`DeferredFacilitatorClientError`] on transport or status
    /// failures; a 404 maps to `Ok(None)`.
    pub async fn get_voucher(
        &self,
        id: B256,
        nonce: u64,
    ) -> Result<Option<SignedVoucher>, DeferredFacilitatorClientError> {
        let url = self.endpoint(&format!("deferred/vouchers/{id}/{nonce}"))?;
        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::expect_json(response).await.map(Some)
    }

    /// `GET /deferred/vouchers/{id}` — fetches a voucher series,
    /// nonce-descending.
    ///
    /// # Errors
    ///
    /// Returns [`DeferredFacilitatorClientError`] on transport or status
    /// failures.
    pub async fn get_voucher_series(
        &self,
        id: B256,
        pagination: Pagination,
    ) -> Result<Vec<SignedVoucher>, DeferredFacilitatorClientError> {
        let url = self.endpoint(&format!("deferred/vouchers/{id}"))?;
        let response = self
            .client
            .get(url)
            .query(&PageQuery {
                limit: pagination.limit,
                offset: pagination.offset,
            })
            .send()
            .await?;
        Self::expect_json(response).await
    }

    /// `GET /deferred/vouchers` — lists vouchers by buyer/seller.
    ///
    /// # Errors
    ///
    /// Returns [`DeferredFacilitatorClientError`] on transport or status
    /// failures.
    pub async fn get_vouchers(
        &self,
        query: VoucherQuery,
        pagination: Pagination,
    ) -> Result<Vec<SignedVoucher>, DeferredFacilitatorClientError> {
        let url = self.endpoint("deferred/vouchers")?;
        let response = self
            .client
            .get(url)
            .query(&ListQuery {
                buyer: query.buyer,
                seller: query.seller,
                latest: query.latest,
                limit: pagination.limit,
                offset: pagination.offset,
            })
            .send()
            .await?;
        Self::expect_json(response).await
    }

    /// `GET /deferred/vouchers/available/{buyer}/{seller}` — the voucher a
    /// buyer should aggregate onto, if any. A 404 means "no voucher", not
    /// a failure.
    ///
    /// # Errors
    ///
    /// Returns [`DeferredFacilitatorClientError`] on transport or status
    /// failures.
    pub async fn get_available_voucher(
        &self,
        buyer: Address,
        seller: Address,
    ) -> Result<Option<SignedVoucher>, DeferredFacilitatorClientError> {
        let url = self.endpoint(&format!("deferred/vouchers/available/{buyer}/{seller}"))?;
        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::expect_json(response).await.map(Some)
    }

    /// `POST /deferred/vouchers` — verifies a payment payload and stores
    /// its voucher. The facilitator answers 201 on stored-and-verified.
    ///
    /// # Errors
    ///
    /// Returns [`DeferredFacilitatorClientError`] on transport or status
    /// failures.
    pub async fn store_voucher(
        &self,
        request: &StoreVoucherRequest,
    ) -> Result<VerifyResponse, DeferredFacilitatorClientError> {
        let url = self.endpoint("deferred/vouchers")?;
        let response = self.client.post(url).json(request).send().await?;
        Self::expect_json(response).await
    }

    /// `POST /deferred/vouchers/{id}/{nonce}/verify` — re-verifies a
    /// stored voucher.
    ///
    /// # Errors
    ///
    /// Returns [`DeferredFacilitatorClientError`] on transport or status
    /// failures.
    pub async fn verify_voucher(
        &self,
        id: B256,
        nonce: u64,
    ) -> Result<VerifyResponse, DeferredFacilitatorClientError> {
        let url = self.endpoint(&format!("deferred/vouchers/{id}/{nonce}/verify"))?;
        let response = self.client.post(url).send().await?;
        Self::expect_json(response).await
    }

    /// `POST /deferred/vouchers/{id}/{nonce}/settle` — settles a stored
    /// voucher on-chain.
    ///
    /// # Errors
    ///
    /// Returns [`DeferredFacilitatorClientError`] on transport or status
    /// failures.
    pub async fn settle_voucher(
        &self,
        id: B256,
        nonce: u64,
    ) -> Result<SettleResponse, DeferredFacilitatorClientError> {
        let url = self.endpoint(&format!("deferred/vouchers/{id}/{nonce}/settle"))?;
        let response = self.client.post(url).send().await?;
        Self::expect_json(response).await
    }

    /// `GET /deferred/vouchers/collections` — lists settlement records.
    ///
    /// # Errors
    ///
    /// Returns [`DeferredFacilitatorClientError`] on transport or status
    /// failures.
    pub async fn get_voucher_collections(
        &self,
        query: CollectionQuery,
        pagination: Pagination,
    ) -> Result<Vec<VoucherCollection>, DeferredFacilitatorClientError> {
        let url = self.endpoint("deferred/vouchers/collections")?;
        let response = self
            .client
            .get(url)
            .query(&CollectionsQuery {
                id: query.id,
                nonce: query.nonce,
                limit: pagination.limit,
                offset: pagination.offset,
            })
            .send()
            .await?;
        Self::expect_json(response).await
    }

    /// `GET /deferred/buyers/{buyer}/account` — the buyer's escrow
    /// account snapshot for one (seller, asset, escrow, chain) scope.
    ///
    /// # Errors
    ///
    /// Returns [`DeferredFacilitatorClientError`] on transport or status
    /// failures.
    pub async fn get_buyer_account(
        &self,
        buyer: Address,
        seller: Address,
        asset: Address,
        escrow: Address,
        chain_id: u64,
    ) -> Result<d402_evm::deferred::types::EscrowAccountSnapshot, DeferredFacilitatorClientError>
    {
        let url = self.endpoint(&format!("deferred/buyers/{buyer}/account"))?;
        let response = self
            .client
            .get(url)
            .query(&AccountQuery {
                seller,
                asset,
                escrow,
                chain_id,
            })
            .send()
            .await?;
        Self::expect_json(response).await
    }

    /// `POST /deferred/buyers/{buyer}/flush` — submits a flush
    /// authorization.
    ///
    /// # Errors
    ///
    /// Returns [`DeferredFacilitatorClientError`] on transport or status
    /// failures.
    pub async fn flush(
        &self,
        buyer: Address,
        request: &FlushRequest,
    ) -> Result<SettleResponse, DeferredFacilitatorClientError> {
        let url = self.endpoint(&format!("deferred/buyers/{buyer}/flush"))?;
        let response = self.client.post(url).json(request).send().await?;
        Self::expect_json(response).await
    }
}

impl Facilitator for DeferredFacilitatorClient {
    fn verify(
        &self,
        request: proto::VerifyRequest,
    ) -> BoxFuture<'_, Result<proto::VerifyResponse, FacilitatorError>> {
        Box::pin(async move {
            let request = VerifyRequest::from_proto(request)?;
            Self::verify(self, &request)
                .await
                .map_err(|e| FacilitatorError::Other(Box::new(e)))
        })
    }

    fn settle(
        &self,
        request: proto::SettleRequest,
    ) -> BoxFuture<'_, Result<proto::SettleResponse, FacilitatorError>> {
        Box::pin(async move {
            let request = VerifyRequest::from_settle(request)?;
            Self::settle(self, &request)
                .await
                .map_err(|e| FacilitatorError::Other(Box::new(e)))
        })
    }

    fn supported(&self) -> BoxFuture<'_, Result<proto::SupportedResponse, FacilitatorError>> {
        Box::pin(async move {
            Self::supported(self)
                .await
                .map_err(|e| FacilitatorError::Other(Box::new(e)))
        })
    }
}

impl DeferredFacilitatorApi for DeferredFacilitatorClient {
    fn buyer_account(
        &self,
        buyer: Address,
        seller: Address,
        asset: Address,
        escrow: Address,
        chain_id: u64,
    ) -> BoxFuture<'_, Result<d402_evm::deferred::types::EscrowAccountSnapshot, FacilitatorApiError>>
    {
        Box::pin(async move {
            self.get_buyer_account(buyer, seller, asset, escrow, chain_id)
                .await
                .map_err(Into::into)
        })
    }

    fn available_voucher(
        &self,
        buyer: Address,
        seller: Address,
    ) -> BoxFuture<'_, Result<Option<SignedVoucher>, FacilitatorApiError>> {
        Box::pin(async move {
            self.get_available_voucher(buyer, seller)
                .await
                .map_err(Into::into)
        })
    }
}
