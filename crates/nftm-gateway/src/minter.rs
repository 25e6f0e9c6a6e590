//! Client for the NFT minting service.
//!
//! `POST {minter_url}/mint` hands the minter a [`MintRequest`]. Any 2xx is
//! acceptance; the minter writes its mint and transfer records into the
//! market's store on its own schedule, so no result payload is read.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use nftm_core::{Address, AssetId, ListingId, ProductId};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::retry::{self, Delivery};

/// Everything the minter needs to issue an edition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintRequest {
    pub asset_ref: AssetId,
    pub product_ref: ProductId,
    pub issued_to_address: Address,
    pub issue_count: i64,
    pub market_listing_id: ListingId,
}

/// Hand-off of a mint request.
#[async_trait]
pub trait MintTransport: Send + Sync {
    async fn mint(&self, request: &MintRequest) -> Result<(), GatewayError>;
}

/// HTTP client for the minting service.
#[derive(Debug, Clone)]
pub struct MintClient {
    http: reqwest::Client,
    base_url: url::Url,
}

impl MintClient {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Http {
                endpoint: "client_init".into(),
                source: e,
            })?;
        Ok(Self {
            http,
            base_url: config.minter_url.clone(),
        })
    }
}

#[async_trait]
impl MintTransport for MintClient {
    async fn mint(&self, request: &MintRequest) -> Result<(), GatewayError> {
        let endpoint = "POST /mint";
        let url = format!("{}mint", self.base_url);

        let resp = retry::send(endpoint, Delivery::AtMostOnce, || self.http.post(&url).json(request).send())
            .await
            .map_err(|e| GatewayError::Http {
                endpoint: endpoint.into(),
                source: e,
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::ApiError {
                endpoint: endpoint.into(),
                status,
                body,
            });
        }

        tracing::info!(
            listing_id = %request.market_listing_id,
            issue_count = request.issue_count,
            "mint request accepted"
        );
        Ok(())
    }
}
