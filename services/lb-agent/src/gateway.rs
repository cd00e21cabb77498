//! Signing Gateway Client
//!
//! HTTP client for the local gateway that owns the RPC connection, keys and
//! contract ABI encoding. The agent only speaks JSON to it.

use reqwest::{Client, RequestBuilder, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::amount::raw_string;
use crate::client::LbClient;
use crate::error::{AgentError, Result};
use crate::types::{BinId, BinLiquidity, Confirmation, TokenBalances, Transaction};

/// Client for one pool/owner pair behind the signing gateway
pub struct GatewayClient {
    client: Client,
    base_url: String,
    pool: String,
    owner: String,
    api_key: Option<String>,
    max_batch_size: usize,
}

impl GatewayClient {
    /// Create new gateway client; `timeout` bounds every request including
    /// the wait for confirmation on submit
    pub fn new(
        base_url: &str,
        pool: &str,
        owner: &str,
        api_key: Option<String>,
        timeout: Duration,
        max_batch_size: usize,
    ) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        info!(
            "Gateway client initialized: url={}, pool={}, owner={}",
            base_url, pool, owner
        );

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            pool: pool.to_string(),
            owner: owner.to_string(),
            api_key,
            max_batch_size: max_batch_size.max(1),
        })
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.authorized(self.client.get(&url)).send().await?;
        Self::decode(response, &url).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response, url: &str) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            response
                .json::<T>()
                .await
                .map_err(|e| AgentError::invariant(format!("malformed response from {}: {}", url, e)))
        } else {
            let text = response.text().await.unwrap_or_default();
            if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                Err(AgentError::Transient(format!("{} - {}", status, text)))
            } else {
                Err(AgentError::invariant(format!("{} from {}: {}", status, url, text)))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ActiveBinResponse {
    active_bin: BinId,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: Decimal,
}

#[derive(Debug, Deserialize)]
struct PositionResponse {
    bins: Vec<BinLiquidity>,
}

#[derive(Debug, Deserialize)]
struct NativeBalanceResponse {
    #[serde(with = "raw_string")]
    balance: u128,
}

#[derive(Debug, Deserialize)]
struct EstimateResponse {
    #[serde(with = "raw_string")]
    gas: u128,
}

#[derive(Debug, Serialize)]
struct TransactionRequest<'a> {
    pool: &'a str,
    owner: &'a str,
    #[serde(flatten)]
    tx: &'a Transaction,
}

#[derive(Debug, Deserialize)]
struct RejectionResponse {
    #[serde(default)]
    step: usize,
    reason: String,
}

#[async_trait::async_trait]
impl LbClient for GatewayClient {
    async fn active_bin(&self) -> Result<BinId> {
        let resp: ActiveBinResponse = self
            .get_json(&format!("/v1/pools/{}/active-bin", self.pool))
            .await?;
        Ok(resp.active_bin)
    }

    async fn bin_price(&self, bin: BinId) -> Result<Decimal> {
        let resp: PriceResponse = self
            .get_json(&format!("/v1/pools/{}/bins/{}/price", self.pool, bin))
            .await?;
        Ok(resp.price)
    }

    async fn position(&self) -> Result<Vec<BinLiquidity>> {
        let resp: PositionResponse = self
            .get_json(&format!("/v1/pools/{}/positions/{}", self.pool, self.owner))
            .await?;
        Ok(resp.bins)
    }

    async fn gas_balance(&self) -> Result<u128> {
        let resp: NativeBalanceResponse = self
            .get_json(&format!("/v1/accounts/{}/native-balance", self.owner))
            .await?;
        Ok(resp.balance)
    }

    async fn token_balances(&self) -> Result<TokenBalances> {
        self.get_json(&format!("/v1/pools/{}/balances/{}", self.pool, self.owner))
            .await
    }

    async fn estimate_gas(&self, tx: &Transaction) -> Result<u128> {
        let url = format!("{}/v1/transactions/estimate", self.base_url);
        let body = TransactionRequest {
            pool: &self.pool,
            owner: &self.owner,
            tx,
        };
        let response = self
            .authorized(self.client.post(&url).json(&body))
            .send()
            .await?;
        let resp: EstimateResponse = Self::decode(response, &url).await?;
        Ok(resp.gas)
    }

    async fn submit(&self, tx: &Transaction) -> Result<Confirmation> {
        let url = format!("{}/v1/transactions", self.base_url);
        let body = TransactionRequest {
            pool: &self.pool,
            owner: &self.owner,
            tx,
        };
        debug!("Submitting {} step(s) to gateway", tx.steps.len());

        let response = self
            .authorized(self.client.post(&url).json(&body))
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
            // Reverted or refused; the gateway says which step
            let text = response.text().await.unwrap_or_default();
            let rejection = serde_json::from_str::<RejectionResponse>(&text).unwrap_or(
                RejectionResponse {
                    step: 0,
                    reason: format!("{} - {}", status, text),
                },
            );
            return Err(AgentError::Rejected {
                step: rejection.step,
                reason: rejection.reason,
            });
        }

        Self::decode(response, &url).await
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn name(&self) -> &str {
        "gateway"
    }
}
