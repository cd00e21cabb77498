//! Advisory signal client
//!
//! An optional, non-authoritative hint source (e.g. an LLM behind a local
//! HTTP endpoint). Advice may only retune the target window width; the
//! planner clamps it inside the reward range and never lets it near the
//! gas guard.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::planner::RebalanceState;
use crate::types::BinId;

/// Default timeout for suggestion requests
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Context handed to the advisor each cycle
#[derive(Debug, Clone, Serialize)]
pub struct AdvisoryContext {
    pub active_bin: BinId,
    pub position_bins: Vec<BinId>,
    pub state: String,
    pub reward_half_width: u32,
    pub target_half_width: u32,
}

impl AdvisoryContext {
    pub fn new(
        active_bin: BinId,
        position_bins: Vec<BinId>,
        state: &RebalanceState,
        reward_half_width: u32,
        target_half_width: u32,
    ) -> Self {
        Self {
            active_bin,
            position_bins,
            state: state.to_string(),
            reward_half_width,
            target_half_width,
        }
    }
}

/// Tunable, non-safety parameters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustment {
    pub target_half_width: Option<u32>,
}

#[async_trait::async_trait]
pub trait Advisor: Send + Sync {
    /// `None` means no opinion; failures must also map to `None`
    async fn suggest(&self, context: &AdvisoryContext) -> Option<Adjustment>;
}

/// Advisor reached over HTTP: POST {url}/v1/suggest
pub struct HttpAdvisor {
    base_url: String,
    http_client: Client,
}

impl HttpAdvisor {
    pub fn new(base_url: &str, timeout_secs: Option<u64>) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
        let http_client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(2)
            .build()?;

        info!(
            "Advisor client initialized: url={}, timeout={}s",
            base_url,
            timeout.as_secs()
        );

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SuggestResponse {
    #[serde(default)]
    adjustment: Option<Adjustment>,
}

#[async_trait::async_trait]
impl Advisor for HttpAdvisor {
    async fn suggest(&self, context: &AdvisoryContext) -> Option<Adjustment> {
        let url = format!("{}/v1/suggest", self.base_url);

        let response = match self.http_client.post(&url).json(context).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("Advisor unavailable: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            warn!("Advisor returned {}", response.status());
            return None;
        }

        match response.json::<SuggestResponse>().await {
            Ok(body) => {
                debug!("Advisor suggestion: {:?}", body.adjustment);
                body.adjustment
            }
            Err(e) => {
                warn!("Malformed advisor response: {}", e);
                None
            }
        }
    }
}
