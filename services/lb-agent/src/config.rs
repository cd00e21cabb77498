//! Agent Configuration
//!
//! Layered: optional file (`LB_AGENT_CONFIG`, default `lb-agent.yaml`), then
//! `LB_AGENT__*` environment variables with `__` as the nesting separator.
//! e.g. `LB_AGENT__EXECUTION__MAX_SLIPPAGE_BPS=50`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::amount::to_raw_amount;
use crate::error::{AgentError, Result};
use crate::gas::GasReserveGuard;
use crate::paper::PaperPoolConfig;
use crate::planner::PlannerConfig;
use crate::range::RangePolicy;
use crate::reconciler::{PositionReconciler, DEFAULT_TOLERANCE_BPS};
use crate::types::TokenSide;

const DEFAULT_CONFIG_FILE: &str = "lb-agent.yaml";

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TradingMode {
    #[default]
    Paper,
    Live,
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradingMode::Paper => write!(f, "paper"),
            TradingMode::Live => write!(f, "live"),
        }
    }
}

/// Top-level agent configuration
#[derive(Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub mode: TradingMode,
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    #[serde(default)]
    pub pool_address: String,
    #[serde(default)]
    pub wallet_address: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Native balance kept back for gas, in whole units of the native asset
    #[serde(default = "default_gas_reserve")]
    pub gas_reserve: Decimal,
    #[serde(default = "default_native_decimals")]
    pub native_decimals: u8,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_reward_half_width")]
    pub reward_half_width: u32,
    #[serde(default = "default_target_half_width")]
    pub target_half_width: u32,
    /// Which pool token, if any, is the native gas asset
    #[serde(default)]
    pub gas_token: Option<TokenSide>,
    #[serde(default = "default_token_x")]
    pub token_x: String,
    #[serde(default = "default_token_y")]
    pub token_y: String,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub advisor: AdvisorConfig,
    #[serde(default = "default_status_dir")]
    pub status_dir: PathBuf,
    #[serde(default)]
    pub paper: PaperPoolConfig,
}

impl fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentConfig")
            .field("mode", &self.mode)
            .field("gateway_url", &self.gateway_url)
            .field("pool_address", &self.pool_address)
            .field("wallet_address", &self.wallet_address)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("gas_reserve", &self.gas_reserve)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("reward_half_width", &self.reward_half_width)
            .field("target_half_width", &self.target_half_width)
            .field("gas_token", &self.gas_token)
            .field("token_x", &self.token_x)
            .field("token_y", &self.token_y)
            .field("execution", &self.execution)
            .field("advisor", &self.advisor)
            .field("status_dir", &self.status_dir)
            .finish()
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            mode: TradingMode::default(),
            gateway_url: default_gateway_url(),
            pool_address: String::new(),
            wallet_address: String::new(),
            api_key: None,
            gas_reserve: default_gas_reserve(),
            native_decimals: default_native_decimals(),
            poll_interval_secs: default_poll_interval_secs(),
            reward_half_width: default_reward_half_width(),
            target_half_width: default_target_half_width(),
            gas_token: None,
            token_x: default_token_x(),
            token_y: default_token_y(),
            execution: ExecutionConfig::default(),
            advisor: AdvisorConfig::default(),
            status_dir: default_status_dir(),
            paper: PaperPoolConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Load from the config file named by `LB_AGENT_CONFIG` plus environment
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("LB_AGENT_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        let config = Self::load_from(&path)?;
        config.validate()?;
        Ok(config)
    }

    /// Load without validating; a missing file is not an error
    pub fn load_from(path: &str) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("LB_AGENT")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_half_width > self.reward_half_width {
            return Err(AgentError::Config(format!(
                "target_half_width {} exceeds reward_half_width {}",
                self.target_half_width, self.reward_half_width
            )));
        }
        if self.poll_interval_secs == 0 {
            return Err(AgentError::Config("poll_interval_secs must be > 0".to_string()));
        }
        if self.gas_reserve < Decimal::ZERO {
            return Err(AgentError::Config("gas_reserve must not be negative".to_string()));
        }
        if self.execution.max_slippage_bps >= 10_000 || self.execution.min_swap_bps >= 10_000 {
            return Err(AgentError::Config("bps values must be below 10000".to_string()));
        }
        if self.mode == TradingMode::Paper && self.paper.anchor().is_none() {
            return Err(AgentError::Config(format!(
                "paper.start_bin {} cannot be priced; set paper.anchor_price",
                self.paper.start_bin
            )));
        }
        if self.mode == TradingMode::Live
            && (self.pool_address.is_empty() || self.wallet_address.is_empty())
        {
            return Err(AgentError::Config(
                "live mode requires pool_address and wallet_address".to_string(),
            ));
        }
        Ok(())
    }

    /// Gas reserve in raw native units
    pub fn gas_reserve_raw(&self) -> Result<u128> {
        to_raw_amount(self.gas_reserve, self.native_decimals)
            .map_err(|e| AgentError::Config(format!("gas_reserve: {}", e)))
    }

    pub fn gas_guard(&self) -> Result<GasReserveGuard> {
        Ok(GasReserveGuard::new(self.gas_reserve_raw()?))
    }

    pub fn range_policy(&self) -> RangePolicy {
        RangePolicy::new(self.reward_half_width, self.target_half_width)
    }

    pub fn reconciler(&self) -> PositionReconciler {
        PositionReconciler::with_tolerance_bps(self.execution.reconcile_tolerance_bps)
    }

    pub fn planner_config(&self) -> PlannerConfig {
        PlannerConfig {
            max_slippage_bps: self.execution.max_slippage_bps,
            min_swap_bps: self.execution.min_swap_bps,
            gas_token: self.gas_token,
        }
    }
}

/// Execution configuration (slippage, batching, timeouts)
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct ExecutionConfig {
    /// Max slippage in basis points (e.g., 100 for 1%)
    #[serde(default = "default_max_slippage_bps")]
    pub max_slippage_bps: u32,
    /// Skip rebalancing swaps smaller than this share of position value
    #[serde(default = "default_min_swap_bps")]
    pub min_swap_bps: u32,
    /// Confirmation timeout in seconds
    #[serde(default = "default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,
    /// Steps per transaction when the gateway supports multicall
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Deposit drift tolerated when re-reading the position, in bps
    #[serde(default = "default_reconcile_tolerance_bps")]
    pub reconcile_tolerance_bps: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_slippage_bps: default_max_slippage_bps(),
            min_swap_bps: default_min_swap_bps(),
            confirm_timeout_secs: default_confirm_timeout_secs(),
            max_batch_size: default_max_batch_size(),
            reconcile_tolerance_bps: default_reconcile_tolerance_bps(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct AdvisorConfig {
    /// Unset disables the advisor
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_gateway_url() -> String { "http://localhost:8545".to_string() }
fn default_gas_reserve() -> Decimal { Decimal::new(2, 1) }
fn default_native_decimals() -> u8 { 18 }
fn default_poll_interval_secs() -> u64 { 180 }
fn default_reward_half_width() -> u32 { 2 }
fn default_target_half_width() -> u32 { 1 }
fn default_token_x() -> String { "WAVAX".to_string() }
fn default_token_y() -> String { "BTC.b".to_string() }
fn default_max_slippage_bps() -> u32 { 100 }
fn default_min_swap_bps() -> u32 { 50 }
fn default_confirm_timeout_secs() -> u64 { 60 }
fn default_max_batch_size() -> usize { 1 }
fn default_reconcile_tolerance_bps() -> u32 { DEFAULT_TOLERANCE_BPS }

fn default_status_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".lb-agent"))
        .unwrap_or_else(|| PathBuf::from(".lb-agent"))
}
