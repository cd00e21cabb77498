//! LB Agent Library
//!
//! Autonomous liquidity rebalancer for Liquidity-Book style binned pools.

pub mod advisor;
pub mod amount;
pub mod bin_math;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod gas;
pub mod gateway;
pub mod paper;
pub mod planner;
pub mod range;
pub mod reader;
pub mod reconciler;
pub mod runner;
pub mod state;
pub mod types;

// Re-export main types for convenience
pub use advisor::{Adjustment, Advisor, AdvisoryContext, HttpAdvisor};
pub use client::LbClient;
pub use config::{AdvisorConfig, AgentConfig, ExecutionConfig, TradingMode};
pub use error::{AgentError, Result};
pub use executor::{ActionExecutor, ExecutionResult};
pub use gas::GasReserveGuard;
pub use gateway::GatewayClient;
pub use paper::{PaperPool, PaperPoolConfig};
pub use planner::{BlockReason, Decision, PlannerConfig, RebalancePlanner, RebalanceState};
pub use range::{RangeEvaluation, RangePolicy, RewardRange};
pub use reader::PoolStateReader;
pub use reconciler::{PositionReconciler, ReconciliationResult};
pub use runner::{CycleOutcome, CycleReport, Scheduler};
pub use state::{NowState, StatusWriter};
pub use types::{
    Action, ActionPlan, BinDeposit, BinId, BinLiquidity, Confirmation, PoolSnapshot, Position,
    TokenBalances, TokenSide, Transaction,
};
