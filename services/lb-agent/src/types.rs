//! Core data model for the rebalancing loop
//!
//! These types define the contract between the planner, the executor and
//! the network collaborator.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

use crate::amount::raw_string;

/// Index of a discrete price bucket in the pool; adjacency is ±1
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BinId(pub i32);

impl BinId {
    pub fn offset(self, delta: i32) -> BinId {
        BinId(self.0.saturating_add(delta))
    }

    /// Absolute distance in bins
    pub fn distance(self, other: BinId) -> u32 {
        (self.0 as i64 - other.0 as i64).unsigned_abs() as u32
    }
}

impl fmt::Display for BinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One of the pool's two tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenSide {
    X,
    Y,
}

impl TokenSide {
    pub fn other(self) -> TokenSide {
        match self {
            TokenSide::X => TokenSide::Y,
            TokenSide::Y => TokenSide::X,
        }
    }
}

/// Liquidity held in a single bin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinLiquidity {
    pub bin: BinId,
    #[serde(with = "raw_string")]
    pub amount_x: u128,
    #[serde(with = "raw_string")]
    pub amount_y: u128,
}

impl BinLiquidity {
    pub fn new(bin: BinId, amount_x: u128, amount_y: u128) -> Self {
        Self {
            bin,
            amount_x,
            amount_y,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.amount_x == 0 && self.amount_y == 0
    }
}

/// The agent's liquidity across bins, re-derived from chain every cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Position {
    bins: BTreeMap<BinId, BinLiquidity>,
}

impl Position {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from per-bin entries, dropping bins without liquidity.
    /// Later entries for the same bin overwrite earlier ones; callers that
    /// need to reject duplicates check before calling.
    pub fn from_bins(entries: impl IntoIterator<Item = BinLiquidity>) -> Self {
        let bins = entries
            .into_iter()
            .filter(|b| !b.is_empty())
            .map(|b| (b.bin, b))
            .collect();
        Self { bins }
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Bins holding nonzero liquidity, ascending
    pub fn occupied_bins(&self) -> BTreeSet<BinId> {
        self.bins.keys().copied().collect()
    }

    pub fn get(&self, bin: BinId) -> Option<&BinLiquidity> {
        self.bins.get(&bin)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BinLiquidity> {
        self.bins.values()
    }

    /// Total (x, y) across all bins
    pub fn totals(&self) -> (u128, u128) {
        self.bins.values().fold((0u128, 0u128), |(x, y), b| {
            (x.saturating_add(b.amount_x), y.saturating_add(b.amount_y))
        })
    }
}

/// Wallet holdings of the two pool tokens
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBalances {
    #[serde(with = "raw_string")]
    pub x: u128,
    #[serde(with = "raw_string")]
    pub y: u128,
}

impl TokenBalances {
    pub fn get(&self, side: TokenSide) -> u128 {
        match side {
            TokenSide::X => self.x,
            TokenSide::Y => self.y,
        }
    }
}

/// Everything one cycle needs, read fresh from chain
#[derive(Debug, Clone)]
pub struct PoolSnapshot {
    pub active_bin: BinId,
    /// Raw token-Y per raw token-X at the active bin
    pub active_price: Decimal,
    pub position: Position,
    pub gas_balance: u128,
    pub wallet: TokenBalances,
}

/// Deposit amounts for one bin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinDeposit {
    pub bin: BinId,
    #[serde(with = "raw_string")]
    pub amount_x: u128,
    #[serde(with = "raw_string")]
    pub amount_y: u128,
}

/// A single on-chain operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Remove all liquidity from the listed bins
    Withdraw { bins: Vec<BinId> },
    Swap {
        token_in: TokenSide,
        token_out: TokenSide,
        #[serde(with = "raw_string")]
        amount_in: u128,
        #[serde(with = "raw_string")]
        min_amount_out: u128,
    },
    Deposit { deposits: Vec<BinDeposit> },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Withdraw { .. } => "withdraw",
            Action::Swap { .. } => "swap",
            Action::Deposit { .. } => "deposit",
        }
    }

    /// Bins the deposit lands in, empty for other actions
    pub fn deposit_bins(&self) -> BTreeSet<BinId> {
        match self {
            Action::Deposit { deposits } => deposits.iter().map(|d| d.bin).collect(),
            _ => BTreeSet::new(),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Withdraw { bins } => write!(f, "withdraw{}", bin_list(bins.iter())),
            Action::Swap {
                token_in,
                amount_in,
                min_amount_out,
                ..
            } => write!(
                f,
                "swap {} {:?} (min out {})",
                amount_in, token_in, min_amount_out
            ),
            Action::Deposit { deposits } => {
                write!(f, "deposit{}", bin_list(deposits.iter().map(|d| &d.bin)))
            }
        }
    }
}

fn bin_list<'a>(bins: impl Iterator<Item = &'a BinId>) -> String {
    let ids: Vec<String> = bins.map(|b| b.to_string()).collect();
    format!("{{{}}}", ids.join(","))
}

/// Ordered steps moving the current position to the target; never persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionPlan {
    pub plan_id: Uuid,
    pub steps: Vec<Action>,
}

impl ActionPlan {
    pub fn new(steps: Vec<Action>) -> Self {
        Self {
            plan_id: Uuid::new_v4(),
            steps,
        }
    }

    pub fn noop() -> Self {
        Self::new(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// One-line summary for operator output
    pub fn summary(&self) -> String {
        if self.steps.is_empty() {
            return "no-op".to_string();
        }
        self.steps
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    pub fn deposit(&self) -> Option<&[BinDeposit]> {
        self.steps.iter().find_map(|s| match s {
            Action::Deposit { deposits } => Some(deposits.as_slice()),
            _ => None,
        })
    }
}

/// A batch of actions submitted together; atomic on chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transaction {
    pub steps: Vec<Action>,
}

impl Transaction {
    pub fn single(action: Action) -> Self {
        Self {
            steps: vec![action],
        }
    }
}

/// Receipt for a confirmed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub tx_hash: String,
    #[serde(with = "raw_string")]
    pub gas_used: u128,
}
