//! Rebalance Planner - the decision state machine
//!
//! Each cycle the planner sees a fresh `PoolSnapshot` and produces a minimal
//! `ActionPlan`. It never trusts its own previous plan: the position it plans
//! from is always the one just read from chain.
//!
//! ```text
//! InRange --(range policy false)--> OutOfRange --(plan affordable)--> Rebalancing
//!    ^                                  |  ^                               |
//!    |                                  |  +------(partial failure)--------+
//!    |                     (unaffordable)                                  |
//!    |                                  v                                  |
//!    |                         Blocked(reason)                             |
//!    +---------------------------(full success)----------------------------+
//! ```

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info, warn};

use crate::advisor::Adjustment;
use crate::amount::{to_decimal, to_raw_floor};
use crate::bin_math::value_in_y;
use crate::client::LbClient;
use crate::error::{AgentError, Result};
use crate::executor::ExecutionResult;
use crate::gas::GasReserveGuard;
use crate::range::{RangeEvaluation, RangePolicy};
use crate::types::{Action, ActionPlan, BinDeposit, BinId, PoolSnapshot, TokenSide, Transaction};

const BPS_DENOMINATOR: u32 = 10_000;
/// Redrafts allowed while the pooled gas holdback grows to cover the plan
const MAX_HOLDBACK_ROUNDS: usize = 4;

/// Why a cycle took no action despite the position needing one
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BlockReason {
    InsufficientGas { balance: u128, cost: u128 },
    NothingToDeposit,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::InsufficientGas { .. } => write!(f, "insufficient_gas"),
            BlockReason::NothingToDeposit => write!(f, "nothing_to_deposit"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RebalanceState {
    InRange,
    OutOfRange,
    Rebalancing,
    /// Not terminal: the next cycle re-evaluates from scratch
    Blocked(BlockReason),
}

impl fmt::Display for RebalanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebalanceState::InRange => write!(f, "InRange"),
            RebalanceState::OutOfRange => write!(f, "OutOfRange"),
            RebalanceState::Rebalancing => write!(f, "Rebalancing"),
            RebalanceState::Blocked(reason) => write!(f, "Blocked({})", reason),
        }
    }
}

/// Planner tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannerConfig {
    /// Slippage tolerance applied to the modelled swap output
    pub max_slippage_bps: u32,
    /// Imbalances worth less than this share of total value are not swapped
    pub min_swap_bps: u32,
    /// Set when one of the pool tokens is the native gas asset
    pub gas_token: Option<TokenSide>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_slippage_bps: 100,
            min_swap_bps: 50,
            gas_token: None,
        }
    }
}

/// Output of one planning cycle
#[derive(Debug, Clone)]
pub struct Decision {
    pub state: RebalanceState,
    pub evaluation: RangeEvaluation,
    pub plan: ActionPlan,
    pub estimated_gas: u128,
}

/// Sized swap that equalises X and Y value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapSizing {
    pub token_in: TokenSide,
    pub amount_in: u128,
    pub expected_out: u128,
    pub min_amount_out: u128,
}

impl SwapSizing {
    fn into_action(self) -> Action {
        Action::Swap {
            token_in: self.token_in,
            token_out: self.token_in.other(),
            amount_in: self.amount_in,
            min_amount_out: self.min_amount_out,
        }
    }
}

/// Candidate plan before the gas guard runs
#[derive(Debug, Clone)]
struct Draft {
    steps: Vec<Action>,
    /// Modelled native balance once every step has landed, before gas
    native_after: u128,
}

pub struct RebalancePlanner {
    policy: RangePolicy,
    guard: GasReserveGuard,
    config: PlannerConfig,
    state: RebalanceState,
}

impl RebalancePlanner {
    pub fn new(policy: RangePolicy, guard: GasReserveGuard, config: PlannerConfig) -> Self {
        Self {
            policy,
            guard,
            config,
            state: RebalanceState::OutOfRange,
        }
    }

    pub fn state(&self) -> &RebalanceState {
        &self.state
    }

    pub fn policy(&self) -> &RangePolicy {
        &self.policy
    }

    /// Decide this cycle's plan from a fresh snapshot
    pub async fn plan(
        &mut self,
        snapshot: &PoolSnapshot,
        client: &dyn LbClient,
        advice: Option<&Adjustment>,
    ) -> Result<Decision> {
        let policy = match advice.and_then(|a| a.target_half_width) {
            Some(width) => {
                let tuned = self.policy.with_target_half_width(width);
                if tuned != self.policy {
                    debug!(
                        "Advisor target half-width {} applied as {}",
                        width,
                        tuned.target_half_width()
                    );
                }
                tuned
            }
            None => self.policy,
        };

        let evaluation = policy.evaluate(&snapshot.position, snapshot.active_bin);
        let current = snapshot.position.occupied_bins();

        if current == evaluation.target_bins
            || (!snapshot.position.is_empty() && evaluation.in_range)
        {
            return Ok(self.settle(RebalanceState::InRange, evaluation, ActionPlan::noop(), 0));
        }

        if let Some(nearest) = current.iter().map(|b| b.distance(snapshot.active_bin)).min() {
            info!(
                "Position {} left reward range [{}, {}] (nearest bin {} away)",
                fmt_bins(&current),
                evaluation.reward_range.lower,
                evaluation.reward_range.upper,
                nearest
            );
        }
        self.state = RebalanceState::OutOfRange;

        let mut draft = self.draft(snapshot, &evaluation, self.guard.reserve())?;
        if draft.steps.is_empty() {
            return Ok(self.settle(
                RebalanceState::Blocked(BlockReason::NothingToDeposit),
                evaluation,
                ActionPlan::noop(),
                0,
            ));
        }
        let mut costs = estimate_steps(&draft.steps, client).await?;

        if self.config.gas_token.is_some() {
            // Hold back reserve plus this plan's own gas from the pooled native token.
            // A larger holdback can add a swap: redraft until it covers the plan it produced.
            let mut holdback = self.guard.reserve();
            for _ in 0..MAX_HOLDBACK_ROUNDS {
                let needed = self.guard.reserve().saturating_add(sum(&costs));
                if needed <= holdback {
                    break;
                }
                holdback = needed;
                draft = self.draft(snapshot, &evaluation, holdback)?;
                if draft.steps.is_empty() {
                    return Ok(self.blocked_on_gas(evaluation, draft.native_after, sum(&costs)));
                }
                costs = estimate_steps(&draft.steps, client).await?;
            }
        }

        // Every step must be admitted by the guard before it joins the plan
        let mut cumulative = 0u128;
        for (i, cost) in costs.iter().enumerate() {
            cumulative = cumulative.saturating_add(*cost);
            if !self.guard.can_afford(draft.native_after, cumulative) {
                warn!(
                    "Step {} ({}) would breach gas reserve: balance={}, cost={}, reserve={}",
                    i,
                    draft.steps[i].kind(),
                    draft.native_after,
                    cumulative,
                    self.guard.reserve()
                );
                return Ok(self.blocked_on_gas(evaluation, draft.native_after, sum(&costs)));
            }
        }

        let plan = ActionPlan::new(draft.steps);
        info!(
            "Planned rebalance to {} around active bin {}: {} (gas ~{})",
            fmt_bins(&evaluation.target_bins),
            snapshot.active_bin,
            plan.summary(),
            cumulative
        );
        Ok(self.settle(RebalanceState::Rebalancing, evaluation, plan, cumulative))
    }

    /// Fold an execution outcome back into the state machine
    pub fn record_execution(&mut self, result: &ExecutionResult) -> RebalanceState {
        let next = if result.is_complete() {
            RebalanceState::InRange
        } else {
            warn!(
                "Plan {} stopped at step {:?} after {} confirmed step(s); replanning from chain next cycle",
                result.plan_id,
                result.failed_at_step,
                result.confirmed_steps.len()
            );
            RebalanceState::OutOfRange
        };
        self.transition(next.clone());
        next
    }

    fn settle(
        &mut self,
        state: RebalanceState,
        evaluation: RangeEvaluation,
        plan: ActionPlan,
        estimated_gas: u128,
    ) -> Decision {
        self.transition(state.clone());
        Decision {
            state,
            evaluation,
            plan,
            estimated_gas,
        }
    }

    /// `balance` is the native balance the plan would leave to pay its gas
    fn blocked_on_gas(&mut self, evaluation: RangeEvaluation, balance: u128, cost: u128) -> Decision {
        self.settle(
            RebalanceState::Blocked(BlockReason::InsufficientGas { balance, cost }),
            evaluation,
            ActionPlan::noop(),
            cost,
        )
    }

    fn transition(&mut self, next: RebalanceState) {
        if self.state != next {
            debug!("Planner state: {} -> {}", self.state, next);
        }
        self.state = next;
    }

    /// Withdraw everything, swap to equal value, deposit into the target window.
    /// `native_holdback` is kept out of the budget when a pool token is the gas asset.
    fn draft(
        &self,
        snapshot: &PoolSnapshot,
        evaluation: &RangeEvaluation,
        native_holdback: u128,
    ) -> Result<Draft> {
        let mut steps = Vec::new();
        let (withdrawn_x, withdrawn_y) = snapshot.position.totals();
        if !snapshot.position.is_empty() {
            steps.push(Action::Withdraw {
                bins: snapshot.position.occupied_bins().into_iter().collect(),
            });
        }

        let mut budget_x = snapshot.wallet.x.saturating_add(withdrawn_x);
        let mut budget_y = snapshot.wallet.y.saturating_add(withdrawn_y);
        match self.config.gas_token {
            Some(TokenSide::X) => budget_x = budget_x.saturating_sub(native_holdback),
            Some(TokenSide::Y) => budget_y = budget_y.saturating_sub(native_holdback),
            None => {}
        }

        let swap = size_swap(
            budget_x,
            budget_y,
            snapshot.active_price,
            self.config.max_slippage_bps,
            self.config.min_swap_bps,
        )?;
        if let Some(s) = swap {
            match s.token_in {
                TokenSide::X => {
                    budget_x -= s.amount_in;
                    budget_y = budget_y.saturating_add(s.min_amount_out);
                }
                TokenSide::Y => {
                    budget_y -= s.amount_in;
                    budget_x = budget_x.saturating_add(s.min_amount_out);
                }
            }
        }

        let deposits = distribute(&evaluation.target_bins, snapshot.active_bin, budget_x, budget_y);
        if deposits.is_empty() {
            // Nothing lands; a withdraw alone would still return the pooled gas token
            let native_after = match self.config.gas_token {
                Some(TokenSide::X) => snapshot.gas_balance.saturating_add(withdrawn_x),
                Some(TokenSide::Y) => snapshot.gas_balance.saturating_add(withdrawn_y),
                None => snapshot.gas_balance,
            };
            return Ok(Draft {
                steps: Vec::new(),
                native_after,
            });
        }

        let native_after = match self.config.gas_token {
            None => snapshot.gas_balance,
            Some(side) => {
                let (withdrawn, deposited) = match side {
                    TokenSide::X => (withdrawn_x, budget_x),
                    TokenSide::Y => (withdrawn_y, budget_y),
                };
                let mut native = snapshot.gas_balance.saturating_add(withdrawn);
                if let Some(s) = swap {
                    if s.token_in == side {
                        native = native.saturating_sub(s.amount_in);
                    } else {
                        native = native.saturating_add(s.min_amount_out);
                    }
                }
                native.saturating_sub(deposited)
            }
        };

        if let Some(s) = swap {
            steps.push(s.into_action());
        }
        steps.push(Action::Deposit { deposits });

        Ok(Draft {
            steps,
            native_after,
        })
    }
}

async fn estimate_steps(steps: &[Action], client: &dyn LbClient) -> Result<Vec<u128>> {
    let mut costs = Vec::with_capacity(steps.len());
    for step in steps {
        costs.push(client.estimate_gas(&Transaction::single(step.clone())).await?);
    }
    Ok(costs)
}

fn sum(costs: &[u128]) -> u128 {
    costs.iter().fold(0u128, |acc, c| acc.saturating_add(*c))
}

fn fmt_bins(bins: &BTreeSet<BinId>) -> String {
    let ids: Vec<String> = bins.iter().map(|b| b.to_string()).collect();
    format!("{{{}}}", ids.join(","))
}

fn unrepresentable() -> AgentError {
    AgentError::invariant("amount not representable as decimal")
}

/// Size the swap that leaves equal value in X and Y at `price`.
///
/// Never sells more than the overweighted token's excess. Returns `None`
/// when the imbalance is below `min_swap_bps` of total value.
pub fn size_swap(
    x: u128,
    y: u128,
    price: Decimal,
    max_slippage_bps: u32,
    min_swap_bps: u32,
) -> Result<Option<SwapSizing>> {
    if price <= Decimal::ZERO {
        return Err(AgentError::invariant(format!(
            "non-positive bin price {}",
            price
        )));
    }

    let value_x = to_decimal(x)
        .and_then(|d| d.checked_mul(price))
        .ok_or_else(unrepresentable)?;
    let total = value_in_y(x, y, price).ok_or_else(unrepresentable)?;
    if total.is_zero() {
        return Ok(None);
    }
    let half = total / Decimal::TWO;

    let (token_in, excess_value, amount_in, expected_out) = if value_x > half {
        let excess = value_x - half;
        let amount_in = to_raw_floor(excess / price).ok_or_else(unrepresentable)?.min(x);
        let out = to_decimal(amount_in)
            .and_then(|d| d.checked_mul(price))
            .and_then(to_raw_floor)
            .ok_or_else(unrepresentable)?;
        (TokenSide::X, excess, amount_in, out)
    } else {
        let excess = half - value_x;
        let amount_in = to_raw_floor(excess).ok_or_else(unrepresentable)?.min(y);
        let out = to_decimal(amount_in)
            .and_then(|d| d.checked_div(price))
            .and_then(to_raw_floor)
            .ok_or_else(unrepresentable)?;
        (TokenSide::Y, excess, amount_in, out)
    };

    let threshold = total * Decimal::from(min_swap_bps) / Decimal::from(BPS_DENOMINATOR);
    if amount_in == 0 || expected_out == 0 || excess_value < threshold {
        return Ok(None);
    }

    let keep = Decimal::from(BPS_DENOMINATOR.saturating_sub(max_slippage_bps));
    let min_amount_out = to_decimal(expected_out)
        .map(|d| d * keep / Decimal::from(BPS_DENOMINATOR))
        .and_then(to_raw_floor)
        .ok_or_else(unrepresentable)?;

    Ok(Some(SwapSizing {
        token_in,
        amount_in,
        expected_out,
        min_amount_out,
    }))
}

/// Spot distribution: Y spread evenly over target bins at or below the
/// active bin, X over bins at or above it. Remainders land in the active bin.
pub fn distribute(
    target_bins: &BTreeSet<BinId>,
    active: BinId,
    amount_x: u128,
    amount_y: u128,
) -> Vec<BinDeposit> {
    let y_bins: Vec<BinId> = target_bins.iter().copied().filter(|b| *b <= active).collect();
    let x_bins: Vec<BinId> = target_bins.iter().copied().filter(|b| *b >= active).collect();

    let mut per_bin: BTreeMap<BinId, (u128, u128)> = BTreeMap::new();
    for (bin, share) in spread(amount_x, &x_bins, active) {
        per_bin.entry(bin).or_default().0 += share;
    }
    for (bin, share) in spread(amount_y, &y_bins, active) {
        per_bin.entry(bin).or_default().1 += share;
    }

    per_bin
        .into_iter()
        .filter(|(_, (x, y))| *x > 0 || *y > 0)
        .map(|(bin, (amount_x, amount_y))| BinDeposit {
            bin,
            amount_x,
            amount_y,
        })
        .collect()
}

fn spread(amount: u128, bins: &[BinId], active: BinId) -> Vec<(BinId, u128)> {
    if bins.is_empty() || amount == 0 {
        return Vec::new();
    }
    let n = bins.len() as u128;
    let share = amount / n;
    let remainder = amount % n;
    let sink = if bins.contains(&active) { active } else { bins[0] };

    bins.iter()
        .map(|&bin| {
            let extra = if bin == sink { remainder } else { 0 };
            (bin, share + extra)
        })
        .collect()
}
