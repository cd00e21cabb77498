//! End-to-end rebalance harness against the in-memory paper pool
//!
//! Validates the full loop:
//! read → range policy → plan (gas guard) → execute in order → state transition

use lb_agent::{
    client::LbClient,
    error::{AgentError, Result},
    Action, ActionPlan, Adjustment, Advisor, AdvisoryContext, BinId, BinLiquidity, BlockReason,
    Confirmation, CycleOutcome, GasReserveGuard, PaperPool, PaperPoolConfig, PlannerConfig,
    PoolStateReader, RangePolicy, RebalancePlanner, RebalanceState, Scheduler, TokenBalances,
    TokenSide, Transaction,
};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const AVAX: u128 = 1_000_000_000_000_000_000;
const RESERVE: u128 = AVAX / 5;

fn paper_pool(active: i32, wallet_x: u128, wallet_y: u128) -> Arc<PaperPool> {
    Arc::new(PaperPool::new(PaperPoolConfig {
        start_bin: active,
        wallet_x,
        wallet_y,
        ..PaperPoolConfig::default()
    }))
}

fn planner() -> RebalancePlanner {
    RebalancePlanner::new(
        RangePolicy::default(),
        GasReserveGuard::new(RESERVE),
        PlannerConfig::default(),
    )
}

fn scheduler(client: Arc<dyn LbClient>) -> Scheduler {
    Scheduler::new(client, planner(), Duration::from_millis(10))
}

fn bins(ids: &[i32]) -> BTreeSet<BinId> {
    ids.iter().map(|&b| BinId(b)).collect()
}

fn kinds(plan: &ActionPlan) -> Vec<&'static str> {
    plan.steps.iter().map(|s| s.kind()).collect()
}

fn executed_plan(outcome: &CycleOutcome) -> bool {
    matches!(outcome, CycleOutcome::Executed(r) if r.is_complete())
}

async fn occupied(pool: &PaperPool) -> BTreeSet<BinId> {
    pool.position()
        .await
        .unwrap()
        .into_iter()
        .filter(|b| !b.is_empty())
        .map(|b| b.bin)
        .collect()
}

/// Y-only liquidity left below an active bin that has since moved up
fn seed_y_only(pool: &PaperPool, ids: &[i32], amount: u128) {
    pool.seed_position(ids.iter().map(|&b| BinLiquidity::new(BinId(b), 0, amount)))
        .unwrap();
}

// ---------------------------------------------------------------------------
// Core scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_empty_position_gets_initial_deposit() {
    let pool = paper_pool(100, 3000, 3000);
    let mut scheduler = scheduler(pool.clone());

    let report = scheduler.run_cycle().await;
    let plan = report.plan.clone().expect("deposit plan");
    assert_eq!(kinds(&plan), vec!["deposit"]);

    let deposits = plan.deposit().unwrap();
    let amounts: Vec<(i32, u128, u128)> = deposits
        .iter()
        .map(|d| (d.bin.0, d.amount_x, d.amount_y))
        .collect();
    assert_eq!(
        amounts,
        vec![(99, 0, 1500), (100, 1500, 1500), (101, 1500, 0)]
    );
    assert!(executed_plan(&report.outcome));
    assert_eq!(report.state, RebalanceState::InRange);
    assert!(report.reconciliation.unwrap().is_clean());

    assert_eq!(occupied(&pool).await, bins(&[99, 100, 101]));
    assert_eq!(pool.wallet().unwrap(), TokenBalances { x: 0, y: 0 });
}

#[tokio::test]
async fn test_position_inside_reward_range_is_left_alone() {
    let pool = paper_pool(100, 0, 0);
    pool.seed_position(vec![
        BinLiquidity::new(BinId(98), 0, 1000),
        BinLiquidity::new(BinId(99), 0, 1000),
        BinLiquidity::new(BinId(100), 1000, 1000),
    ])
    .unwrap();
    let mut scheduler = scheduler(pool.clone());

    let report = scheduler.run_cycle().await;
    assert_eq!(report.outcome, CycleOutcome::InRange);
    assert_eq!(report.state, RebalanceState::InRange);
    assert!(report.plan.is_none());
    assert_eq!(pool.submissions(), 0);
}

#[tokio::test]
async fn test_active_bin_move_withdraws_swaps_and_redeposits() {
    let pool = paper_pool(100, 0, 0);
    seed_y_only(&pool, &[99, 100, 101], 1000);
    pool.set_active_bin(BinId(105)).unwrap();
    let mut scheduler = scheduler(pool.clone());

    let report = scheduler.run_cycle().await;
    let plan = report.plan.clone().expect("rebalance plan");
    assert_eq!(kinds(&plan), vec!["withdraw", "swap", "deposit"]);

    match &plan.steps[0] {
        Action::Withdraw { bins: withdrawn } => {
            assert_eq!(withdrawn, &vec![BinId(99), BinId(100), BinId(101)])
        }
        other => panic!("expected withdraw, got {}", other),
    }
    match &plan.steps[1] {
        Action::Swap {
            token_in,
            token_out,
            amount_in,
            min_amount_out,
        } => {
            assert_eq!(*token_in, TokenSide::Y);
            assert_eq!(*token_out, TokenSide::X);
            assert_eq!(*amount_in, 1500);
            assert!(*min_amount_out > 0);
        }
        other => panic!("expected swap, got {}", other),
    }
    assert_eq!(plan.steps[2].deposit_bins(), bins(&[104, 105, 106]));

    assert!(executed_plan(&report.outcome));
    assert_eq!(report.state, RebalanceState::InRange);
    assert_eq!(occupied(&pool).await, bins(&[104, 105, 106]));
    assert_eq!(pool.submissions(), 3);
}

#[tokio::test]
async fn test_gas_balance_equal_to_reserve_blocks() {
    let pool = paper_pool(100, 3000, 3000);
    pool.set_native_balance(RESERVE).unwrap();
    let mut scheduler = scheduler(pool.clone());

    let report = scheduler.run_cycle().await;
    match &report.outcome {
        CycleOutcome::Blocked(BlockReason::InsufficientGas { balance, cost }) => {
            assert_eq!(*balance, RESERVE);
            assert!(*cost > 0);
        }
        other => panic!("expected insufficient gas block, got {:?}", other),
    }
    assert_eq!(report.state.to_string(), "Blocked(insufficient_gas)");
    assert_eq!(pool.submissions(), 0);
    assert_eq!(pool.gas_balance().await.unwrap(), RESERVE);

    // Blocked is not terminal: topping up lets the next cycle proceed
    pool.set_native_balance(5 * AVAX).unwrap();
    let report = scheduler.run_cycle().await;
    assert!(executed_plan(&report.outcome));
}

#[tokio::test]
async fn test_empty_wallet_and_position_has_nothing_to_deposit() {
    let pool = paper_pool(100, 0, 0);
    let mut scheduler = scheduler(pool.clone());

    let report = scheduler.run_cycle().await;
    assert_eq!(
        report.outcome,
        CycleOutcome::Blocked(BlockReason::NothingToDeposit)
    );
    assert_eq!(pool.submissions(), 0);
}

// ---------------------------------------------------------------------------
// Invariants across cycles
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_oscillation_inside_reward_range_does_not_thrash() {
    let pool = paper_pool(100, 3000, 3000);
    let mut scheduler = scheduler(pool.clone());

    scheduler.run_cycle().await;
    assert_eq!(pool.submissions(), 1);

    for active in [101, 100, 99, 100, 101, 100] {
        pool.set_active_bin(BinId(active)).unwrap();
        let report = scheduler.run_cycle().await;
        assert_eq!(report.outcome, CycleOutcome::InRange, "active bin {}", active);
    }
    assert_eq!(pool.submissions(), 1);
}

#[tokio::test]
async fn test_partial_failure_replans_from_chain() {
    let pool = paper_pool(100, 0, 0);
    seed_y_only(&pool, &[99, 100, 101], 1000);
    pool.set_active_bin(BinId(105)).unwrap();
    // Withdraw is submission 1; the swap is submission 2
    pool.fail_on_submission(2).unwrap();
    let mut scheduler = scheduler(pool.clone());

    let report = scheduler.run_cycle().await;
    let result = match &report.outcome {
        CycleOutcome::Executed(result) => result.clone(),
        other => panic!("expected execution, got {:?}", other),
    };
    assert_eq!(result.confirmed_steps, vec![0]);
    assert_eq!(result.failed_at_step, Some(1));
    assert!(result.is_partial());
    assert_eq!(report.state, RebalanceState::OutOfRange);

    // No rollback: the withdraw stays confirmed
    assert!(occupied(&pool).await.is_empty());
    assert_eq!(pool.wallet().unwrap().y, 3000);

    let report = scheduler.run_cycle().await;
    let plan = report.plan.clone().expect("fresh plan");
    assert!(
        !plan.steps.iter().any(|s| matches!(s, Action::Withdraw { .. })),
        "must not re-withdraw already withdrawn bins: {}",
        plan.summary()
    );
    assert_eq!(kinds(&plan), vec!["swap", "deposit"]);
    assert!(executed_plan(&report.outcome));
    assert_eq!(occupied(&pool).await, bins(&[104, 105, 106]));
}

#[tokio::test]
async fn test_planning_is_deterministic() {
    let pool = paper_pool(100, 0, 0);
    seed_y_only(&pool, &[99, 100, 101], 1000);
    pool.set_active_bin(BinId(105)).unwrap();
    let reader = PoolStateReader::new(pool.clone());
    let snapshot = reader.read(false).await.unwrap();

    let first = planner().plan(&snapshot, pool.as_ref(), None).await.unwrap();
    let second = planner().plan(&snapshot, pool.as_ref(), None).await.unwrap();
    assert_eq!(first.plan.steps, second.plan.steps);
    assert_eq!(first.state, second.state);
    assert_eq!(first.estimated_gas, second.estimated_gas);
}

#[tokio::test]
async fn test_steady_state_plan_is_noop() {
    let pool = paper_pool(100, 3000, 3000);
    let mut scheduler = scheduler(pool.clone());
    scheduler.run_cycle().await;

    let snapshot = PoolStateReader::new(pool.clone()).read(true).await.unwrap();
    let decision = planner().plan(&snapshot, pool.as_ref(), None).await.unwrap();
    assert!(decision.plan.is_empty());
    assert_eq!(decision.plan.summary(), "no-op");
    assert_eq!(decision.state, RebalanceState::InRange);
}

// ---------------------------------------------------------------------------
// Batching
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_multicall_submits_one_transaction() {
    let pool = Arc::new(PaperPool::new(PaperPoolConfig {
        start_bin: 100,
        wallet_x: 0,
        wallet_y: 0,
        max_batch_size: 3,
        ..PaperPoolConfig::default()
    }));
    seed_y_only(&pool, &[99, 100, 101], 1000);
    pool.set_active_bin(BinId(105)).unwrap();
    let mut scheduler = scheduler(pool.clone());

    let report = scheduler.run_cycle().await;
    match &report.outcome {
        CycleOutcome::Executed(result) => {
            assert!(result.is_complete());
            assert_eq!(result.confirmed_steps, vec![0, 1, 2]);
            assert_eq!(result.confirmations.len(), 1);
        }
        other => panic!("expected execution, got {:?}", other),
    }
    assert_eq!(pool.submissions(), 1);
}

#[tokio::test]
async fn test_failed_batch_leaves_position_untouched() {
    let pool = Arc::new(PaperPool::new(PaperPoolConfig {
        start_bin: 100,
        wallet_x: 0,
        wallet_y: 0,
        max_batch_size: 3,
        ..PaperPoolConfig::default()
    }));
    seed_y_only(&pool, &[99, 100, 101], 1000);
    pool.set_active_bin(BinId(105)).unwrap();
    pool.fail_on_submission(1).unwrap();
    let mut scheduler = scheduler(pool.clone());

    let report = scheduler.run_cycle().await;
    match &report.outcome {
        CycleOutcome::Executed(result) => {
            assert!(result.confirmed_steps.is_empty());
            assert_eq!(result.failed_at_step, Some(0));
        }
        other => panic!("expected execution, got {:?}", other),
    }
    assert_eq!(occupied(&pool).await, bins(&[99, 100, 101]));
}

// ---------------------------------------------------------------------------
// Pooled gas token
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_pooled_gas_token_keeps_reserve() {
    let pool = Arc::new(PaperPool::new(PaperPoolConfig {
        start_bin: 100,
        wallet_y: 2 * AVAX,
        native_balance: 3 * AVAX,
        gas_token: Some(TokenSide::X),
        ..PaperPoolConfig::default()
    }));
    let planner = RebalancePlanner::new(
        RangePolicy::default(),
        GasReserveGuard::new(RESERVE),
        PlannerConfig {
            gas_token: Some(TokenSide::X),
            ..PlannerConfig::default()
        },
    );
    let mut scheduler = Scheduler::new(pool.clone(), planner, Duration::from_millis(10));

    let report = scheduler.run_cycle().await;
    let plan = report.plan.clone().expect("deposit plan");
    assert_eq!(kinds(&plan), vec!["swap", "deposit"]);
    assert!(executed_plan(&report.outcome));

    // Reserve survives the deposit and the plan's own gas
    let native = pool.gas_balance().await.unwrap();
    assert!(native >= RESERVE, "native {} fell below reserve", native);
    assert_eq!(pool.wallet().unwrap().x, native);
}

#[tokio::test]
async fn test_pooled_gas_token_below_reserve_blocks() {
    let pool = Arc::new(PaperPool::new(PaperPoolConfig {
        start_bin: 100,
        wallet_y: 2 * AVAX,
        native_balance: RESERVE,
        gas_token: Some(TokenSide::X),
        ..PaperPoolConfig::default()
    }));
    let planner = RebalancePlanner::new(
        RangePolicy::default(),
        GasReserveGuard::new(RESERVE),
        PlannerConfig {
            gas_token: Some(TokenSide::X),
            ..PlannerConfig::default()
        },
    );
    let mut scheduler = Scheduler::new(pool.clone(), planner, Duration::from_millis(10));

    let report = scheduler.run_cycle().await;
    assert!(matches!(
        report.outcome,
        CycleOutcome::Blocked(BlockReason::InsufficientGas { .. })
    ));
    assert_eq!(pool.submissions(), 0);
}

fn pooled_gas_scheduler(pool: Arc<PaperPool>) -> Scheduler {
    let planner = RebalancePlanner::new(
        RangePolicy::default(),
        GasReserveGuard::new(RESERVE),
        PlannerConfig {
            gas_token: Some(TokenSide::X),
            ..PlannerConfig::default()
        },
    );
    Scheduler::new(pool, planner, Duration::from_millis(10))
}

#[tokio::test]
async fn test_pooled_gas_holdback_grows_when_redraft_adds_swap() {
    // Holding back reserve + one deposit's gas tips X below Y, which adds a
    // swap; the holdback has to grow to cover that second step too
    let pool = Arc::new(PaperPool::new(PaperPoolConfig {
        start_bin: 100,
        wallet_y: 2 * AVAX / 5,
        native_balance: 3 * AVAX / 5,
        gas_token: Some(TokenSide::X),
        ..PaperPoolConfig::default()
    }));
    let mut scheduler = pooled_gas_scheduler(pool.clone());

    let report = scheduler.run_cycle().await;
    let plan = report.plan.clone().unwrap_or_else(|| panic!("blocked: {:?}", report.outcome));
    assert_eq!(kinds(&plan), vec!["swap", "deposit"]);
    assert!(executed_plan(&report.outcome));
    assert_eq!(report.state, RebalanceState::InRange);

    let native = pool.gas_balance().await.unwrap();
    assert!(native >= RESERVE, "native {} fell below reserve", native);
}

#[tokio::test]
async fn test_pooled_gas_block_reports_native_after_withdraw() {
    // 0.005 AVAX of X sits out of range; withdrawing it is all the plan could do
    let pool = Arc::new(PaperPool::new(PaperPoolConfig {
        start_bin: 100,
        wallet_y: 0,
        native_balance: RESERVE,
        gas_token: Some(TokenSide::X),
        ..PaperPoolConfig::default()
    }));
    pool.seed_position(vec![BinLiquidity::new(BinId(90), AVAX / 200, 0)])
        .unwrap();
    let mut scheduler = pooled_gas_scheduler(pool.clone());

    let report = scheduler.run_cycle().await;
    match &report.outcome {
        CycleOutcome::Blocked(BlockReason::InsufficientGas { balance, cost }) => {
            assert_eq!(*balance, RESERVE + AVAX / 200);
            assert!(*cost > 0);
        }
        other => panic!("expected insufficient gas block, got {:?}", other),
    }
    assert_eq!(pool.submissions(), 0);
}

// ---------------------------------------------------------------------------
// Advisor
// ---------------------------------------------------------------------------

struct FixedAdvisor {
    width: Option<u32>,
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl Advisor for FixedAdvisor {
    async fn suggest(&self, _context: &AdvisoryContext) -> Option<Adjustment> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.width.map(|w| Adjustment {
            target_half_width: Some(w),
        })
    }
}

#[tokio::test]
async fn test_advisor_width_is_clamped_to_reward_range() {
    let pool = paper_pool(100, 5000, 5000);
    let advisor = Arc::new(FixedAdvisor {
        width: Some(10),
        calls: AtomicUsize::new(0),
    });
    let mut scheduler = scheduler(pool.clone()).with_advisor(advisor.clone());

    let report = scheduler.run_cycle().await;
    let plan = report.plan.expect("deposit plan");
    assert_eq!(plan.steps[0].deposit_bins(), bins(&[98, 99, 100, 101, 102]));
    assert_eq!(advisor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_advisor_without_opinion_uses_defaults() {
    let pool = paper_pool(100, 3000, 3000);
    let advisor = Arc::new(FixedAdvisor {
        width: None,
        calls: AtomicUsize::new(0),
    });
    let mut scheduler = scheduler(pool.clone()).with_advisor(advisor);

    let report = scheduler.run_cycle().await;
    let plan = report.plan.expect("deposit plan");
    assert_eq!(plan.steps[0].deposit_bins(), bins(&[99, 100, 101]));
}

// ---------------------------------------------------------------------------
// Read failures
// ---------------------------------------------------------------------------

/// Wraps the paper pool and fails reads on demand
struct FlakyClient {
    inner: Arc<PaperPool>,
    fail_reads: AtomicUsize,
    hide_position: AtomicBool,
}

#[async_trait::async_trait]
impl LbClient for FlakyClient {
    async fn active_bin(&self) -> Result<BinId> {
        let left = self.fail_reads.load(Ordering::SeqCst);
        if left > 0 {
            self.fail_reads.store(left - 1, Ordering::SeqCst);
            return Err(AgentError::Transient("rpc timeout".to_string()));
        }
        self.inner.active_bin().await
    }

    async fn bin_price(&self, bin: BinId) -> Result<Decimal> {
        self.inner.bin_price(bin).await
    }

    async fn position(&self) -> Result<Vec<BinLiquidity>> {
        if self.hide_position.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        self.inner.position().await
    }

    async fn gas_balance(&self) -> Result<u128> {
        self.inner.gas_balance().await
    }

    async fn token_balances(&self) -> Result<TokenBalances> {
        self.inner.token_balances().await
    }

    async fn estimate_gas(&self, tx: &Transaction) -> Result<u128> {
        self.inner.estimate_gas(tx).await
    }

    async fn submit(&self, tx: &Transaction) -> Result<Confirmation> {
        self.inner.submit(tx).await
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

#[tokio::test]
async fn test_transient_read_error_skips_cycle() {
    let pool = paper_pool(100, 3000, 3000);
    let client = Arc::new(FlakyClient {
        inner: pool.clone(),
        fail_reads: AtomicUsize::new(1),
        hide_position: AtomicBool::new(false),
    });
    let mut scheduler = scheduler(client);

    let report = scheduler.run_cycle().await;
    assert!(matches!(report.outcome, CycleOutcome::Skipped(ref e) if e.contains("rpc timeout")));
    assert_eq!(pool.submissions(), 0);

    let report = scheduler.run_cycle().await;
    assert!(executed_plan(&report.outcome));
    assert_eq!(scheduler.cycles(), 2);
}

#[tokio::test]
async fn test_missing_position_after_deposit_is_invariant_violation() {
    let pool = paper_pool(100, 3000, 3000);
    let client = Arc::new(FlakyClient {
        inner: pool.clone(),
        fail_reads: AtomicUsize::new(0),
        hide_position: AtomicBool::new(false),
    });
    let mut scheduler = scheduler(client.clone());

    let report = scheduler.run_cycle().await;
    assert!(executed_plan(&report.outcome));

    client.hide_position.store(true, Ordering::SeqCst);
    let report = scheduler.run_cycle().await;
    assert!(matches!(report.outcome, CycleOutcome::Skipped(ref e) if e.contains("no position data")));
    assert_eq!(pool.submissions(), 1);
}

#[tokio::test]
async fn test_missing_position_after_transient_read_is_invariant_violation() {
    let pool = paper_pool(100, 3000, 3000);
    let client = Arc::new(FlakyClient {
        inner: pool.clone(),
        fail_reads: AtomicUsize::new(0),
        hide_position: AtomicBool::new(false),
    });
    let mut scheduler = scheduler(client.clone());

    let report = scheduler.run_cycle().await;
    assert!(executed_plan(&report.outcome));

    client.fail_reads.store(1, Ordering::SeqCst);
    let report = scheduler.run_cycle().await;
    assert!(matches!(report.outcome, CycleOutcome::Skipped(ref e) if e.contains("rpc timeout")));

    // The deposit still has to show up on the first read that succeeds
    client.hide_position.store(true, Ordering::SeqCst);
    let report = scheduler.run_cycle().await;
    assert!(matches!(report.outcome, CycleOutcome::Skipped(ref e) if e.contains("no position data")));

    // Reported once; after that the empty position is planned from chain as usual
    let report = scheduler.run_cycle().await;
    assert!(!matches!(report.outcome, CycleOutcome::Skipped(_)));
    assert_eq!(pool.submissions(), 1);
}

// ---------------------------------------------------------------------------
// Scheduler lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_scheduler_stops_on_shutdown_between_cycles() {
    let pool = paper_pool(100, 3000, 3000);
    let scheduler = Scheduler::new(pool.clone(), planner(), Duration::from_secs(3600));
    let (tx, rx) = watch::channel(false);

    let handle = tokio::spawn(scheduler.run(rx));

    // Let the first cycle land, then request shutdown during the long sleep
    tokio::time::sleep(Duration::from_millis(100)).await;
    tx.send(true).unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
    assert!(outcome.is_ok());
    assert_eq!(pool.submissions(), 1);
}

#[tokio::test]
async fn test_scheduler_with_shutdown_already_set_runs_nothing() {
    let pool = paper_pool(100, 3000, 3000);
    let scheduler = Scheduler::new(pool.clone(), planner(), Duration::from_millis(10));
    let (_tx, rx) = watch::channel(true);

    scheduler.run(rx).await.unwrap();
    assert_eq!(pool.submissions(), 0);
}
