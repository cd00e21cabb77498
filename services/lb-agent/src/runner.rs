//! Scheduler - drives one rebalance cycle per poll interval
//!
//! Cycles never overlap: the next sleep starts only after the previous cycle
//! has finished. Shutdown is observed between cycles, never mid-plan.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::advisor::{Adjustment, Advisor, AdvisoryContext};
use crate::client::LbClient;
use crate::error::AgentError;
use crate::executor::{ActionExecutor, ExecutionResult};
use crate::planner::{BlockReason, RebalancePlanner, RebalanceState};
use crate::reader::PoolStateReader;
use crate::reconciler::{PositionReconciler, ReconciliationResult};
use crate::state::{NowState, StatusWriter};
use crate::types::{ActionPlan, BinId, PoolSnapshot, Position};

/// What a single cycle ended up doing
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Position already where it should be
    InRange,
    Executed(ExecutionResult),
    Blocked(BlockReason),
    /// Read or planning failed; nothing was submitted
    Skipped(String),
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub active_bin: Option<BinId>,
    pub state: RebalanceState,
    pub plan: Option<ActionPlan>,
    pub outcome: CycleOutcome,
    pub reconciliation: Option<ReconciliationResult>,
}

impl CycleReport {
    /// Short label for logs and the status file
    pub fn action_label(&self) -> String {
        match (&self.outcome, &self.plan) {
            (CycleOutcome::InRange, _) => "none".to_string(),
            (CycleOutcome::Executed(result), Some(plan)) if result.is_complete() => {
                plan.summary()
            }
            (CycleOutcome::Executed(result), Some(plan)) => format!(
                "{} (stopped at step {})",
                plan.summary(),
                result.failed_at_step.unwrap_or_default()
            ),
            (CycleOutcome::Executed(_), None) => "executed".to_string(),
            (CycleOutcome::Blocked(reason), _) => format!("blocked: {}", reason),
            (CycleOutcome::Skipped(_), _) => "skipped".to_string(),
        }
    }

    pub fn error(&self) -> Option<String> {
        match &self.outcome {
            CycleOutcome::Skipped(e) => Some(e.clone()),
            CycleOutcome::Executed(result) => result.error.clone(),
            _ => None,
        }
    }
}

pub struct Scheduler {
    client: Arc<dyn LbClient>,
    reader: PoolStateReader,
    planner: RebalancePlanner,
    executor: ActionExecutor,
    reconciler: PositionReconciler,
    advisor: Option<Arc<dyn Advisor>>,
    status: Option<StatusWriter>,
    mode: String,
    interval: Duration,
    cycle: u64,
    /// Set after a confirmed deposit; cleared once a read has checked it
    expect_position: bool,
}

impl Scheduler {
    pub fn new(client: Arc<dyn LbClient>, planner: RebalancePlanner, interval: Duration) -> Self {
        Self {
            reader: PoolStateReader::new(client.clone()),
            executor: ActionExecutor::new(client.clone()),
            client,
            planner,
            reconciler: PositionReconciler::default(),
            advisor: None,
            status: None,
            mode: "paper".to_string(),
            interval,
            cycle: 0,
            expect_position: false,
        }
    }

    pub fn with_advisor(mut self, advisor: Arc<dyn Advisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    pub fn with_reconciler(mut self, reconciler: PositionReconciler) -> Self {
        self.reconciler = reconciler;
        self
    }

    pub fn with_status_writer(mut self, status: StatusWriter) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    pub fn state(&self) -> &RebalanceState {
        self.planner.state()
    }

    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    /// Run cycles until `shutdown` flips to true or its sender is dropped
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        info!(
            "Scheduler starting: client={}, interval={:?}",
            self.client.name(),
            self.interval
        );
        if let Some(status) = &self.status {
            status.init().await?;
        }

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.run_cycle().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Scheduler stopped after {} cycle(s)", self.cycle);
        Ok(())
    }

    /// Read, plan, execute and record one cycle. Never fails: errors skip the cycle.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.cycle += 1;
        let report = match self.reader.read(self.expect_position).await {
            Ok(snapshot) => {
                self.expect_position = false;
                self.plan_and_execute(snapshot).await
            }
            Err(e) => {
                // A transient read proved nothing about the position; check again next cycle
                if !e.is_transient() {
                    self.expect_position = false;
                }
                self.skipped(None, e)
            }
        };

        info!(
            "Cycle {}: active_bin={} state={} action={}",
            report.cycle,
            report
                .active_bin
                .map(|b| b.to_string())
                .unwrap_or_else(|| "?".to_string()),
            report.state,
            report.action_label()
        );

        self.record_status(&report).await;
        report
    }

    async fn plan_and_execute(&mut self, snapshot: PoolSnapshot) -> CycleReport {
        let advice = self.advise(&snapshot).await;

        let decision = match self
            .planner
            .plan(&snapshot, self.client.as_ref(), advice.as_ref())
            .await
        {
            Ok(decision) => decision,
            Err(e) => return self.skipped(Some(snapshot.active_bin), e),
        };

        let mut report = CycleReport {
            cycle: self.cycle,
            active_bin: Some(snapshot.active_bin),
            state: decision.state.clone(),
            plan: None,
            outcome: CycleOutcome::InRange,
            reconciliation: None,
        };

        if let RebalanceState::Blocked(reason) = &decision.state {
            warn!("Rebalance blocked: {}", reason);
            report.outcome = CycleOutcome::Blocked(reason.clone());
            return report;
        }
        if decision.plan.is_empty() {
            return report;
        }

        let result = self.executor.execute(&decision.plan).await;
        report.state = self.planner.record_execution(&result);

        if result.is_complete() {
            if let Some(deposits) = decision.plan.deposit() {
                self.expect_position = true;
                report.reconciliation = self.reconcile(deposits).await;
            }
        }

        report.plan = Some(decision.plan);
        report.outcome = CycleOutcome::Executed(result);
        report
    }

    async fn advise(&self, snapshot: &PoolSnapshot) -> Option<Adjustment> {
        let advisor = self.advisor.as_ref()?;
        let policy = self.planner.policy();
        let context = AdvisoryContext::new(
            snapshot.active_bin,
            snapshot.position.occupied_bins().into_iter().collect(),
            self.planner.state(),
            policy.reward_half_width(),
            policy.target_half_width(),
        );
        advisor.suggest(&context).await
    }

    async fn reconcile(&self, deposits: &[crate::types::BinDeposit]) -> Option<ReconciliationResult> {
        match self.client.position().await {
            Ok(bins) => Some(
                self.reconciler
                    .reconcile(deposits, &Position::from_bins(bins)),
            ),
            Err(e) => {
                warn!("Post-deposit position read failed, skipping reconciliation: {}", e);
                None
            }
        }
    }

    fn skipped(&self, active_bin: Option<BinId>, e: AgentError) -> CycleReport {
        if e.is_transient() {
            warn!("Cycle {} skipped on transient error: {}", self.cycle, e);
        } else {
            error!("Cycle {} skipped: {}", self.cycle, e);
        }
        CycleReport {
            cycle: self.cycle,
            active_bin,
            state: self.planner.state().clone(),
            plan: None,
            outcome: CycleOutcome::Skipped(e.to_string()),
            reconciliation: None,
        }
    }

    async fn record_status(&self, report: &CycleReport) {
        let Some(status) = &self.status else {
            return;
        };
        let position_bins = match self.client.position().await {
            Ok(bins) => Position::from_bins(bins).occupied_bins().into_iter().collect(),
            Err(_) => Vec::new(),
        };
        let now = NowState {
            timestamp: chrono::Utc::now().to_rfc3339(),
            mode: self.mode.clone(),
            cycle: report.cycle,
            state: report.state.to_string(),
            active_bin: report.active_bin,
            position_bins,
            last_action: Some(report.action_label()),
            last_error: report.error(),
        };
        if let Err(e) = status.write_now(&now).await {
            warn!("Failed to write status file: {}", e);
        }
    }
}
