//! Action Executor - Submits plan steps strictly in order
//!
//! Each transaction must confirm before the next is submitted. On the first
//! failure execution stops; confirmed steps are never rolled back since
//! withdraw, swap and deposit each leave a valid on-chain state.

use serde::Serialize;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::LbClient;
use crate::error::AgentError;
use crate::types::{ActionPlan, Confirmation, Transaction};

/// Outcome of executing one plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub plan_id: Uuid,
    pub total_steps: usize,
    /// Indices of confirmed steps, always a prefix 0..N
    pub confirmed_steps: Vec<usize>,
    pub failed_at_step: Option<usize>,
    pub error: Option<String>,
    pub confirmations: Vec<Confirmation>,
}

impl ExecutionResult {
    fn start(plan: &ActionPlan) -> Self {
        Self {
            plan_id: plan.plan_id,
            total_steps: plan.len(),
            confirmed_steps: Vec::new(),
            failed_at_step: None,
            error: None,
            confirmations: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed_at_step.is_none() && self.confirmed_steps.len() == self.total_steps
    }

    /// Some steps confirmed, a later one failed
    pub fn is_partial(&self) -> bool {
        self.failed_at_step.is_some() && !self.confirmed_steps.is_empty()
    }
}

/// Executes action plans against the network collaborator
pub struct ActionExecutor {
    client: Arc<dyn LbClient>,
}

impl ActionExecutor {
    pub fn new(client: Arc<dyn LbClient>) -> Self {
        Self { client }
    }

    pub async fn execute(&self, plan: &ActionPlan) -> ExecutionResult {
        let mut result = ExecutionResult::start(plan);
        if plan.is_empty() {
            return result;
        }

        let batches = batch_ranges(plan.len(), self.client.max_batch_size());
        debug!(
            "Executing plan {} as {} transaction(s) via {}",
            plan.plan_id,
            batches.len(),
            self.client.name()
        );

        for range in batches {
            let tx = Transaction {
                steps: plan.steps[range.clone()].to_vec(),
            };

            match self.client.submit(&tx).await {
                Ok(confirmation) => {
                    info!(
                        "Confirmed steps {:?} of plan {} | tx {}",
                        range, plan.plan_id, confirmation.tx_hash
                    );
                    result.confirmed_steps.extend(range);
                    result.confirmations.push(confirmation);
                }
                Err(e) => {
                    // Batches are atomic, so nothing in this range confirmed
                    let step = range.start;
                    if let AgentError::Rejected { step: inner, .. } = &e {
                        debug!("Collaborator reported step {} of the batch", inner);
                    }
                    warn!(
                        "Plan {} failed at step {} ({}): {}",
                        plan.plan_id, step, plan.steps[step], e
                    );
                    result.failed_at_step = Some(step);
                    result.error = Some(e.to_string());
                    break;
                }
            }
        }

        result
    }
}

/// Split `len` steps into consecutive batches of at most `max` steps
fn batch_ranges(len: usize, max: usize) -> Vec<Range<usize>> {
    let max = max.max(1);
    (0..len)
        .step_by(max)
        .map(|start| start..(start + max).min(len))
        .collect()
}
