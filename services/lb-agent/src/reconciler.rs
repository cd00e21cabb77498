//! Position reconciliation - compare what a plan deposited with what chain reports
//!
//! Informational only: the next cycle plans from chain state regardless.

use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::types::{BinDeposit, BinId, Position};

/// Tolerance for amount drift, in basis points of the planned amount
pub const DEFAULT_TOLERANCE_BPS: u32 = 100;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationResult {
    pub matches: Vec<BinId>,
    pub discrepancies: Vec<BinDiscrepancy>,
    pub missing_on_chain: Vec<BinId>,
    pub unexpected_on_chain: Vec<BinId>,
}

impl ReconciliationResult {
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
            && self.missing_on_chain.is_empty()
            && self.unexpected_on_chain.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinDiscrepancy {
    pub bin: BinId,
    pub planned_x: u128,
    pub planned_y: u128,
    pub on_chain_x: u128,
    pub on_chain_y: u128,
}

pub struct PositionReconciler {
    tolerance_bps: u128,
}

impl Default for PositionReconciler {
    fn default() -> Self {
        Self {
            tolerance_bps: u128::from(DEFAULT_TOLERANCE_BPS),
        }
    }
}

impl PositionReconciler {
    pub fn with_tolerance_bps(tolerance_bps: u32) -> Self {
        Self {
            tolerance_bps: u128::from(tolerance_bps),
        }
    }

    pub fn reconcile(&self, planned: &[BinDeposit], on_chain: &Position) -> ReconciliationResult {
        let mut result = ReconciliationResult::default();
        let planned_by_bin: BTreeMap<BinId, &BinDeposit> =
            planned.iter().map(|d| (d.bin, d)).collect();

        for (bin, deposit) in &planned_by_bin {
            match on_chain.get(*bin) {
                Some(held) => {
                    if self.close(deposit.amount_x, held.amount_x)
                        && self.close(deposit.amount_y, held.amount_y)
                    {
                        result.matches.push(*bin);
                    } else {
                        result.discrepancies.push(BinDiscrepancy {
                            bin: *bin,
                            planned_x: deposit.amount_x,
                            planned_y: deposit.amount_y,
                            on_chain_x: held.amount_x,
                            on_chain_y: held.amount_y,
                        });
                    }
                }
                None => result.missing_on_chain.push(*bin),
            }
        }

        result.unexpected_on_chain = on_chain
            .occupied_bins()
            .into_iter()
            .filter(|b| !planned_by_bin.contains_key(b))
            .collect();

        self.log(&result);
        result
    }

    /// Amounts within tolerance of the planned value; on-chain may exceed it
    fn close(&self, planned: u128, on_chain: u128) -> bool {
        if on_chain >= planned {
            return true;
        }
        let shortfall = planned - on_chain;
        shortfall.saturating_mul(10_000) <= planned.saturating_mul(self.tolerance_bps)
    }

    fn log(&self, result: &ReconciliationResult) {
        info!(
            "Reconciliation: {} matched, {} discrepancies, {} missing, {} unexpected",
            result.matches.len(),
            result.discrepancies.len(),
            result.missing_on_chain.len(),
            result.unexpected_on_chain.len()
        );
        for d in &result.discrepancies {
            warn!(
                "Bin {} drift: planned=({}, {}), on-chain=({}, {})",
                d.bin, d.planned_x, d.planned_y, d.on_chain_x, d.on_chain_y
            );
        }
        for bin in &result.missing_on_chain {
            warn!("Bin {} planned but empty on-chain", bin);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BinLiquidity;

    fn deposit(bin: i32, x: u128, y: u128) -> BinDeposit {
        BinDeposit {
            bin: BinId(bin),
            amount_x: x,
            amount_y: y,
        }
    }

    #[test]
    fn test_clean_reconciliation() {
        let planned = vec![deposit(99, 0, 100), deposit(100, 100, 100)];
        let chain = Position::from_bins(vec![
            BinLiquidity::new(BinId(99), 0, 100),
            BinLiquidity::new(BinId(100), 100, 100),
        ]);
        let result = PositionReconciler::default().reconcile(&planned, &chain);
        assert!(result.is_clean());
        assert_eq!(result.matches, vec![BinId(99), BinId(100)]);
    }

    #[test]
    fn test_detects_drift_missing_and_unexpected() {
        let planned = vec![deposit(99, 0, 1000), deposit(100, 1000, 1000)];
        let chain = Position::from_bins(vec![
            BinLiquidity::new(BinId(100), 500, 1000),
            BinLiquidity::new(BinId(104), 1, 1),
        ]);
        let result = PositionReconciler::default().reconcile(&planned, &chain);
        assert_eq!(result.missing_on_chain, vec![BinId(99)]);
        assert_eq!(result.discrepancies.len(), 1);
        assert_eq!(result.discrepancies[0].on_chain_x, 500);
        assert_eq!(result.unexpected_on_chain, vec![BinId(104)]);
    }

    #[test]
    fn test_small_shortfall_within_tolerance() {
        let planned = vec![deposit(100, 10_000, 0)];
        let chain = Position::from_bins(vec![BinLiquidity::new(BinId(100), 9_950, 0)]);
        assert!(PositionReconciler::with_tolerance_bps(100)
            .reconcile(&planned, &chain)
            .is_clean());
        assert!(!PositionReconciler::with_tolerance_bps(0)
            .reconcile(&planned, &chain)
            .is_clean());
    }
}
