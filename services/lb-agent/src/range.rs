//! Range policy - is the position inside the reward range, and where should it go
//!
//! Evaluation uses the wide reward range (±2 by default) while repositioning
//! targets the narrow window (±1). A position left at {B-1, B, B+1} therefore
//! survives the active bin stepping by one and returning.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::types::{BinId, Position};

pub const DEFAULT_REWARD_HALF_WIDTH: u32 = 2;
pub const DEFAULT_TARGET_HALF_WIDTH: u32 = 1;

/// Closed interval [lower, upper] of reward-eligible bins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RewardRange {
    pub lower: BinId,
    pub upper: BinId,
}

impl RewardRange {
    pub fn around(active: BinId, half_width: u32) -> Self {
        let w = half_width as i32;
        Self {
            lower: active.offset(-w),
            upper: active.offset(w),
        }
    }

    pub fn contains(&self, bin: BinId) -> bool {
        bin >= self.lower && bin <= self.upper
    }
}

/// Result of evaluating a position against an active bin
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RangeEvaluation {
    /// True iff every occupied bin lies in the reward range (vacuous for empty)
    pub in_range: bool,
    pub reward_range: RewardRange,
    pub target_bins: BTreeSet<BinId>,
}

/// Pure, deterministic range policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangePolicy {
    reward_half_width: u32,
    target_half_width: u32,
}

impl Default for RangePolicy {
    fn default() -> Self {
        Self {
            reward_half_width: DEFAULT_REWARD_HALF_WIDTH,
            target_half_width: DEFAULT_TARGET_HALF_WIDTH,
        }
    }
}

impl RangePolicy {
    /// Target width is clamped to the reward width so a freshly placed
    /// position is always in range.
    pub fn new(reward_half_width: u32, target_half_width: u32) -> Self {
        Self {
            reward_half_width,
            target_half_width: target_half_width.min(reward_half_width),
        }
    }

    pub fn reward_half_width(&self) -> u32 {
        self.reward_half_width
    }

    pub fn target_half_width(&self) -> u32 {
        self.target_half_width
    }

    /// Same reward range, different target window (clamped)
    pub fn with_target_half_width(&self, target_half_width: u32) -> Self {
        Self::new(self.reward_half_width, target_half_width)
    }

    pub fn evaluate(&self, position: &Position, active: BinId) -> RangeEvaluation {
        let reward_range = RewardRange::around(active, self.reward_half_width);
        let in_range = position.iter().all(|b| reward_range.contains(b.bin));

        RangeEvaluation {
            in_range,
            reward_range,
            target_bins: self.target_bins(active),
        }
    }

    /// Symmetric window centred on the active bin
    pub fn target_bins(&self, active: BinId) -> BTreeSet<BinId> {
        let w = self.target_half_width as i32;
        (-w..=w).map(|d| active.offset(d)).collect()
    }
}
