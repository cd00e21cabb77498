//! Gas reserve guard

/// Keeps a fixed quantity of the native gas asset out of every rebalance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasReserveGuard {
    reserve: u128,
}

impl GasReserveGuard {
    pub fn new(reserve: u128) -> Self {
        Self { reserve }
    }

    pub fn reserve(&self) -> u128 {
        self.reserve
    }

    /// True iff `balance - cost >= reserve`; false whenever cost exceeds balance
    pub fn can_afford(&self, balance: u128, cost: u128) -> bool {
        balance
            .checked_sub(cost)
            .map(|left| left >= self.reserve)
            .unwrap_or(false)
    }
}
