//! Pool state reader - one fresh, validated snapshot per cycle

use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::client::LbClient;
use crate::error::{AgentError, Result};
use crate::types::{PoolSnapshot, Position};

pub struct PoolStateReader {
    client: Arc<dyn LbClient>,
}

impl PoolStateReader {
    pub fn new(client: Arc<dyn LbClient>) -> Self {
        Self { client }
    }

    /// Read active bin, price, position and balances.
    ///
    /// `expect_position` is set when the previous cycle confirmed a deposit;
    /// an empty position then means the read is not trustworthy.
    pub async fn read(&self, expect_position: bool) -> Result<PoolSnapshot> {
        let active_bin = self.client.active_bin().await?;
        let active_price = self.client.bin_price(active_bin).await?;
        let raw_bins = self.client.position().await?;
        let gas_balance = self.client.gas_balance().await?;
        let wallet = self.client.token_balances().await?;

        if active_price <= Decimal::ZERO {
            return Err(AgentError::invariant(format!(
                "non-positive price {} at active bin {}",
                active_price, active_bin
            )));
        }

        let mut seen = HashSet::with_capacity(raw_bins.len());
        for entry in &raw_bins {
            if !seen.insert(entry.bin) {
                return Err(AgentError::invariant(format!(
                    "bin {} reported twice in position",
                    entry.bin
                )));
            }
        }

        let position = Position::from_bins(raw_bins);
        if expect_position && position.is_empty() {
            return Err(AgentError::invariant(format!(
                "active bin {} read but no position data where a deposit was confirmed",
                active_bin
            )));
        }

        debug!(
            "Snapshot: active={} price={} bins={} gas={} wallet=({}, {})",
            active_bin,
            active_price,
            position.occupied_bins().len(),
            gas_balance,
            wallet.x,
            wallet.y
        );

        Ok(PoolSnapshot {
            active_bin,
            active_price,
            position,
            gas_balance,
            wallet,
        })
    }
}
