//! Network collaborator boundary
//!
//! Everything the agent knows about the chain comes through `LbClient`.
//! Implementations are bound to one pool and one owner at construction.

use rust_decimal::Decimal;

use crate::error::Result;
use crate::types::{BinId, BinLiquidity, Confirmation, TokenBalances, Transaction};

#[async_trait::async_trait]
pub trait LbClient: Send + Sync {
    /// Bin currently absorbing trades
    async fn active_bin(&self) -> Result<BinId>;

    /// Raw token-Y per raw token-X at `bin`
    async fn bin_price(&self, bin: BinId) -> Result<Decimal>;

    /// Owner's liquidity per bin
    async fn position(&self) -> Result<Vec<BinLiquidity>>;

    /// Owner's native gas-asset balance
    async fn gas_balance(&self) -> Result<u128>;

    /// Owner's wallet holdings of the pool tokens
    async fn token_balances(&self) -> Result<TokenBalances>;

    async fn estimate_gas(&self, tx: &Transaction) -> Result<u128>;

    /// Submit and wait for on-chain confirmation
    async fn submit(&self, tx: &Transaction) -> Result<Confirmation>;

    /// Steps that may share one transaction (multicall); 1 means no batching
    fn max_batch_size(&self) -> usize {
        1
    }

    fn name(&self) -> &str;
}
