//! Paper pool - in-memory Liquidity-Book pool and wallet
//!
//! Backs paper mode and the test harness. Transactions apply atomically:
//! every step in a batch lands or none does, and gas is charged per step
//! from the native balance.

use rand::Rng;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use crate::amount::{raw_string, to_decimal, to_raw_floor};
use crate::bin_math::{price_from_id, price_relative};
use crate::client::LbClient;
use crate::error::{AgentError, Result};
use crate::types::{
    Action, BinId, BinLiquidity, Confirmation, TokenBalances, TokenSide, Transaction,
};

/// Starting state of a paper pool
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PaperPoolConfig {
    pub start_bin: i32,
    pub bin_step: u16,
    /// Raw token-Y per raw token-X at `start_bin`; unset uses the
    /// Liquidity-Book price of `start_bin`
    pub anchor_price: Option<Decimal>,
    #[serde(with = "raw_string")]
    pub wallet_x: u128,
    #[serde(with = "raw_string")]
    pub wallet_y: u128,
    #[serde(with = "raw_string")]
    pub native_balance: u128,
    #[serde(with = "raw_string")]
    pub gas_per_step: u128,
    pub gas_token: Option<TokenSide>,
    pub max_batch_size: usize,
    /// Output shortfall applied to every swap, in bps
    pub swap_haircut_bps: u32,
    pub drift_max_bins: u32,
}

impl PaperPoolConfig {
    /// Price at `start_bin`; `None` when unset and the bin id is too far from
    /// the Liquidity-Book origin to price
    pub fn anchor(&self) -> Option<Decimal> {
        self.anchor_price
            .or_else(|| price_from_id(BinId(self.start_bin), self.bin_step))
    }
}

impl Default for PaperPoolConfig {
    fn default() -> Self {
        Self {
            start_bin: crate::bin_math::ID_OFFSET,
            bin_step: 25,
            anchor_price: None,
            wallet_x: 10_000_000_000,
            wallet_y: 10_000_000_000,
            // 5 AVAX
            native_balance: 5_000_000_000_000_000_000,
            // 0.01 AVAX per step
            gas_per_step: 10_000_000_000_000_000,
            gas_token: None,
            max_batch_size: 1,
            swap_haircut_bps: 0,
            drift_max_bins: 3,
        }
    }
}

#[derive(Debug, Clone)]
struct Ledger {
    active_bin: BinId,
    wallet: TokenBalances,
    native: u128,
    bins: BTreeMap<BinId, (u128, u128)>,
}

#[derive(Debug)]
struct Inner {
    ledger: Ledger,
    submissions: usize,
    fail_on_submission: Option<usize>,
}

pub struct PaperPool {
    anchor_bin: BinId,
    anchor_price: Decimal,
    bin_step: u16,
    gas_per_step: u128,
    gas_token: Option<TokenSide>,
    max_batch_size: usize,
    swap_haircut_bps: u32,
    drift_max_bins: u32,
    inner: Mutex<Inner>,
}

impl PaperPool {
    pub fn new(config: PaperPoolConfig) -> Self {
        let mut wallet = TokenBalances {
            x: config.wallet_x,
            y: config.wallet_y,
        };
        // When a pool token is the gas asset, its wallet balance *is* the native balance
        match config.gas_token {
            Some(TokenSide::X) => wallet.x = config.native_balance,
            Some(TokenSide::Y) => wallet.y = config.native_balance,
            None => {}
        }

        Self {
            anchor_bin: BinId(config.start_bin),
            // Synthetic test ids far from the origin trade at par
            anchor_price: config.anchor().unwrap_or(Decimal::ONE),
            bin_step: config.bin_step,
            gas_per_step: config.gas_per_step,
            gas_token: config.gas_token,
            max_batch_size: config.max_batch_size.max(1),
            swap_haircut_bps: config.swap_haircut_bps,
            drift_max_bins: config.drift_max_bins,
            inner: Mutex::new(Inner {
                ledger: Ledger {
                    active_bin: BinId(config.start_bin),
                    wallet,
                    native: config.native_balance,
                    bins: BTreeMap::new(),
                },
                submissions: 0,
                fail_on_submission: None,
            }),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| AgentError::invariant("paper pool lock poisoned"))
    }

    pub fn set_active_bin(&self, bin: BinId) -> Result<()> {
        self.state()?.ledger.active_bin = bin;
        Ok(())
    }

    /// Place liquidity directly, bypassing the wallet
    pub fn seed_position(&self, bins: impl IntoIterator<Item = BinLiquidity>) -> Result<()> {
        let mut inner = self.state()?;
        for b in bins {
            inner.ledger.bins.insert(b.bin, (b.amount_x, b.amount_y));
        }
        Ok(())
    }

    pub fn set_native_balance(&self, amount: u128) -> Result<()> {
        let mut inner = self.state()?;
        inner.ledger.native = amount;
        match self.gas_token {
            Some(TokenSide::X) => inner.ledger.wallet.x = amount,
            Some(TokenSide::Y) => inner.ledger.wallet.y = amount,
            None => {}
        }
        Ok(())
    }

    /// Reject the Nth submission from now on (1-based, counted over the pool's lifetime)
    pub fn fail_on_submission(&self, n: usize) -> Result<()> {
        self.state()?.fail_on_submission = Some(n);
        Ok(())
    }

    pub fn submissions(&self) -> usize {
        self.state().map(|s| s.submissions).unwrap_or(0)
    }

    pub fn wallet(&self) -> Result<TokenBalances> {
        Ok(self.state()?.ledger.wallet)
    }

    /// Random walk of the active bin by up to `drift_max_bins`
    pub fn drift<R: Rng>(&self, rng: &mut R) -> Result<BinId> {
        let max = self.drift_max_bins as i32;
        let step = if max == 0 { 0 } else { rng.gen_range(-max..=max) };
        let mut inner = self.state()?;
        let next = inner.ledger.active_bin.offset(step);
        if step != 0 {
            debug!("Paper active bin drift: {} -> {}", inner.ledger.active_bin, next);
        }
        inner.ledger.active_bin = next;
        Ok(next)
    }

    fn price_at(&self, bin: BinId) -> Result<Decimal> {
        price_relative(bin, self.anchor_bin, self.anchor_price, self.bin_step).ok_or_else(|| {
            AgentError::invariant(format!("price of bin {} not representable", bin))
        })
    }

    fn credit(&self, ledger: &mut Ledger, side: TokenSide, amount: u128) {
        match side {
            TokenSide::X => ledger.wallet.x = ledger.wallet.x.saturating_add(amount),
            TokenSide::Y => ledger.wallet.y = ledger.wallet.y.saturating_add(amount),
        }
        if self.gas_token == Some(side) {
            ledger.native = ledger.native.saturating_add(amount);
        }
    }

    fn debit(&self, ledger: &mut Ledger, side: TokenSide, amount: u128) -> std::result::Result<(), String> {
        let balance = ledger.wallet.get(side);
        let left = balance
            .checked_sub(amount)
            .ok_or_else(|| format!("insufficient {:?} balance: have {}, need {}", side, balance, amount))?;
        match side {
            TokenSide::X => ledger.wallet.x = left,
            TokenSide::Y => ledger.wallet.y = left,
        }
        if self.gas_token == Some(side) {
            ledger.native = ledger.native.saturating_sub(amount);
        }
        Ok(())
    }

    fn apply(&self, ledger: &mut Ledger, action: &Action) -> std::result::Result<(), String> {
        match action {
            Action::Withdraw { bins } => {
                for bin in bins {
                    let (x, y) = ledger
                        .bins
                        .remove(bin)
                        .ok_or_else(|| format!("bin {} has no liquidity to withdraw", bin))?;
                    self.credit(ledger, TokenSide::X, x);
                    self.credit(ledger, TokenSide::Y, y);
                }
            }
            Action::Swap {
                token_in,
                token_out,
                amount_in,
                min_amount_out,
            } => {
                if token_in == token_out {
                    return Err("swap token_in equals token_out".to_string());
                }
                let price = self.price_at(ledger.active_bin).map_err(|e| e.to_string())?;
                let gross = to_decimal(*amount_in).ok_or("amount_in not representable")?;
                let gross_out = match token_in {
                    TokenSide::X => gross * price,
                    TokenSide::Y => gross / price,
                };
                let net = gross_out * Decimal::from(10_000 - self.swap_haircut_bps.min(10_000))
                    / Decimal::from(10_000);
                let out = to_raw_floor(net).ok_or("amount_out not representable")?;
                if out < *min_amount_out {
                    return Err(format!("slippage: out {} < min {}", out, min_amount_out));
                }
                self.debit(ledger, *token_in, *amount_in)?;
                self.credit(ledger, *token_out, out);
            }
            Action::Deposit { deposits } => {
                for d in deposits {
                    self.debit(ledger, TokenSide::X, d.amount_x)?;
                    self.debit(ledger, TokenSide::Y, d.amount_y)?;
                    let entry = ledger.bins.entry(d.bin).or_insert((0, 0));
                    entry.0 = entry.0.saturating_add(d.amount_x);
                    entry.1 = entry.1.saturating_add(d.amount_y);
                }
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl LbClient for PaperPool {
    async fn active_bin(&self) -> Result<BinId> {
        Ok(self.state()?.ledger.active_bin)
    }

    async fn bin_price(&self, bin: BinId) -> Result<Decimal> {
        self.price_at(bin)
    }

    async fn position(&self) -> Result<Vec<BinLiquidity>> {
        Ok(self
            .state()?
            .ledger
            .bins
            .iter()
            .map(|(bin, (x, y))| BinLiquidity::new(*bin, *x, *y))
            .collect())
    }

    async fn gas_balance(&self) -> Result<u128> {
        Ok(self.state()?.ledger.native)
    }

    async fn token_balances(&self) -> Result<TokenBalances> {
        Ok(self.state()?.ledger.wallet)
    }

    async fn estimate_gas(&self, tx: &Transaction) -> Result<u128> {
        Ok(self.gas_per_step.saturating_mul(tx.steps.len() as u128))
    }

    async fn submit(&self, tx: &Transaction) -> Result<Confirmation> {
        let mut inner = self.state()?;
        inner.submissions += 1;
        if inner.fail_on_submission == Some(inner.submissions) {
            info!("Paper pool injecting failure on submission {}", inner.submissions);
            return Err(AgentError::Rejected {
                step: 0,
                reason: "injected failure".to_string(),
            });
        }

        let mut next = inner.ledger.clone();
        for (i, step) in tx.steps.iter().enumerate() {
            self.apply(&mut next, step)
                .map_err(|reason| AgentError::Rejected { step: i, reason })?;
        }

        let gas_used = self.gas_per_step.saturating_mul(tx.steps.len() as u128);
        next.native = next.native.checked_sub(gas_used).ok_or_else(|| AgentError::Rejected {
            step: 0,
            reason: "out of gas".to_string(),
        })?;
        match self.gas_token {
            Some(TokenSide::X) => next.wallet.x = next.native,
            Some(TokenSide::Y) => next.wallet.y = next.native,
            None => {}
        }

        inner.ledger = next;
        Ok(Confirmation {
            tx_hash: format!("0x{}", Uuid::new_v4().simple()),
            gas_used,
        })
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn name(&self) -> &str {
        "paper"
    }
}
