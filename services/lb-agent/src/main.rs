//! LB Agent - keeps a Liquidity-Book position inside the reward range
//!
//! Each cycle:
//! 1. Reads active bin, position and balances
//! 2. Plans a withdraw/swap/deposit sequence if the position drifted out
//! 3. Refuses anything that would spend the gas reserve
//! 4. Executes strictly in order and records status

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lb_agent::amount::{format_amount, get_token_info};
use lb_agent::{
    AgentConfig, GatewayClient, HttpAdvisor, LbClient, PaperPool, RebalancePlanner, Scheduler,
    StatusWriter, TradingMode,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting LB Agent...");

    let config = AgentConfig::load()?;
    info!("Config: {:?}", config);

    let client: Arc<dyn LbClient> = match config.mode {
        TradingMode::Paper => {
            let pool = Arc::new(PaperPool::new(config.paper.clone()));
            spawn_paper_drift(pool.clone(), Duration::from_secs(config.poll_interval_secs));
            pool
        }
        TradingMode::Live => Arc::new(GatewayClient::new(
            &config.gateway_url,
            &config.pool_address,
            &config.wallet_address,
            config.api_key.clone(),
            Duration::from_secs(config.execution.confirm_timeout_secs),
            config.execution.max_batch_size,
        )?),
    };

    log_wallet(client.as_ref(), &config).await;

    let planner = RebalancePlanner::new(
        config.range_policy(),
        config.gas_guard()?,
        config.planner_config(),
    );

    let mut scheduler = Scheduler::new(
        client,
        planner,
        Duration::from_secs(config.poll_interval_secs),
    )
    .with_mode(config.mode.to_string())
    .with_reconciler(config.reconciler())
    .with_status_writer(StatusWriter::new(&config.status_dir));

    if let Some(url) = &config.advisor.url {
        info!("Advisor enabled at {}", url);
        scheduler = scheduler.with_advisor(Arc::new(HttpAdvisor::new(url, config.advisor.timeout_secs)?));
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested; finishing current cycle");
            let _ = shutdown_tx.send(true);
        }
    });

    scheduler.run(shutdown_rx).await
}

/// Random-walk the paper pool's active bin so paper mode has something to do
fn spawn_paper_drift(pool: Arc<PaperPool>, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let mut rng = rand::thread_rng();
            if let Err(e) = pool.drift(&mut rng) {
                warn!("Paper drift failed: {}", e);
            }
        }
    });
}

async fn log_wallet(client: &dyn LbClient, config: &AgentConfig) {
    let balances = match client.token_balances().await {
        Ok(b) => b,
        Err(e) => {
            warn!("Could not read wallet balances: {}", e);
            return;
        }
    };
    let x = get_token_info(&config.token_x)
        .map(|t| format_amount(balances.x, &t))
        .unwrap_or_else(|| format!("{} {}", balances.x, config.token_x));
    let y = get_token_info(&config.token_y)
        .map(|t| format_amount(balances.y, &t))
        .unwrap_or_else(|| format!("{} {}", balances.y, config.token_y));
    info!("Wallet ({}): {}, {}", client.name(), x, y);
}
