use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::Config;
use crate::flow::{FlowSettings, SellFlow};
use crate::journal::FileTxJournal;
use crate::network::{JupiterClient, RpcConfirmer};
use crate::pending::{PendingStore, SellLocks};
use crate::store::FileUserStore;
use crate::swap::{SwapExecutor, NATIVE_MINT};
use crate::util::format::format_bps_percent;
use crate::util::logging::redact_url;
use crate::wallet::PassphraseVault;

const MAX_PURGE_INTERVAL_SECS: u64 = 60;

pub struct App {
    pub flow: Arc<SellFlow>,
    pub pending: Arc<PendingStore>,
}

/// Builds the real collaborators from config and wires them into a [`SellFlow`].
pub fn build(cfg: &Config) -> Result<App> {
    let rpc_http = reqwest::Client::builder()
        .no_proxy()
        .connect_timeout(cfg.rpc_connect_timeout())
        .timeout(cfg.rpc_request_timeout())
        .build()
        .context("build rpc http client")?;
    let jupiter_http = reqwest::Client::builder()
        .connect_timeout(cfg.rpc_connect_timeout())
        .build()
        .context("build jupiter http client")?;

    let jupiter = Arc::new(JupiterClient::new(
        jupiter_http,
        &cfg.jupiter.ultra_url,
        &cfg.jupiter.price_url,
        cfg.jupiter_api_key(),
        cfg.request_timeout(),
        cfg.swap_timeout(),
    ));
    let confirmer = Arc::new(RpcConfirmer::new(rpc_http, cfg.http_rpc_url()));
    let journal = Arc::new(FileTxJournal::new(crate::util::paths::default_journal_path()?));
    let executor = Arc::new(SwapExecutor::new(
        jupiter.clone(),
        confirmer,
        journal,
        cfg.sell.commitment,
        cfg.confirm_timeout(),
    ));

    let users_path = cfg.users_path()?;
    let users = Arc::new(FileUserStore::new(users_path.clone()));
    let vault = Arc::new(PassphraseVault::new(cfg.account.encryption_key.clone()));
    let pending = Arc::new(PendingStore::new(cfg.pending_ttl()));

    let flow = SellFlow::new(
        users,
        vault,
        jupiter,
        executor,
        pending.clone(),
        SellLocks::new(),
        FlowSettings {
            slippage_bps: cfg.sell.slippage_bps,
            output_mint: NATIVE_MINT.to_string(),
        },
    );
    info!(
        event = "app_ready",
        rpc = %redact_url(&cfg.http_rpc_url()),
        ultra = %redact_url(&cfg.jupiter.ultra_url),
        users = %users_path.display(),
        slippage = %format_bps_percent(cfg.sell.slippage_bps),
        commitment = cfg.sell.commitment.as_str()
    );
    Ok(App {
        flow: Arc::new(flow),
        pending,
    })
}

fn purge_interval(ttl: Duration) -> Duration {
    ttl.min(Duration::from_secs(MAX_PURGE_INTERVAL_SECS))
        .max(Duration::from_secs(1))
}

/// Sweeps abandoned custom-amount prompts so the store does not grow unbounded.
pub fn spawn_pending_purge(pending: Arc<PendingStore>, ttl: Duration) -> JoinHandle<()> {
    let mut ticker = tokio::time::interval(purge_interval(ttl));
    tokio::spawn(async move {
        loop {
            ticker.tick().await;
            let removed = pending.purge_expired();
            if removed > 0 {
                debug!(event = "pending_purged", removed, remaining = pending.len());
            }
        }
    })
}

pub async fn run(cfg: Config, user_id: &str) -> Result<()> {
    let app = build(&cfg)?;
    let purge = spawn_pending_purge(app.pending.clone(), cfg.pending_ttl());
    let result = crate::console::run(app.flow, user_id).await;
    purge.abort();
    result
}
