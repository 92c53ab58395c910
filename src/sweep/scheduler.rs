//! Monitoring lifecycle
//!
//! Drives one monitoring session through warm-up, the initial activity
//! scan and the periodic sweep loop:
//!
//! ```text
//! Idle -> Initializing -> Scanning -> Watching -> Stopped
//! ```
//!
//! The stop signal is a cancellation token checked between operations, so
//! an in-flight RPC call always finishes (or times out) before the loop exits.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{BackendRegistry, ConnectionPool, HealthStore, NetworkSelection};
use crate::config::{MonitorConfig, ScanConfig};
use crate::error::{Error, Result};
use crate::wallet::{Account, AccountStore};

use super::probe::{ActivityProbe, ActivityResult};
use super::sweeper::{BalanceSweeper, SweepOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Initializing,
    Scanning,
    Watching,
    Stopped,
}

impl std::fmt::Display for MonitorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MonitorState::Idle => "idle",
            MonitorState::Initializing => "initializing",
            MonitorState::Scanning => "scanning",
            MonitorState::Watching => "watching",
            MonitorState::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

/// Account with the backends it showed activity on
#[derive(Debug, Clone)]
pub struct WatchEntry {
    pub account: Account,
    /// Active backend ids in priority order
    pub backends: Vec<String>,
}

/// Counters for one pass over the watch set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundStats {
    pub checked: usize,
    pub swept: usize,
    /// Sweeps computed but not submitted
    pub dry_run: usize,
    pub insufficient: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Scheduling tunables
#[derive(Debug, Clone)]
pub struct ScheduleSettings {
    pub batch_size: usize,
    pub max_concurrent: usize,
    pub batch_delay: Duration,
    pub probe_jitter: Duration,
    pub warmup_backends: usize,
    pub interval: Duration,
    pub network: NetworkSelection,
}

impl ScheduleSettings {
    pub fn new(scan: &ScanConfig, monitor: &MonitorConfig, network: NetworkSelection) -> Self {
        Self {
            batch_size: scan.batch_size.max(1),
            max_concurrent: scan.max_concurrent.max(1),
            batch_delay: scan.batch_delay(),
            probe_jitter: scan.probe_jitter(),
            warmup_backends: scan.warmup_backends,
            interval: monitor.interval(),
            network,
        }
    }
}

pub struct ScheduleController {
    settings: ScheduleSettings,
    registry: Arc<BackendRegistry>,
    pool: Arc<ConnectionPool>,
    health: Arc<HealthStore>,
    accounts: Arc<AccountStore>,
    probe: ActivityProbe,
    sweeper: BalanceSweeper,
    /// Shared cap on concurrent backend operations
    permits: Arc<Semaphore>,
    state: RwLock<MonitorState>,
    /// Keyed by lowercase address
    watch_set: RwLock<BTreeMap<String, WatchEntry>>,
    shutdown: Mutex<CancellationToken>,
    running: AtomicBool,
}

impl ScheduleController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: ScheduleSettings,
        registry: Arc<BackendRegistry>,
        pool: Arc<ConnectionPool>,
        health: Arc<HealthStore>,
        accounts: Arc<AccountStore>,
        probe: ActivityProbe,
        sweeper: BalanceSweeper,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent));
        Self {
            settings,
            registry,
            pool,
            health,
            accounts,
            probe,
            sweeper,
            permits,
            state: RwLock::new(MonitorState::Idle),
            watch_set: RwLock::new(BTreeMap::new()),
            shutdown: Mutex::new(CancellationToken::new()),
            running: AtomicBool::new(false),
        }
    }

    pub async fn state(&self) -> MonitorState {
        *self.state.read().await
    }

    pub fn is_monitoring(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// (address, active backend ids) for every watched account
    pub async fn watch_set(&self) -> Vec<(String, Vec<String>)> {
        self.watch_set
            .read()
            .await
            .values()
            .map(|e| (e.account.address.clone(), e.backends.clone()))
            .collect()
    }

    pub fn sweeper(&self) -> &BalanceSweeper {
        &self.sweeper
    }

    /// Ask the running (or about to run) session to stop at its next checkpoint
    pub async fn stop(&self) {
        if self.is_monitoring() {
            info!("Stop requested");
        }
        self.shutdown.lock().await.cancel();
    }

    async fn set_state(&self, state: MonitorState) {
        let mut current = self.state.write().await;
        if *current != state {
            debug!("Monitor state {} -> {}", *current, state);
            *current = state;
        }
    }

    /// Run one monitoring session until stopped.
    ///
    /// Only one session may run at a time. On exit backend health and
    /// accounts are saved and every pooled connection is closed.
    pub async fn run(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::Internal("Monitoring is already running".to_string()));
        }

        let token = self.shutdown.lock().await.clone();

        info!("Monitoring started");

        self.set_state(MonitorState::Initializing).await;
        self.warm_up(&token).await;

        if !token.is_cancelled() {
            self.set_state(MonitorState::Scanning).await;
            self.scan_all(&token).await;
        }

        if !token.is_cancelled() {
            self.set_state(MonitorState::Watching).await;
            self.watch(&token).await;
        }

        self.health.persist_or_warn().await;
        self.accounts.persist_or_warn().await;
        self.pool.close_all();

        // Fresh signal for the next session
        *self.shutdown.lock().await = CancellationToken::new();

        self.set_state(MonitorState::Stopped).await;
        self.running.store(false, Ordering::SeqCst);
        info!("Monitoring stopped");
        Ok(())
    }

    /// Connect the highest-priority backends ahead of the scan
    pub async fn warm_up(&self, token: &CancellationToken) {
        let candidates = self
            .registry
            .top(self.settings.network, self.settings.warmup_backends);

        let results = join_all(candidates.iter().map(|backend| async move {
            if token.is_cancelled() || self.health.is_suspended(&backend.id).await {
                return None;
            }
            let _permit = self.permits.acquire().await.ok()?;
            Some((backend.id.as_str(), self.pool.get_or_create(&backend.id).await))
        }))
        .await;

        let mut connected = 0;
        for (id, result) in results.into_iter().flatten() {
            match result {
                Ok(_) => {
                    self.health.record_success(id).await;
                    connected += 1;
                }
                Err(e) => {
                    if !matches!(e, Error::UnknownBackend(_)) {
                        self.health
                            .record_failure(id, e.failure_kind(), &e.to_string())
                            .await;
                    }
                }
            }
        }

        info!("Warm-up connected {}/{} backends", connected, candidates.len());
    }

    /// Probe every account on its enabled backends and rebuild the watch set
    pub async fn scan_all(&self, token: &CancellationToken) {
        let accounts = self.accounts.list().await;
        info!("Scanning {} accounts for activity", accounts.len());

        for account in accounts {
            if token.is_cancelled() {
                break;
            }

            let active = self.scan_account(&account, token).await;
            let key = account.address_key();
            let mut watch_set = self.watch_set.write().await;

            if active.is_empty() {
                debug!(address = %account.short_address(), "No activity, not watching");
                watch_set.remove(&key);
            } else {
                info!(
                    address = %account.short_address(),
                    "Active on {} backends: {}",
                    active.len(),
                    active.join(", ")
                );
                watch_set.insert(
                    key,
                    WatchEntry {
                        account,
                        backends: active,
                    },
                );
            }
        }

        self.accounts.persist_or_warn().await;
        self.health.persist_or_warn().await;

        let watched = self.watch_set.read().await.len();
        info!("Scan complete, watching {} accounts", watched);
    }

    /// Active backend ids of one account, in priority order
    pub async fn scan_account(&self, account: &Account, token: &CancellationToken) -> Vec<String> {
        let backends = self.registry.ordered(&account.enabled_backends);
        let mut active = Vec::new();

        for (i, batch) in backends.chunks(self.settings.batch_size).enumerate() {
            if token.is_cancelled() {
                break;
            }
            if i > 0 && !self.settings.batch_delay.is_zero() {
                tokio::time::sleep(self.settings.batch_delay).await;
            }

            let results = join_all(batch.iter().map(|backend| self.probe_one(account, &backend.id)))
                .await;

            for result in results.into_iter().flatten() {
                if !result.skipped {
                    self.accounts
                        .touch(&account.address, &result.backend_id, Utc::now())
                        .await;
                }
                if result.has_activity {
                    active.push(result.backend_id);
                }
            }
        }

        active
    }

    async fn probe_one(&self, account: &Account, backend_id: &str) -> Option<ActivityResult> {
        let _permit = self.permits.acquire().await.ok()?;
        if !self.settings.probe_jitter.is_zero() {
            tokio::time::sleep(self.settings.probe_jitter).await;
        }
        Some(self.probe.probe(account, backend_id).await)
    }

    async fn watch(&self, token: &CancellationToken) {
        loop {
            let stats = self.sweep_round(token).await;
            debug!(
                checked = stats.checked,
                swept = stats.swept,
                dry_run = stats.dry_run,
                failed = stats.failed,
                "Sweep round complete"
            );
            self.health.persist_or_warn().await;

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.settings.interval) => {}
            }
        }
    }

    /// One pass over the watch set. Accounts are handled one at a time.
    pub async fn sweep_round(&self, token: &CancellationToken) -> RoundStats {
        let entries: Vec<WatchEntry> = self.watch_set.read().await.values().cloned().collect();
        let mut stats = RoundStats::default();

        'accounts: for entry in entries {
            for backend_id in &entry.backends {
                if token.is_cancelled() {
                    break 'accounts;
                }

                let Ok(_permit) = self.permits.acquire().await else {
                    break 'accounts;
                };

                stats.checked += 1;
                match self.sweeper.check_and_sweep(&entry.account, backend_id).await {
                    SweepOutcome::Swept { .. } => stats.swept += 1,
                    SweepOutcome::DryRun { .. } => stats.dry_run += 1,
                    SweepOutcome::InsufficientForFees { .. } => stats.insufficient += 1,
                    SweepOutcome::Skipped => stats.skipped += 1,
                    SweepOutcome::Failed(_) => stats.failed += 1,
                    SweepOutcome::NoFunds => {}
                }
            }
        }

        if stats.failed > 0 {
            warn!("{} sweep attempts failed this round", stats.failed);
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendDescriptor, NetworkClass};
    use crate::config::{HealthConfig, RpcConfig};
    use crate::rpc::mock::{ConcurrencyGauge, MockChainClient, MockFactory};
    use crate::sweep::sweeper::SweepSettings;
    use crate::wallet::{LocalSigner, TransferLog};
    use alloy::primitives::U256;

    const KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const IDS: [&str; 3] = ["alpha", "beta", "gamma"];

    struct Harness {
        controller: Arc<ScheduleController>,
        factory: Arc<MockFactory>,
        history: Arc<TransferLog>,
        health: Arc<HealthStore>,
    }

    fn registry(ids: &[&str]) -> BackendRegistry {
        BackendRegistry::from_descriptors(
            ids.iter()
                .enumerate()
                .map(|(i, id)| BackendDescriptor {
                    id: id.to_string(),
                    name: id.to_uppercase(),
                    chain_id: 1000 + i as u64,
                    currency: "ETH".to_string(),
                    rpc_url: format!("http://{}.invalid", id),
                    network: NetworkClass::Mainnet,
                    priority: i as u32 + 1,
                })
                .collect(),
        )
    }

    fn scan_config() -> ScanConfig {
        ScanConfig {
            batch_size: 2,
            max_concurrent: 2,
            batch_delay_ms: 1,
            probe_jitter_ms: 0,
            warmup_backends: 2,
        }
    }

    async fn harness(factory: MockFactory, dir: &std::path::Path) -> Harness {
        harness_with(factory, dir, &IDS, scan_config(), false).await
    }

    async fn harness_with(
        factory: MockFactory,
        dir: &std::path::Path,
        ids: &[&str],
        scan: ScanConfig,
        dry_run: bool,
    ) -> Harness {
        let registry = Arc::new(registry(ids));
        let factory = Arc::new(factory);
        let health = Arc::new(HealthStore::load(dir.join("health.json"), HealthConfig::default()).await);
        let pool = Arc::new(ConnectionPool::new(
            registry.clone(),
            factory.clone(),
            Duration::from_millis(200),
        ));
        let accounts = Arc::new(AccountStore::load(dir.join("accounts.json")).await.unwrap());
        let enabled: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
        accounts.import_text(KEY, &LocalSigner, &enabled).await;

        let history = Arc::new(TransferLog::new());
        let rpc = RpcConfig {
            retry_step_ms: 1,
            probe_timeout_ms: 200,
            ..RpcConfig::default()
        };

        let probe = ActivityProbe::new(pool.clone(), health.clone(), &rpc);
        let sweeper = BalanceSweeper::new(
            registry.clone(),
            pool.clone(),
            health.clone(),
            Arc::new(LocalSigner),
            history.clone(),
            SweepSettings::new(
                "0x000000000000000000000000000000000000dEaD".parse().unwrap(),
                dry_run,
                &rpc,
            ),
        );

        let mut settings =
            ScheduleSettings::new(&scan, &MonitorConfig::default(), NetworkSelection::Mainnet);
        settings.interval = Duration::from_millis(10);

        let controller = Arc::new(ScheduleController::new(
            settings,
            registry,
            pool,
            health.clone(),
            accounts,
            probe,
            sweeper,
        ));

        Harness {
            controller,
            factory,
            history,
            health,
        }
    }

    async fn wait_for<F: Fn() -> bool>(check: F) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_fresh_account_not_watched() {
        let dir = tempfile::tempdir().unwrap();
        let factory = IDS
            .iter()
            .fold(MockFactory::new(), |f, id| f.with(id, MockChainClient::new()));
        let h = harness(factory, dir.path()).await;

        h.controller.scan_all(&CancellationToken::new()).await;

        assert!(h.controller.watch_set().await.is_empty());
        assert_eq!(h.controller.sweep_round(&CancellationToken::new()).await.checked, 0);
        assert!(h.history.is_empty().await);
    }

    #[tokio::test]
    async fn test_scan_keeps_priority_order_and_skips_dead_backend() {
        let dir = tempfile::tempdir().unwrap();
        // "beta" has no client: its factory fails with a resolver error
        let factory = MockFactory::new()
            .with("alpha", MockChainClient::new().with_nonce(1))
            .with("gamma", MockChainClient::new().with_balance(U256::from(1u64)));
        let h = harness(factory, dir.path()).await;

        h.controller.scan_all(&CancellationToken::new()).await;

        let watched = h.controller.watch_set().await;
        assert_eq!(watched.len(), 1);
        assert_eq!(watched[0].1, vec!["alpha".to_string(), "gamma".to_string()]);
        assert!(h.health.is_suspended("beta").await);
        assert!(dir.path().join("health.json").exists());
    }

    #[tokio::test]
    async fn test_run_sweeps_active_account_then_stops() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MockFactory::new()
            .with("alpha", MockChainClient::new())
            .with(
                "beta",
                MockChainClient::new()
                    .with_balance(U256::from(50_000_000_000_000_000u64))
                    .draining(),
            )
            .with("gamma", MockChainClient::new());
        let h = harness(factory, dir.path()).await;

        let runner = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.run().await })
        };

        let history = h.history.clone();
        let client = h.factory.client("beta");
        wait_for(|| client.sent_count() > 0).await;
        // Let a few more rounds go by; the drained balance is not swept again
        tokio::time::sleep(Duration::from_millis(50)).await;

        h.controller.stop().await;
        runner.await.unwrap().unwrap();

        assert_eq!(client.sent_count(), 1);
        assert_eq!(history.len().await, 1);
        assert_eq!(h.controller.state().await, MonitorState::Stopped);
        assert!(!h.controller.is_monitoring());
        assert!(dir.path().join("accounts.json").exists());
    }

    #[tokio::test]
    async fn test_second_run_rejected_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let factory = IDS
            .iter()
            .fold(MockFactory::new(), |f, id| f.with(id, MockChainClient::new()));
        let h = harness(factory, dir.path()).await;

        let runner = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.run().await })
        };
        wait_for(|| h.controller.is_monitoring()).await;

        assert!(h.controller.run().await.is_err());

        h.controller.stop().await;
        runner.await.unwrap().unwrap();
        assert_eq!(h.controller.state().await, MonitorState::Stopped);
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_scan() {
        let dir = tempfile::tempdir().unwrap();
        let factory = IDS.iter().fold(MockFactory::new(), |f, id| {
            f.with(id, MockChainClient::new().with_nonce(1))
        });
        let h = harness(factory, dir.path()).await;

        let token = CancellationToken::new();
        token.cancel();
        h.controller.scan_all(&token).await;

        assert!(h.controller.watch_set().await.is_empty());
        assert_eq!(h.factory.client("alpha").call_count(), 0);
    }

    #[tokio::test]
    async fn test_scan_respects_concurrency_cap_and_batches() {
        const WIDE: [&str; 6] = ["a1", "a2", "a3", "a4", "a5", "a6"];

        for (batch_size, expected_batches) in [(3, 2), (2, 3)] {
            let dir = tempfile::tempdir().unwrap();
            let gauge = ConcurrencyGauge::new();
            let factory = WIDE.iter().fold(MockFactory::new(), |f, id| {
                f.with(
                    id,
                    MockChainClient::new()
                        .with_balance_delay(Duration::from_millis(30))
                        .with_gauge(gauge.clone()),
                )
            });
            let scan = ScanConfig {
                batch_size,
                max_concurrent: 2,
                batch_delay_ms: 80,
                probe_jitter_ms: 0,
                warmup_backends: 0,
            };
            let h = harness_with(factory, dir.path(), &WIDE, scan, false).await;

            h.controller.scan_all(&CancellationToken::new()).await;

            assert_eq!(gauge.peak(), 2, "batch_size {}", batch_size);
            assert_eq!(
                gauge.bursts(Duration::from_millis(40)),
                expected_batches,
                "batch_size {}",
                batch_size
            );
            for id in WIDE {
                assert_eq!(h.factory.client(id).balance_calls.load(Ordering::SeqCst), 1);
            }
        }
    }

    #[tokio::test]
    async fn test_dry_run_round_counted_separately() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MockFactory::new()
            .with("alpha", MockChainClient::new())
            .with(
                "beta",
                MockChainClient::new().with_balance(U256::from(50_000_000_000_000_000u64)),
            )
            .with("gamma", MockChainClient::new());
        let h = harness_with(factory, dir.path(), &IDS, scan_config(), true).await;

        h.controller.scan_all(&CancellationToken::new()).await;
        let stats = h.controller.sweep_round(&CancellationToken::new()).await;

        assert_eq!(stats.checked, 1);
        assert_eq!(stats.dry_run, 1);
        assert_eq!(stats.swept, 0);
        assert_eq!(h.factory.client("beta").sent_count(), 0);
        assert!(h.history.is_empty().await);
    }
}
