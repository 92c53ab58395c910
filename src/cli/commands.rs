//! CLI command implementations
//!
//! The menu loop and the views it prints. Every view is rendered to a
//! `String` first so it can be checked without a terminal.

use anyhow::{Context, Result};
use dialoguer::{theme::ColorfulTheme, Select};
use std::fmt::Write as _;
use std::io::BufRead;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::backend::health::truncate_message;
use crate::backend::{BackendRegistry, ClientFactory, ConnectionPool, HealthStore, HttpClientFactory};
use crate::config::Config;
use crate::sweep::{ActivityProbe, BalanceSweeper, ScheduleController, ScheduleSettings, SweepSettings};
use crate::wallet::{
    short_address, AccountStore, ImportSummary, LocalSigner, TransactionSigner, TransferLog,
};

const MENU_ITEMS: [&str; 8] = [
    "Import credentials",
    "Start monitoring",
    "Stop monitoring",
    "Status",
    "Diagnostics",
    "Transfer history",
    "Show configuration",
    "Help",
];
const MENU_EXIT: &str = "Exit";

const HISTORY_LIMIT: usize = 20;

/// Wired-up components behind the menu
pub struct App {
    config: Config,
    registry: Arc<BackendRegistry>,
    health: Arc<HealthStore>,
    pool: Arc<ConnectionPool>,
    accounts: Arc<AccountStore>,
    history: Arc<TransferLog>,
    signer: Arc<dyn TransactionSigner>,
    controller: Arc<ScheduleController>,
    monitor: Mutex<Option<JoinHandle<crate::Result<()>>>>,
}

impl App {
    /// Build every component over HTTP JSON-RPC backends
    pub async fn build(config: Config) -> Result<Self> {
        let factory = Arc::new(HttpClientFactory::new(&config.rpc));
        Self::with_factory(config, factory).await
    }

    pub async fn with_factory(config: Config, factory: Arc<dyn ClientFactory>) -> Result<Self> {
        let registry = Arc::new(
            BackendRegistry::from_config(&config.backends)
                .context("Failed to build backend registry")?,
        );
        let destination = config.destination_address()?;

        let health = Arc::new(
            HealthStore::load(config.storage.health_path(), config.health.clone()).await,
        );
        let accounts = Arc::new(
            AccountStore::load(config.storage.accounts_path())
                .await
                .context("Failed to load accounts")?,
        );
        let history = Arc::new(
            TransferLog::load(config.storage.transfers_path())
                .await
                .context("Failed to load transfer history")?,
        );

        let pool = Arc::new(ConnectionPool::new(
            registry.clone(),
            factory,
            config.rpc.liveness_timeout(),
        ));
        let signer: Arc<dyn TransactionSigner> = Arc::new(LocalSigner);

        let probe = ActivityProbe::new(pool.clone(), health.clone(), &config.rpc);
        let sweeper = BalanceSweeper::new(
            registry.clone(),
            pool.clone(),
            health.clone(),
            signer.clone(),
            history.clone(),
            SweepSettings::new(destination, config.sweep.dry_run, &config.rpc),
        );
        let controller = Arc::new(ScheduleController::new(
            ScheduleSettings::new(&config.scan, &config.monitor, config.sweep.network),
            registry.clone(),
            pool.clone(),
            health.clone(),
            accounts.clone(),
            probe,
            sweeper,
        ));

        info!(
            "Ready: {} backends, {} accounts, destination {}",
            registry.len(),
            accounts.len().await,
            destination
        );

        Ok(Self {
            config,
            registry,
            health,
            pool,
            accounts,
            history,
            signer,
            controller,
            monitor: Mutex::new(None),
        })
    }

    /// Prompt loop; returns when the user picks Exit
    pub async fn run_menu(&self) -> Result<()> {
        println!("{}", help_text());

        loop {
            let choice = match prompt_menu().await? {
                Some(choice) => choice,
                None => break,
            };

            match choice {
                0 => {
                    let text = read_pasted_text().await?;
                    let summary = self.import_credentials(&text).await;
                    println!("{}", render_import_summary(&summary));
                }
                1 => {
                    if self.start_monitoring().await {
                        println!("Monitoring started.");
                    } else {
                        println!("Monitoring is already running.");
                    }
                }
                2 => {
                    if self.stop_monitoring().await {
                        println!("Monitoring stopped.");
                    } else {
                        println!("Monitoring is not running.");
                    }
                }
                3 => println!("{}", self.render_status().await),
                4 => println!("{}", self.render_diagnostics().await),
                5 => println!("{}", self.render_history(HISTORY_LIMIT).await),
                6 => println!("{}", self.config.masked_display()),
                _ => println!("{}", help_text()),
            }
        }

        Ok(())
    }

    /// Import credentials found in free text, enabled on the configured network
    pub async fn import_credentials(&self, text: &str) -> ImportSummary {
        let enabled = self.registry.ids_for(self.config.sweep.network);
        self.accounts
            .import_text(text, self.signer.as_ref(), &enabled)
            .await
    }

    /// Spawn a monitoring session. False when one is already running.
    pub async fn start_monitoring(&self) -> bool {
        let mut monitor = self.monitor.lock().await;
        if let Some(handle) = monitor.as_ref() {
            if !handle.is_finished() {
                return false;
            }
        }

        if self.accounts.is_empty().await {
            warn!("No accounts imported; monitoring will idle until the next start");
        }

        let controller = self.controller.clone();
        *monitor = Some(tokio::spawn(async move { controller.run().await }));
        true
    }

    /// Signal the session to stop and wait for it to wind down
    pub async fn stop_monitoring(&self) -> bool {
        let handle = self.monitor.lock().await.take();
        let Some(handle) = handle else {
            return false;
        };

        self.controller.stop().await;
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Monitoring ended with error: {}", e),
            Err(e) => error!("Monitoring task panicked: {}", e),
        }
        true
    }

    /// Stop monitoring if needed, save state and release connections
    pub async fn shutdown(&self) {
        self.stop_monitoring().await;
        self.health.persist_or_warn().await;
        self.accounts.persist_or_warn().await;
        self.pool.close_all();
    }

    pub async fn render_status(&self) -> String {
        let summary = self.health.summary(&self.registry).await;
        let watch_set = self.controller.watch_set().await;
        let mut out = String::new();

        let _ = writeln!(out, "\n=== SWEEPER STATUS ===\n");
        let _ = writeln!(out, "State: {}", self.controller.state().await);
        let _ = writeln!(
            out,
            "Monitoring: {}",
            if self.controller.is_monitoring() { "active" } else { "inactive" }
        );
        if self.controller.sweeper().is_dry_run() {
            let _ = writeln!(out, "Mode: DRY RUN");
        }
        let _ = writeln!(out, "Destination: {}", self.controller.sweeper().destination());
        let _ = writeln!(out, "Accounts: {}", self.accounts.len().await);
        let _ = writeln!(out, "Transfers: {}", self.history.len().await);
        let _ = writeln!(
            out,
            "Backends: {} available, {} unavailable",
            summary.available, summary.unavailable
        );

        let _ = writeln!(out, "\n=== WATCH SET ===\n");
        if watch_set.is_empty() {
            let _ = writeln!(out, "No active accounts.");
        }
        for (address, backends) in &watch_set {
            let _ = writeln!(out, "{}  {}", short_address(address), backends.join(", "));
        }

        if !summary.recent_errors.is_empty() {
            let _ = writeln!(out, "\n=== RECENT ERRORS ===\n");
            for (id, err) in summary.recent_errors.iter().take(5) {
                let _ = writeln!(out, "{:<20} {}", id, err);
            }
        }

        out
    }

    pub async fn render_diagnostics(&self) -> String {
        let snapshot = self.health.snapshot().await;
        let mut out = String::new();

        let _ = writeln!(out, "\n=== BACKEND DIAGNOSTICS ===\n");
        let _ = writeln!(
            out,
            "{:<20} {:<20} {:<6} {:<7} {:<20} {}",
            "ID", "NAME", "UP", "ERRORS", "LAST CHECK", "LAST ERROR"
        );
        let _ = writeln!(out, "{}", "-".repeat(100));

        for backend in self.registry.all() {
            let health = snapshot.get(&backend.id).cloned().unwrap_or_default();
            let suspended = self.health.is_suspended(&backend.id).await;
            let _ = writeln!(
                out,
                "{:<20} {:<20} {:<6} {:<7} {:<20} {}",
                backend.id,
                truncate_message(&backend.name, 20),
                if suspended { "no" } else { "yes" },
                health.error_count,
                health
                    .last_check
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string()),
                health
                    .last_error
                    .as_deref()
                    .map(|e| truncate_message(e, 40))
                    .unwrap_or_default()
            );
        }

        let _ = writeln!(
            out,
            "\nConnected: {} ({})",
            self.pool.len(),
            self.pool.connected_ids().join(", ")
        );
        let _ = writeln!(out, "Scheduler: {}", self.controller.state().await);
        out
    }

    /// Most recent transfers, newest first
    pub async fn render_history(&self, limit: usize) -> String {
        let records = self.history.recent(limit).await;
        let mut out = String::new();

        let _ = writeln!(out, "\n=== TRANSFER HISTORY ===\n");
        if records.is_empty() {
            let _ = writeln!(out, "No transfer history found.");
            return out;
        }

        let _ = writeln!(
            out,
            "{:<20} {:<18} {:<16} {:<15} {}",
            "DATE", "AMOUNT", "BACKEND", "FROM", "TX"
        );
        let _ = writeln!(out, "{}", "-".repeat(100));

        for record in records {
            let _ = writeln!(
                out,
                "{:<20} {:<18} {:<16} {:<15} {}",
                record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                format!("{} {}", record.amount, record.currency),
                record.backend,
                short_address(&record.from),
                record.tx_id
            );
        }
        out
    }
}

pub fn render_import_summary(summary: &ImportSummary) -> String {
    let mut out = format!(
        "Found {} credentials: {} imported, {} duplicates, {} invalid",
        summary.found, summary.imported, summary.duplicates, summary.invalid
    );
    for address in &summary.addresses {
        out.push_str(&format!("\n  + {}", address));
    }
    out
}

pub fn help_text() -> &'static str {
    r#"
=== CHAIN SWEEPER ===

  Import credentials   paste text containing 64-hex-character keys; end with an empty line
  Start monitoring     scan every account, then sweep active backends on each interval
  Stop monitoring      finish in-flight checks and stop
  Status               monitoring state, backend availability and the watch set
  Diagnostics          per-backend health table
  Transfer history     most recent sweeps
  Show configuration   effective settings, endpoint secrets masked
"#
}

async fn prompt_menu() -> Result<Option<usize>> {
    tokio::task::spawn_blocking(|| -> Result<Option<usize>> {
        let mut items: Vec<&str> = MENU_ITEMS.to_vec();
        items.push(MENU_EXIT);

        let choice = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Select an action")
            .items(&items)
            .default(0)
            .interact_opt()?;

        Ok(choice.filter(|&i| i < MENU_ITEMS.len()))
    })
    .await?
}

async fn read_pasted_text() -> Result<String> {
    println!("Paste credentials, then an empty line:");
    tokio::task::spawn_blocking(|| -> Result<String> {
        let stdin = std::io::stdin();
        let mut text = String::new();
        for line in stdin.lock().lines() {
            let line = line?;
            if line.trim().is_empty() {
                break;
            }
            text.push_str(&line);
            text.push('\n');
        }
        Ok(text)
    })
    .await?
}
