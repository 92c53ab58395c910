//! Backend health store
//!
//! Tracks availability and consecutive errors per backend, decides when a
//! suspended backend gets a recovery probe, and persists everything to
//! `health.json`.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::HealthConfig;
use crate::error::{FailureKind, Result};
use crate::persist;

use super::registry::BackendRegistry;

/// Persisted health of one backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendHealth {
    pub available: bool,
    #[serde(default)]
    pub last_check: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Scheduled attempts seen by the gate, drives the recovery cadence
    #[serde(default)]
    pub attempts: u64,
}

impl Default for BackendHealth {
    fn default() -> Self {
        Self {
            available: true,
            last_check: None,
            error_count: 0,
            last_error: None,
            attempts: 0,
        }
    }
}

impl BackendHealth {
    /// Suspended either by a permanent failure or by crossing the error threshold
    pub fn is_suspended(&self, threshold: u32) -> bool {
        !self.available || self.error_count >= threshold
    }
}

/// Counts for the status view
#[derive(Debug, Clone, Default)]
pub struct HealthSummary {
    pub available: usize,
    pub unavailable: usize,
    /// (backend id, truncated last error), most recently checked first
    pub recent_errors: Vec<(String, String)>,
}

/// Shared, persisted health state
pub struct HealthStore {
    config: HealthConfig,
    records: RwLock<HashMap<String, BackendHealth>>,
    path: Option<PathBuf>,
    /// Serializes writers of the health file
    file_lock: Mutex<()>,
}

impl HealthStore {
    /// In-memory store, never persisted
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            records: RwLock::new(HashMap::new()),
            path: None,
            file_lock: Mutex::new(()),
        }
    }

    /// Load persisted records. A corrupt file is logged and replaced on next persist.
    pub async fn load(path: impl Into<PathBuf>, config: HealthConfig) -> Self {
        let path = path.into();

        let records = match persist::read_json::<HashMap<String, BackendHealth>>(&path).await {
            Ok(Some(records)) => {
                info!("Loaded health for {} backends", records.len());
                records
            }
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!("Ignoring unreadable health file: {}", e);
                HashMap::new()
            }
        };

        Self {
            config,
            records: RwLock::new(records),
            path: Some(path),
            file_lock: Mutex::new(()),
        }
    }

    /// Gate for one scheduled attempt against a backend.
    ///
    /// Healthy backends always pass. A suspended backend only passes when its
    /// attempt counter lands on a multiple of `recovery_every`.
    pub async fn is_available(&self, id: &str) -> bool {
        let mut records = self.records.write().await;
        let entry = records.entry(id.to_string()).or_default();
        entry.attempts += 1;

        if !entry.is_suspended(self.config.error_threshold) {
            return true;
        }

        if entry.attempts % self.config.recovery_every == 0 {
            info!(
                backend = id,
                attempt = entry.attempts,
                "Recovery probe for suspended backend"
            );
            return true;
        }

        false
    }

    /// Read-only view of suspension, does not count as an attempt
    pub async fn is_suspended(&self, id: &str) -> bool {
        let records = self.records.read().await;
        records
            .get(id)
            .map(|h| h.is_suspended(self.config.error_threshold))
            .unwrap_or(false)
    }

    pub async fn record_success(&self, id: &str) {
        let mut records = self.records.write().await;
        let entry = records.entry(id.to_string()).or_default();

        if entry.is_suspended(self.config.error_threshold) {
            info!(backend = id, "Backend recovered");
        }

        entry.available = true;
        entry.error_count = 0;
        entry.last_error = None;
        entry.last_check = Some(Utc::now());
    }

    /// Count a failure. Permanent failures disable the backend outright.
    ///
    /// Returns the new consecutive error count.
    pub async fn record_failure(&self, id: &str, kind: FailureKind, message: &str) -> u32 {
        let mut records = self.records.write().await;
        let entry = records.entry(id.to_string()).or_default();

        entry.error_count = entry.error_count.saturating_add(1);
        entry.last_error = Some(message.to_string());
        entry.last_check = Some(Utc::now());

        match kind {
            FailureKind::Permanent => {
                if entry.available {
                    warn!(backend = id, "Disabling backend: {}", truncate_message(message, 120));
                }
                entry.available = false;
            }
            FailureKind::Transient => {
                if entry.error_count <= self.config.log_repeat_limit {
                    warn!(
                        backend = id,
                        errors = entry.error_count,
                        "Backend error: {}",
                        truncate_message(message, 120)
                    );
                } else {
                    debug!(
                        backend = id,
                        errors = entry.error_count,
                        "Backend error: {}",
                        truncate_message(message, 120)
                    );
                }

                if entry.error_count == self.config.error_threshold {
                    warn!(
                        backend = id,
                        "Suspending backend after {} consecutive errors", entry.error_count
                    );
                }
            }
        }

        entry.error_count
    }

    pub async fn get(&self, id: &str) -> Option<BackendHealth> {
        self.records.read().await.get(id).cloned()
    }

    pub async fn snapshot(&self) -> HashMap<String, BackendHealth> {
        self.records.read().await.clone()
    }

    /// Availability counts over every registry backend
    pub async fn summary(&self, registry: &BackendRegistry) -> HealthSummary {
        let records = self.records.read().await;
        let mut summary = HealthSummary::default();
        let mut errors: Vec<(DateTime<Utc>, String, String)> = Vec::new();

        for backend in registry.all() {
            match records.get(&backend.id) {
                Some(h) if h.is_suspended(self.config.error_threshold) => summary.unavailable += 1,
                _ => summary.available += 1,
            }

            if let Some(h) = records.get(&backend.id) {
                if let (Some(err), Some(at)) = (&h.last_error, h.last_check) {
                    errors.push((at, backend.id.clone(), truncate_message(err, 60)));
                }
            }
        }

        errors.sort_by(|a, b| b.0.cmp(&a.0));
        summary.recent_errors = errors.into_iter().map(|(_, id, err)| (id, err)).collect();
        summary
    }

    /// Write all records to disk. No-op for in-memory stores.
    pub async fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _guard = self.file_lock.lock().await;
        let snapshot = self.snapshot().await;
        persist::write_json_atomic(path, &snapshot).await
    }

    /// Persist, logging instead of propagating failures
    pub async fn persist_or_warn(&self) {
        if let Err(e) = self.persist().await {
            warn!("Failed to persist backend health: {}", e);
        }
    }
}

/// Shorten a message for display without splitting a character
pub fn truncate_message(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message.to_string();
    }
    let cut: String = message.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", cut)
}
