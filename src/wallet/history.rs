//! Transfer log
//!
//! Append-only record of completed sweeps, capped at the most recent
//! `MAX_TRANSFER_RECORDS` entries and saved after every append.

use std::collections::VecDeque;
use std::path::PathBuf;

use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::error::Result;
use crate::persist;

use super::types::TransferRecord;

pub const MAX_TRANSFER_RECORDS: usize = 1000;

pub struct TransferLog {
    /// Oldest first
    records: RwLock<VecDeque<TransferRecord>>,
    path: Option<PathBuf>,
    file_lock: Mutex<()>,
}

impl TransferLog {
    /// In-memory log, never persisted
    pub fn new() -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            path: None,
            file_lock: Mutex::new(()),
        }
    }

    /// Load transfers.json, keeping only the newest records if it is oversized
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut records: VecDeque<TransferRecord> = persist::read_json::<Vec<TransferRecord>>(&path)
            .await?
            .unwrap_or_default()
            .into();

        while records.len() > MAX_TRANSFER_RECORDS {
            records.pop_front();
        }

        info!("Loaded {} transfer records", records.len());

        Ok(Self {
            records: RwLock::new(records),
            path: Some(path),
            file_lock: Mutex::new(()),
        })
    }

    /// Append a record, evict the oldest past the cap, and save
    pub async fn append(&self, record: TransferRecord) {
        {
            let mut records = self.records.write().await;
            records.push_back(record);
            while records.len() > MAX_TRANSFER_RECORDS {
                records.pop_front();
            }
        }

        if let Err(e) = self.persist().await {
            warn!("Failed to persist transfer log: {}", e);
        }
    }

    /// Most recent records, newest first
    pub async fn recent(&self, limit: usize) -> Vec<TransferRecord> {
        let records = self.records.read().await;
        records.iter().rev().take(limit).cloned().collect()
    }

    /// All records, oldest first
    pub async fn all(&self) -> Vec<TransferRecord> {
        self.records.read().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _guard = self.file_lock.lock().await;
        let snapshot = self.all().await;
        persist::write_json_atomic(path, &snapshot).await
    }
}

impl Default for TransferLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(n: usize) -> TransferRecord {
        TransferRecord {
            id: format!("id-{}", n),
            timestamp: Utc::now(),
            from: "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".to_string(),
            to: "0x000000000000000000000000000000000000dEaD".to_string(),
            amount: "0.049".to_string(),
            amount_wei: "49000000000000000".to_string(),
            backend: "ethereum".to_string(),
            backend_name: "Ethereum".to_string(),
            tx_id: format!("0x{:064x}", n),
            gas_used: 21_000,
            gas_price: "47619047619".to_string(),
            fee_wei: "999999999999000".to_string(),
            currency: "ETH".to_string(),
        }
    }

    #[tokio::test]
    async fn test_cap_evicts_oldest() {
        let log = TransferLog::new();
        for n in 0..=MAX_TRANSFER_RECORDS {
            log.append(record(n)).await;
        }

        assert_eq!(log.len().await, MAX_TRANSFER_RECORDS);
        let all = log.all().await;
        assert_eq!(all[0].id, "id-1");
        assert_eq!(all[MAX_TRANSFER_RECORDS - 1].id, format!("id-{}", MAX_TRANSFER_RECORDS));
    }

    #[tokio::test]
    async fn test_recent_is_newest_first() {
        let log = TransferLog::new();
        for n in 0..5 {
            log.append(record(n)).await;
        }
        let recent: Vec<String> = log.recent(2).await.into_iter().map(|r| r.id).collect();
        assert_eq!(recent, vec!["id-4", "id-3"]);
    }

    #[tokio::test]
    async fn test_persist_round_trip_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transfers.json");

        let log = TransferLog::load(&path).await.unwrap();
        for n in 0..3 {
            log.append(record(n)).await;
        }

        let reloaded = TransferLog::load(&path).await.unwrap();
        assert_eq!(log.all().await, reloaded.all().await);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw.is_array());
        assert_eq!(raw[0]["backendName"], "Ethereum");
        assert_eq!(raw[0]["txId"], format!("0x{:064x}", 0));
    }
}
