//! Account registry
//!
//! Loads and saves accounts.json and imports credentials pasted as free text.

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use regex::Regex;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::persist;

use super::signer::TransactionSigner;
use super::types::{Account, Credential};

lazy_static::lazy_static! {
    /// 64 hex characters, optionally 0x-prefixed, not part of a longer hex run
    static ref CREDENTIAL_PATTERN: Regex =
        Regex::new(r"\b(?:0[xX])?([0-9a-fA-F]{64})\b").expect("static regex");
}

/// Outcome of an import
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Distinct candidate tokens in the text
    pub found: usize,
    pub imported: usize,
    /// Already present (by address, case-insensitive)
    pub duplicates: usize,
    /// Tokens that did not yield an address
    pub invalid: usize,
    /// Addresses of newly imported accounts
    pub addresses: Vec<String>,
}

/// Pull distinct credential candidates out of arbitrary text
pub fn extract_credentials(text: &str) -> Vec<Credential> {
    let mut seen = HashSet::new();
    CREDENTIAL_PATTERN
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| Credential::new(m.as_str()))
        .filter(|c| seen.insert(c.expose().to_string()))
        .collect()
}

/// Persisted list of monitored accounts
pub struct AccountStore {
    accounts: RwLock<Vec<Account>>,
    path: Option<PathBuf>,
    file_lock: Mutex<()>,
}

impl AccountStore {
    /// In-memory store, never persisted
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(Vec::new()),
            path: None,
            file_lock: Mutex::new(()),
        }
    }

    /// Load accounts.json. A missing file is an empty registry.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let accounts: Vec<Account> = persist::read_json(&path).await?.unwrap_or_default();

        info!("Loaded {} accounts", accounts.len());

        Ok(Self {
            accounts: RwLock::new(accounts),
            path: Some(path),
            file_lock: Mutex::new(()),
        })
    }

    pub async fn list(&self) -> Vec<Account> {
        self.accounts.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.accounts.read().await.is_empty()
    }

    /// Import every valid credential found in `text`.
    ///
    /// Each new account is enabled on `enabled_backends`. The registry is
    /// saved when anything was added.
    pub async fn import_text(
        &self,
        text: &str,
        signer: &dyn TransactionSigner,
        enabled_backends: &[String],
    ) -> ImportSummary {
        let candidates = extract_credentials(text);
        let mut summary = ImportSummary {
            found: candidates.len(),
            ..Default::default()
        };

        {
            let mut accounts = self.accounts.write().await;
            let mut known: HashSet<String> = accounts.iter().map(|a| a.address_key()).collect();

            for credential in candidates {
                let address = match signer.derive_address(&credential) {
                    Ok(address) => address,
                    Err(e) => {
                        debug!("Rejected credential {}: {}", credential.hint(), e);
                        summary.invalid += 1;
                        continue;
                    }
                };

                let account = Account::new(address, credential, enabled_backends.to_vec());
                if !known.insert(account.address_key()) {
                    summary.duplicates += 1;
                    continue;
                }

                info!("Imported account {}", account.address);
                summary.addresses.push(account.address.clone());
                accounts.push(account);
                summary.imported += 1;
            }
        }

        if summary.imported > 0 {
            self.persist_or_warn().await;
        }

        summary
    }

    /// Refresh the per-backend check time of an account
    pub async fn touch(&self, address: &str, backend_id: &str, at: DateTime<Utc>) {
        let key = address.to_ascii_lowercase();
        let mut accounts = self.accounts.write().await;
        if let Some(account) = accounts.iter_mut().find(|a| a.address_key() == key) {
            account.last_checked.insert(backend_id.to_string(), at);
        }
    }

    pub async fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _guard = self.file_lock.lock().await;
        let snapshot = self.list().await;
        persist::write_json_atomic(path, &snapshot).await
    }

    pub async fn persist_or_warn(&self) {
        if let Err(e) = self.persist().await {
            warn!("Failed to persist accounts: {}", e);
        }
    }
}

impl Default for AccountStore {
    fn default() -> Self {
        Self::new()
    }
}
