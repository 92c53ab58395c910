//! Activity probe
//!
//! Answers "has this account ever been used on this backend?" with a
//! bounded, retried check. An account is active when it holds a balance or
//! has sent at least one transaction.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use tracing::debug;

use crate::backend::{ConnectionPool, HealthStore};
use crate::config::RpcConfig;
use crate::error::{Error, Result};
use crate::rpc::{retry_linear, ChainClient, LinearBackoff};
use crate::wallet::Account;

/// Outcome of one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityResult {
    pub backend_id: String,
    pub address: String,
    pub has_activity: bool,
    /// Backend was suspended; no network call was made
    pub skipped: bool,
    pub error: Option<String>,
}

impl ActivityResult {
    fn new(account: &Account, backend_id: &str) -> Self {
        Self {
            backend_id: backend_id.to_string(),
            address: account.address.clone(),
            has_activity: false,
            skipped: false,
            error: None,
        }
    }
}

async fn query_activity(client: &dyn ChainClient, address: Address) -> Result<bool> {
    let balance = client.balance(address).await?;
    if balance > U256::ZERO {
        return Ok(true);
    }
    Ok(client.transaction_count(address).await? > 0)
}

/// Connecting is part of the attempt, so a transient connect failure is
/// retried like any other.
async fn connect_and_query(
    pool: &ConnectionPool,
    backend_id: &str,
    address: Address,
) -> Result<bool> {
    let client = pool.get_or_create(backend_id).await?;
    query_activity(client.as_ref(), address).await
}

pub struct ActivityProbe {
    pool: Arc<ConnectionPool>,
    health: Arc<HealthStore>,
    timeout: Duration,
    attempts: u32,
    retry_step: Duration,
}

impl ActivityProbe {
    pub fn new(pool: Arc<ConnectionPool>, health: Arc<HealthStore>, rpc: &RpcConfig) -> Self {
        Self {
            pool,
            health,
            timeout: rpc.probe_timeout(),
            attempts: rpc.probe_attempts,
            retry_step: rpc.retry_step(),
        }
    }

    pub async fn has_activity(&self, account: &Account, backend_id: &str) -> bool {
        self.probe(account, backend_id).await.has_activity
    }

    /// Probe one backend. Errors fold into the result and the health store;
    /// an unanswered probe reports no activity.
    pub async fn probe(&self, account: &Account, backend_id: &str) -> ActivityResult {
        let mut result = ActivityResult::new(account, backend_id);

        if !self.health.is_available(backend_id).await {
            debug!(backend = backend_id, "Skipping suspended backend");
            result.skipped = true;
            return result;
        }

        let address = match account.parsed_address() {
            Ok(address) => address,
            Err(e) => {
                result.error = Some(e.to_string());
                return result;
            }
        };

        let pool = self.pool.as_ref();
        let outcome = retry_linear(
            LinearBackoff::new(self.retry_step, self.attempts),
            self.timeout,
            "activity probe",
            move || connect_and_query(pool, backend_id, address),
        )
        .await;

        match outcome {
            Ok(active) => {
                self.health.record_success(backend_id).await;
                if active {
                    debug!(backend = backend_id, address = %account.short_address(), "Activity found");
                }
                result.has_activity = active;
            }
            Err(e) => self.fail(&mut result, e).await,
        }

        result
    }

    async fn fail(&self, result: &mut ActivityResult, error: Error) {
        let message = error.to_string();
        if !matches!(error, Error::UnknownBackend(_)) {
            self.health
                .record_failure(&result.backend_id, error.failure_kind(), &message)
                .await;
        }
        result.error = Some(message);
    }
}
