//! Balance sweeper
//!
//! Moves an account's whole balance, minus the fee reserve, to the
//! destination address on a single backend.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{BackendRegistry, ConnectionPool, HealthStore};
use crate::config::RpcConfig;
use crate::error::{Error, Result};
use crate::rpc::{retry_linear, with_deadline, ChainClient, LinearBackoff};
use crate::wallet::{
    format_amount, Account, TransactionSigner, TransferLog, TransferRecord, TransferRequest,
    SWEEP_GAS_LIMIT,
};

/// What happened on one sweep attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Backend suspended, nothing attempted
    Skipped,
    NoFunds,
    /// Balance does not exceed the fee reserve
    InsufficientForFees { balance: U256, fee: U256 },
    /// Dry-run mode: the transfer that would have been sent
    DryRun { amount: U256, fee: U256 },
    Swept { amount: U256, tx_id: String },
    Failed(String),
}

impl SweepOutcome {
    pub fn is_swept(&self) -> bool {
        matches!(self, SweepOutcome::Swept { .. })
    }
}

/// Tunables for [`BalanceSweeper`]
#[derive(Debug, Clone)]
pub struct SweepSettings {
    pub destination: Address,
    pub dry_run: bool,
    pub query_timeout: Duration,
    pub balance_attempts: u32,
    pub retry_step: Duration,
    pub send_timeout: Duration,
}

impl SweepSettings {
    pub fn new(destination: Address, dry_run: bool, rpc: &RpcConfig) -> Self {
        Self {
            destination,
            dry_run,
            query_timeout: rpc.probe_timeout(),
            balance_attempts: rpc.balance_attempts,
            retry_step: rpc.retry_step(),
            send_timeout: rpc.send_timeout(),
        }
    }
}

pub struct BalanceSweeper {
    registry: Arc<BackendRegistry>,
    pool: Arc<ConnectionPool>,
    health: Arc<HealthStore>,
    signer: Arc<dyn TransactionSigner>,
    history: Arc<TransferLog>,
    settings: SweepSettings,
}

impl BalanceSweeper {
    pub fn new(
        registry: Arc<BackendRegistry>,
        pool: Arc<ConnectionPool>,
        health: Arc<HealthStore>,
        signer: Arc<dyn TransactionSigner>,
        history: Arc<TransferLog>,
        settings: SweepSettings,
    ) -> Self {
        Self {
            registry,
            pool,
            health,
            signer,
            history,
            settings,
        }
    }

    pub fn destination(&self) -> Address {
        self.settings.destination
    }

    pub fn is_dry_run(&self) -> bool {
        self.settings.dry_run
    }

    /// Check the balance of `account` on `backend_id` and sweep it if it
    /// covers the fee reserve. Never panics or propagates; failures are
    /// reported in the outcome and recorded against the backend.
    pub async fn check_and_sweep(&self, account: &Account, backend_id: &str) -> SweepOutcome {
        if !self.health.is_available(backend_id).await {
            debug!(backend = backend_id, "Skipping suspended backend");
            return SweepOutcome::Skipped;
        }

        match self.sweep(account, backend_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = e.to_string();
                // Rejected submissions say nothing about the backend itself
                if !matches!(
                    e,
                    Error::TransactionSend(_) | Error::Signing(_) | Error::InvalidCredential(_)
                ) {
                    self.health
                        .record_failure(backend_id, e.failure_kind(), &message)
                        .await;
                }
                warn!(
                    backend = backend_id,
                    address = %account.short_address(),
                    "Sweep failed: {}",
                    message
                );
                SweepOutcome::Failed(message)
            }
        }
    }

    async fn sweep(&self, account: &Account, backend_id: &str) -> Result<SweepOutcome> {
        let backend = self
            .registry
            .get(backend_id)
            .ok_or_else(|| Error::UnknownBackend(backend_id.to_string()))?;
        let from = account.parsed_address()?;

        let pool = self.pool.as_ref();
        let (client, balance) = retry_linear(
            LinearBackoff::new(self.settings.retry_step, self.settings.balance_attempts),
            self.settings.query_timeout,
            "balance query",
            move || async move {
                let client = pool.get_or_create(backend_id).await?;
                let balance = client.balance(from).await?;
                Ok::<_, Error>((client, balance))
            },
        )
        .await?;
        let client: &dyn ChainClient = client.as_ref();
        self.health.record_success(backend_id).await;

        if balance.is_zero() {
            return Ok(SweepOutcome::NoFunds);
        }

        let gas_price = with_deadline(self.settings.query_timeout, client.gas_price()).await?;
        let fee = U256::from(gas_price) * U256::from(SWEEP_GAS_LIMIT);

        if balance <= fee {
            info!(
                backend = backend_id,
                address = %account.short_address(),
                "Balance {} {} does not cover fee {}",
                format_amount(balance),
                backend.currency,
                format_amount(fee)
            );
            return Ok(SweepOutcome::InsufficientForFees { balance, fee });
        }

        let amount = balance - fee;

        if self.settings.dry_run {
            info!(
                backend = backend_id,
                address = %account.short_address(),
                "[dry run] Would sweep {} {} to {}",
                format_amount(amount),
                backend.currency,
                self.settings.destination
            );
            return Ok(SweepOutcome::DryRun { amount, fee });
        }

        let nonce = with_deadline(self.settings.query_timeout, client.transaction_count(from)).await?;

        let request = TransferRequest {
            chain_id: backend.chain_id,
            nonce,
            gas_price,
            gas_limit: SWEEP_GAS_LIMIT,
            to: self.settings.destination,
            value: amount,
        };
        let raw = self
            .signer
            .sign_transaction(&account.credential_reference, &request)?;

        // Submission is never retried
        let tx_id = with_deadline(self.settings.send_timeout, client.send_raw_transaction(&raw))
            .await
            .map_err(|e| match e {
                Error::TransactionSend(_) => e,
                other => Error::TransactionSend(other.to_string()),
            })?;

        info!(
            backend = backend_id,
            tx = %tx_id,
            "Swept {} {} from {}",
            format_amount(amount),
            backend.currency,
            account.short_address()
        );

        let record = TransferRecord {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            from: account.address.clone(),
            to: self.settings.destination.to_checksum(None),
            amount: format_amount(amount),
            amount_wei: amount.to_string(),
            backend: backend.id.clone(),
            backend_name: backend.name.clone(),
            tx_id: tx_id.clone(),
            gas_used: SWEEP_GAS_LIMIT,
            gas_price: gas_price.to_string(),
            fee_wei: fee.to_string(),
            currency: backend.currency.clone(),
        };
        self.history.append(record).await;

        Ok(SweepOutcome::Swept { amount, tx_id })
    }
}
