//! Account management
//!
//! - `types`: accounts, credentials and transfer records
//! - `signer`: address derivation and transaction signing
//! - `accounts`: the persisted account registry and credential import
//! - `history`: the capped transfer log
//!
//! Raw credentials only leave [`Credential`] through the signer.

pub mod accounts;
pub mod history;
pub mod signer;
pub mod types;

pub use accounts::{extract_credentials, AccountStore, ImportSummary};
pub use history::{TransferLog, MAX_TRANSFER_RECORDS};
pub use signer::{LocalSigner, TransactionSigner};
pub use types::{
    format_amount, short_address, Account, Credential, TransferRecord, TransferRequest,
    SWEEP_GAS_LIMIT,
};
