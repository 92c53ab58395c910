//! Core types for account management
//!
//! Defines accounts, credentials, transfer requests and transfer records.

use std::collections::HashMap;

use alloy::primitives::{utils::format_ether, Address, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Gas limit of a plain native-currency transfer
pub const SWEEP_GAS_LIMIT: u64 = 21_000;

/// Opaque signing credential (64 hex characters, no prefix, lowercase).
///
/// Only the signer reads the raw value; `Debug` and `Display` mask it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(raw: &str) -> Self {
        let trimmed = raw.trim();
        let hex = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        Self(hex.to_ascii_lowercase())
    }

    /// Raw credential, for the signer only
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Last four characters, for display
    pub fn hint(&self) -> String {
        let len = self.0.len();
        format!("...{}", &self.0[len.saturating_sub(4)..])
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credential({})", self.hint())
    }
}

impl std::fmt::Display for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hint())
    }
}

/// Monitored account from accounts.json
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Checksummed address derived from the credential
    pub address: String,

    pub credential_reference: Credential,

    /// Backend ids this account is checked on
    pub enabled_backends: Vec<String>,

    /// Backend id -> last probe time
    #[serde(default)]
    pub last_checked: HashMap<String, DateTime<Utc>>,
}

impl Account {
    pub fn new(address: Address, credential: Credential, enabled_backends: Vec<String>) -> Self {
        Self {
            address: address.to_checksum(None),
            credential_reference: credential,
            enabled_backends,
            last_checked: HashMap::new(),
        }
    }

    /// Case-insensitive identity used for deduplication
    pub fn address_key(&self) -> String {
        self.address.to_ascii_lowercase()
    }

    pub fn parsed_address(&self) -> Result<Address> {
        self.address
            .parse()
            .map_err(|e| Error::InvalidCredential(format!("Bad address {}: {}", self.address, e)))
    }

    /// Shortened address for log lines and tables
    pub fn short_address(&self) -> String {
        short_address(&self.address)
    }
}

/// Fields of a native transfer handed to the signer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Address,
    pub value: U256,
}

/// Completed sweep, for the audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    /// Unique transfer ID
    pub id: String,

    pub timestamp: DateTime<Utc>,

    pub from: String,

    pub to: String,

    /// Decimal amount in native units: "0.049"
    pub amount: String,

    /// Amount in the smallest unit
    pub amount_wei: String,

    pub backend: String,

    pub backend_name: String,

    pub tx_id: String,

    pub gas_used: u64,

    /// Gas price in the smallest unit
    pub gas_price: String,

    /// Fee reserve withheld (gas price * gas limit)
    pub fee_wei: String,

    pub currency: String,
}

/// Render a smallest-unit amount in native units without trailing zeros
pub fn format_amount(wei: U256) -> String {
    let formatted = format_ether(wei);
    if !formatted.contains('.') {
        return formatted;
    }
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// "0x1234...abcd"
pub fn short_address(address: &str) -> String {
    if address.len() > 12 {
        format!("{}...{}", &address[..6], &address[address.len() - 4..])
    } else {
        address.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn test_credential_normalized_and_masked() {
        let cred = Credential::new(&format!("0x{}", KEY.to_uppercase()));
        assert_eq!(cred.expose(), KEY);
        assert_eq!(format!("{:?}", cred), "Credential(...ff80)");
        assert!(!format!("{}", cred).contains("ac0974"));
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(U256::from(49_000_000_000_000_000u64)), "0.049");
        assert_eq!(format_amount(U256::from(1_000_000_000_000_000_000u64)), "1");
        assert_eq!(format_amount(U256::ZERO), "0");
    }

    #[test]
    fn test_account_json_shape() {
        let account = Account::new(
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse().unwrap(),
            Credential::new(KEY),
            vec!["ethereum".to_string()],
        );
        let json = serde_json::to_value(&account).unwrap();
        assert_eq!(json["credentialReference"], KEY);
        assert_eq!(json["enabledBackends"][0], "ethereum");
        assert!(json["lastChecked"].is_object());
        assert_eq!(account.address_key(), "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266");
    }

    #[test]
    fn test_short_address() {
        assert_eq!(
            short_address("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"),
            "0xf39F...2266"
        );
    }
}
