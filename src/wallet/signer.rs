//! Transaction signing
//!
//! Derives addresses from credentials and signs legacy EIP-155 transfers.

use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::{Address, Bytes, TxKind};
use alloy::signers::local::PrivateKeySigner;

use crate::error::{Error, Result};

use super::types::{Credential, TransferRequest};

/// Signing collaborator: owns every use of the raw credential
pub trait TransactionSigner: Send + Sync {
    fn derive_address(&self, credential: &Credential) -> Result<Address>;

    /// Sign `tx` and return the raw encoded transaction
    fn sign_transaction(&self, credential: &Credential, tx: &TransferRequest) -> Result<Vec<u8>>;
}

/// secp256k1 signer backed by alloy's local signer
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalSigner;

impl LocalSigner {
    fn signer(credential: &Credential) -> Result<PrivateKeySigner> {
        credential
            .expose()
            .parse::<PrivateKeySigner>()
            .map_err(|e| Error::InvalidCredential(format!("{} ({})", e, credential.hint())))
    }
}

impl TransactionSigner for LocalSigner {
    fn derive_address(&self, credential: &Credential) -> Result<Address> {
        Ok(Self::signer(credential)?.address())
    }

    fn sign_transaction(&self, credential: &Credential, tx: &TransferRequest) -> Result<Vec<u8>> {
        let signer = Self::signer(credential)?;

        let mut legacy = TxLegacy {
            chain_id: Some(tx.chain_id),
            nonce: tx.nonce,
            gas_price: tx.gas_price,
            gas_limit: tx.gas_limit,
            to: TxKind::Call(tx.to),
            value: tx.value,
            input: Bytes::new(),
        };

        let signature = signer
            .sign_transaction_sync(&mut legacy)
            .map_err(|e| Error::Signing(e.to_string()))?;

        let envelope: TxEnvelope = legacy.into_signed(signature).into();
        Ok(envelope.encoded_2718())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;

    // Well-known development key
    const KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    #[test]
    fn test_derive_address() {
        let address = LocalSigner.derive_address(&Credential::new(KEY)).unwrap();
        assert_eq!(address, ADDRESS.parse::<Address>().unwrap());
    }

    #[test]
    fn test_invalid_credential() {
        let bad = Credential::new(&"0".repeat(64));
        assert!(matches!(
            LocalSigner.derive_address(&bad),
            Err(Error::InvalidCredential(_))
        ));
    }

    #[test]
    fn test_sign_produces_legacy_rlp() {
        let tx = TransferRequest {
            chain_id: 1,
            nonce: 3,
            gas_price: 20_000_000_000,
            gas_limit: 21_000,
            to: "0x000000000000000000000000000000000000dEaD".parse().unwrap(),
            value: U256::from(1_000_000u64),
        };

        let raw = LocalSigner.sign_transaction(&Credential::new(KEY), &tx).unwrap();
        // Legacy transactions are a bare RLP list
        assert!(raw[0] >= 0xc0);

        let again = LocalSigner.sign_transaction(&Credential::new(KEY), &tx).unwrap();
        assert_eq!(raw, again);
    }
}
