use base64::{engine::general_purpose::STANDARD, Engine as _};
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::signer::Signer;
use solana_sdk::transaction::{Transaction, VersionedTransaction};

use crate::error::{Result, SellError};

/// A swap transaction after the taker's signature has been applied.
#[derive(Debug, Clone)]
pub enum SignedTx {
    Versioned(VersionedTransaction),
    Legacy(Transaction),
}

impl SignedTx {
    pub fn to_base64(&self) -> Result<String> {
        let bytes = match self {
            SignedTx::Versioned(tx) => bincode::serialize(tx),
            SignedTx::Legacy(tx) => bincode::serialize(tx),
        }
        .map_err(|err| SellError::InvalidTransaction(format!("serialize signed tx: {err}")))?;
        Ok(STANDARD.encode(bytes))
    }

    pub fn is_versioned(&self) -> bool {
        matches!(self, SignedTx::Versioned(_))
    }
}

/// Decodes the aggregator's unsigned transaction and signs it in the keypair's
/// signer slot. Versioned wire format first, legacy as the fallback.
pub fn sign_unsigned_tx(unsigned_tx_b64: &str, keypair: &Keypair) -> Result<SignedTx> {
    let bytes = STANDARD
        .decode(unsigned_tx_b64.trim())
        .map_err(|err| SellError::InvalidTransaction(format!("decode base64: {err}")))?;

    match bincode::deserialize::<VersionedTransaction>(&bytes) {
        Ok(tx) => sign_versioned(tx, keypair).map(SignedTx::Versioned),
        Err(versioned_err) => {
            let tx = bincode::deserialize::<Transaction>(&bytes).map_err(|legacy_err| {
                SellError::InvalidTransaction(format!(
                    "not a versioned ({versioned_err}) or legacy ({legacy_err}) transaction"
                ))
            })?;
            sign_legacy(tx, keypair).map(SignedTx::Legacy)
        }
    }
}

fn sign_versioned(mut tx: VersionedTransaction, keypair: &Keypair) -> Result<VersionedTransaction> {
    let required = usize::from(tx.message.header().num_required_signatures);
    let signer_keys = tx.message.static_account_keys();
    let position = signer_keys
        .iter()
        .take(required)
        .position(|key| *key == keypair.pubkey())
        .ok_or_else(|| {
            SellError::InvalidTransaction(format!(
                "wallet {} is not a required signer",
                keypair.pubkey()
            ))
        })?;
    if tx.signatures.len() < required {
        tx.signatures.resize(required, Signature::default());
    }
    let message_bytes = tx.message.serialize();
    tx.signatures[position] = keypair.sign_message(&message_bytes);
    Ok(tx)
}

fn sign_legacy(mut tx: Transaction, keypair: &Keypair) -> Result<Transaction> {
    let blockhash = tx.message.recent_blockhash;
    tx.try_partial_sign(&[keypair], blockhash)
        .map_err(|err| SellError::InvalidTransaction(format!("sign legacy tx: {err}")))?;
    Ok(tx)
}
