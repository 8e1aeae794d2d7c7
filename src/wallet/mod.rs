use anyhow::{anyhow, Context, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use solana_sdk::signature::Keypair;
use zeroize::Zeroizing;

use crate::error::SellError;

const BLOB_PREFIX: &str = "v1";
const BLOB_AAD: &[u8] = b"sellflow-wallet-v1";
const ARGON2_M_KIB: u32 = 19_456;
const ARGON2_T: u32 = 2;
const ARGON2_P: u32 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;

/// Turns a stored key blob back into a signer.
pub trait KeyDecryptor: Send + Sync {
    fn decrypt(&self, blob: &str) -> crate::error::Result<Keypair>;
}

/// Decrypts blobs with the operator's vault passphrase.
pub struct PassphraseVault {
    passphrase: SecretString,
}

impl PassphraseVault {
    pub fn new(passphrase: SecretString) -> Self {
        Self { passphrase }
    }

    pub fn encrypt(&self, keypair: &Keypair) -> Result<String> {
        encrypt_private_key(keypair, &self.passphrase)
    }
}

impl KeyDecryptor for PassphraseVault {
    fn decrypt(&self, blob: &str) -> crate::error::Result<Keypair> {
        decrypt_private_key(blob, &self.passphrase)
            .map_err(|err| SellError::DecryptionFailed(err.to_string()))
    }
}

fn derive_key(passphrase: &SecretString, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let params = Params::new(ARGON2_M_KIB, ARGON2_T, ARGON2_P, Some(32))
        .map_err(|err| anyhow!("invalid argon2 params: {err}"))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase.expose_secret().as_bytes(), salt, key.as_mut())
        .map_err(|err| anyhow!("argon2 key derivation failed: {err}"))?;
    Ok(key)
}

/// `v1:<salt>:<nonce>:<ciphertext>`, each part base64.
pub fn encrypt_private_key(keypair: &Keypair, passphrase: &SecretString) -> Result<String> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let key = derive_key(passphrase, &salt)?;
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_ref()));
    let plaintext = Zeroizing::new(keypair.to_bytes());
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext.as_ref(),
                aad: BLOB_AAD,
            },
        )
        .map_err(|err| anyhow!("key encryption failed: {err}"))?;

    Ok(format!(
        "{BLOB_PREFIX}:{}:{}:{}",
        STANDARD.encode(salt),
        STANDARD.encode(nonce),
        STANDARD.encode(ciphertext)
    ))
}

pub fn decrypt_private_key(blob: &str, passphrase: &SecretString) -> Result<Keypair> {
    let mut parts = blob.trim().split(':');
    let (Some(version), Some(salt), Some(nonce), Some(ciphertext), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return Err(anyhow!("malformed key blob"));
    };
    if version != BLOB_PREFIX {
        return Err(anyhow!("unsupported key blob version {version}"));
    }
    let salt = STANDARD.decode(salt).context("decode key blob salt")?;
    if salt.len() != SALT_LEN {
        return Err(anyhow!("invalid key blob salt length"));
    }
    let nonce = STANDARD.decode(nonce).context("decode key blob nonce")?;
    if nonce.len() != NONCE_LEN {
        return Err(anyhow!("invalid key blob nonce length"));
    }
    let ciphertext = STANDARD
        .decode(ciphertext)
        .context("decode key blob ciphertext")?;

    let key = derive_key(passphrase, &salt)?;
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_ref()));
    let plaintext = cipher
        .decrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: &ciphertext,
                aad: BLOB_AAD,
            },
        )
        .map_err(|_| anyhow!("wrong encryption key or corrupted key blob"))?;
    let plaintext = Zeroizing::new(plaintext);
    if plaintext.len() != 64 {
        return Err(anyhow!("invalid decrypted key length"));
    }
    Keypair::try_from(plaintext.as_slice()).map_err(|err| anyhow!("invalid keypair bytes: {err}"))
}

/// Accepts a base58 secret key as exported by common Solana wallets.
pub fn parse_base58_keypair(encoded: &str) -> Result<Keypair> {
    let bytes = Zeroizing::new(
        bs58::decode(encoded.trim())
            .into_vec()
            .map_err(|err| anyhow!("private key is not base58: {err}"))?,
    );
    if bytes.len() != 64 {
        return Err(anyhow!(
            "private key must decode to 64 bytes, got {}",
            bytes.len()
        ));
    }
    Keypair::try_from(bytes.as_slice()).map_err(|err| anyhow!("invalid keypair bytes: {err}"))
}
