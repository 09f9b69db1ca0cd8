use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::CipherError;
use crate::models::credential::EncryptedSecret;

const BLOB_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;

/// Where the key-encryption key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    Provided,
    /// Generated at startup; every blob dies with the process.
    Ephemeral,
}

/// AES-256-GCM envelope encryption for stored secrets.
///
/// Each secret is sealed under a fresh data key (DEK); the DEK is sealed under the
/// process-wide key-encryption key (KEK). The KEK is immutable after construction,
/// so a single instance is shared across tasks without locking.
pub struct SecretCipher {
    kek: Zeroizing<[u8; 32]>,
    origin: KeyOrigin,
}

/// Persisted layout of one sealed secret, serialized as JSON.
#[derive(Serialize, Deserialize)]
struct SealedBlob {
    v: u8,
    encrypted_dek: String,
    dek_nonce: String,
    encrypted_secret: String,
    secret_nonce: String,
}

impl SecretCipher {
    pub fn from_hex(master_key_hex: &str) -> Result<Self, CipherError> {
        let kek = parse_master_key(master_key_hex)?;
        Ok(Self {
            kek,
            origin: KeyOrigin::Provided,
        })
    }

    /// Development-only key. Callers are expected to have warned the operator.
    pub fn ephemeral() -> Self {
        let mut kek = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut kek[..]);
        Self {
            kek,
            origin: KeyOrigin::Ephemeral,
        }
    }

    pub fn origin(&self) -> KeyOrigin {
        self.origin
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedSecret, CipherError> {
        // 1. Fresh DEK per secret
        let mut dek = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut dek[..]);

        // 2. Seal the secret under the DEK
        let secret_cipher = Aes256Gcm::new_from_slice(&dek[..])
            .map_err(|e| CipherError::InvalidKey(format!("{:?}", e)))?;
        let secret_nonce = generate_nonce();
        let encrypted_secret = secret_cipher
            .encrypt(Nonce::from_slice(&secret_nonce), plaintext.as_bytes())
            .map_err(|_| CipherError::Encryption)?;

        // 3. Seal the DEK under the KEK
        let kek_cipher = Aes256Gcm::new_from_slice(&self.kek[..])
            .map_err(|e| CipherError::InvalidKey(format!("{:?}", e)))?;
        let dek_nonce = generate_nonce();
        let encrypted_dek = kek_cipher
            .encrypt(Nonce::from_slice(&dek_nonce), &dek[..])
            .map_err(|_| CipherError::Encryption)?;

        let blob = SealedBlob {
            v: BLOB_VERSION,
            encrypted_dek: STANDARD.encode(&encrypted_dek),
            dek_nonce: STANDARD.encode(dek_nonce),
            encrypted_secret: STANDARD.encode(&encrypted_secret),
            secret_nonce: STANDARD.encode(secret_nonce),
        };
        let json = serde_json::to_string(&blob)
            .map_err(|e| CipherError::Malformed(e.to_string()))?;
        Ok(EncryptedSecret::new(json))
    }

    /// Opens a blob produced by [`encrypt`](Self::encrypt). A blob that parses but fails
    /// the GCM tag check (tampered, or sealed under another key) is `Authentication`.
    pub fn decrypt(&self, blob: &EncryptedSecret) -> Result<Zeroizing<String>, CipherError> {
        let sealed: SealedBlob = serde_json::from_str(blob.as_str())
            .map_err(|e| CipherError::Malformed(format!("not a sealed blob: {}", e)))?;
        if sealed.v != BLOB_VERSION {
            return Err(CipherError::Malformed(format!(
                "unsupported blob version {}",
                sealed.v
            )));
        }

        let encrypted_dek = decode_field("encrypted_dek", &sealed.encrypted_dek)?;
        let dek_nonce = decode_nonce("dek_nonce", &sealed.dek_nonce)?;
        let encrypted_secret = decode_field("encrypted_secret", &sealed.encrypted_secret)?;
        let secret_nonce = decode_nonce("secret_nonce", &sealed.secret_nonce)?;

        // 1. Open the DEK with the KEK
        let kek_cipher = Aes256Gcm::new_from_slice(&self.kek[..])
            .map_err(|e| CipherError::InvalidKey(format!("{:?}", e)))?;
        let dek_bytes = Zeroizing::new(
            kek_cipher
                .decrypt(Nonce::from_slice(&dek_nonce), encrypted_dek.as_slice())
                .map_err(|_| CipherError::Authentication)?,
        );
        if dek_bytes.len() != 32 {
            return Err(CipherError::Malformed("data key has wrong length".into()));
        }

        // 2. Open the secret with the DEK
        let secret_cipher = Aes256Gcm::new_from_slice(dek_bytes.as_slice())
            .map_err(|e| CipherError::InvalidKey(format!("{:?}", e)))?;
        let plaintext = secret_cipher
            .decrypt(Nonce::from_slice(&secret_nonce), encrypted_secret.as_slice())
            .map_err(|_| CipherError::Authentication)?;

        let plaintext = String::from_utf8(plaintext)
            .map_err(|_| CipherError::Malformed("secret is not valid UTF-8".into()))?;
        Ok(Zeroizing::new(plaintext))
    }
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, CipherError> {
    STANDARD
        .decode(value)
        .map_err(|e| CipherError::Malformed(format!("{}: {}", name, e)))
}

fn decode_nonce(name: &str, value: &str) -> Result<[u8; NONCE_LEN], CipherError> {
    let bytes = decode_field(name, value)?;
    bytes
        .try_into()
        .map_err(|_| CipherError::Malformed(format!("{}: expected {} bytes", name, NONCE_LEN)))
}

pub fn parse_master_key(hex: &str) -> Result<Zeroizing<[u8; 32]>, CipherError> {
    let hex = hex.trim();
    if hex.len() != 64 {
        return Err(CipherError::InvalidKey(format!(
            "CREDGATE_MASTER_KEY must be 64 hex chars (32 bytes), got {} chars",
            hex.len()
        )));
    }
    let bytes = Zeroizing::new(
        hex::decode(hex).map_err(|e| CipherError::InvalidKey(e.to_string()))?,
    );
    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&bytes);
    Ok(key)
}
