pub mod cipher;

pub use cipher::{KeyOrigin, SecretCipher};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CipherError {
    /// The blob could not be parsed into its sealed parts.
    #[error("malformed secret blob: {0}")]
    Malformed(String),

    /// The GCM tag did not verify: tampered data or a different key.
    #[error("secret authentication failed")]
    Authentication,

    #[error("encryption failed")]
    Encryption,

    #[error("invalid master key: {0}")]
    InvalidKey(String),

    #[error("CREDGATE_MASTER_KEY is required when CREDGATE_ENV=production")]
    MissingKey,
}

/// Establish the process-wide cipher.
///
/// A supplied key is always used (and must parse). Without one, production refuses
/// to start; any other environment gets an ephemeral key and a loud warning.
pub fn provision(master_key: Option<&str>, production: bool) -> Result<SecretCipher, CipherError> {
    match master_key {
        Some(hex) => SecretCipher::from_hex(hex),
        None if production => Err(CipherError::MissingKey),
        None => {
            tracing::warn!(
                "CREDGATE_MASTER_KEY is not set: using an EPHEMERAL key. Not suitable for production; \
                 restarting the process makes every stored secret unreadable."
            );
            Ok(SecretCipher::ephemeral())
        }
    }
}
