use aes_gcm::aead::OsRng;
use base64::Engine;
use rand::RngCore;
use zeroize::Zeroizing;

/// Produces opaque secrets over the URL-safe base64 alphabet.
///
/// No policy checks happen here; the caller has already validated `length`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenGenerator;

impl TokenGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Returns exactly `length` characters. Each character carries 6 bits from the OS CSPRNG:
    /// `length` random bytes encode to more than `length` characters, so the truncated tail
    /// never contains a partially-filled character.
    pub fn generate(&self, length: usize) -> Zeroizing<String> {
        let mut raw = Zeroizing::new(vec![0u8; length]);
        OsRng.fill_bytes(&mut raw);

        let mut encoded = Zeroizing::new(
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw.as_slice()),
        );
        encoded.truncate(length);
        encoded
    }
}
