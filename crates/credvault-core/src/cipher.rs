use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use thiserror::Error;

/// Errors produced by credential cipher implementations and the key stores
/// backing them. All variants surface to the caller unmodified; there is no
/// local recovery, and a failed decrypt never yields a default value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialCipherError {
    /// Key material location cannot be created, read, or written.
    #[error("key storage failure: {reason}")]
    Storage { reason: String },
    /// Existing key material is present but structurally invalid.
    #[error("corrupt key material: {reason}")]
    CorruptKeyMaterial { reason: String },
    /// A descriptor field is empty or contains unsafe path characters.
    #[error("invalid key descriptor: {reason}")]
    InvalidDescriptor { reason: String },
    /// The cipher primitive rejected an encrypt operation.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },
    /// Ciphertext is malformed, tampered with, or was produced under
    /// different key material.
    #[error("decryption failed: {reason}")]
    Decryption { reason: String },
}

/// Opaque envelope produced by [`CredentialCipher::encrypt`]. Callers must
/// not interpret the bytes; the only supported operations are persisting
/// them (binary or base64) and handing them back to `decrypt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ciphertext(Vec<u8>);

impl Ciphertext {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Encode for callers that persist ciphertext as text.
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.0)
    }

    /// Decode a previously `to_base64`-encoded envelope.
    pub fn from_base64(encoded: &str) -> Result<Self, CredentialCipherError> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| CredentialCipherError::Decryption {
                reason: format!("base64 decode failed: {e}"),
            })?;
        Ok(Self(bytes))
    }
}

/// Contract for anything that can encrypt and decrypt credential strings.
#[async_trait]
pub trait CredentialCipher: Send + Sync {
    /// Encrypt a UTF-8 credential into an opaque envelope. Two calls with
    /// identical plaintext may produce different envelopes; both decrypt
    /// back to the same string.
    async fn encrypt(&self, plaintext: &str) -> Result<Ciphertext, CredentialCipherError>;

    /// Decrypt an envelope previously produced by [`encrypt`](Self::encrypt)
    /// under the same key material.
    async fn decrypt(&self, ciphertext: &Ciphertext) -> Result<String, CredentialCipherError>;
}

/// In-memory cipher that simulates encryption for tests and smoke runs.
/// This is not cryptographically secure; production implementations must use
/// an authenticated cipher with key material held outside the process image.
#[derive(Debug, Default, Clone)]
pub struct MaskingCipher;

impl MaskingCipher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CredentialCipher for MaskingCipher {
    async fn encrypt(&self, plaintext: &str) -> Result<Ciphertext, CredentialCipherError> {
        // XOR is a placeholder to avoid carrying plaintext around in tests.
        Ok(Ciphertext::from_bytes(mask(plaintext.as_bytes())))
    }

    async fn decrypt(&self, ciphertext: &Ciphertext) -> Result<String, CredentialCipherError> {
        let bytes = mask(ciphertext.as_bytes()); // XOR twice restores original.
        String::from_utf8(bytes).map_err(|e| CredentialCipherError::Decryption {
            reason: format!("invalid UTF-8 plaintext: {e}"),
        })
    }
}

const MASK_BYTE: u8 = 0xA5;

fn mask(input: &[u8]) -> Vec<u8> {
    input.iter().map(|b| b ^ MASK_BYTE).collect()
}
