use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use credvault_core::cipher::{Ciphertext, CredentialCipher, CredentialCipherError};
use tracing::instrument;

use crate::keystore::KeyStore;

/// Envelope layout: one version byte, a 12-byte nonce, then the AES-GCM
/// ciphertext with its authentication tag.
const ENVELOPE_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;

/// AES-256-GCM credential cipher bound to loaded key material.
///
/// Constructed through [`AesGcmCipher::open`]; once built, encrypt and
/// decrypt are pure computation and safe to share across tasks.
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
    key_id: String,
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmCipher")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl AesGcmCipher {
    /// Provision/load key material from `store` and bind a cipher to it.
    /// All I/O happens here; the returned value is immediately usable.
    #[instrument(skip_all)]
    pub async fn open<S>(store: &S) -> Result<Self, CredentialCipherError>
    where
        S: KeyStore + ?Sized,
    {
        let material = store.get_or_create().await?;
        let cipher = Aes256Gcm::new_from_slice(material.bytes()).map_err(|e| {
            CredentialCipherError::CorruptKeyMaterial {
                reason: format!("cipher init failed: {e}"),
            }
        })?;
        Ok(Self {
            cipher,
            key_id: material.id().to_string(),
        })
    }

    /// Identifier of the key material this cipher is bound to.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Seal a credential into a fresh-nonce envelope.
    pub fn encrypt(&self, plaintext: &str) -> Result<Ciphertext, CredentialCipherError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CredentialCipherError::Encryption {
                reason: format!("encrypt failed: {e}"),
            })?;

        let mut envelope = Vec::with_capacity(1 + NONCE_LEN + sealed.len());
        envelope.push(ENVELOPE_VERSION);
        envelope.extend_from_slice(nonce.as_slice());
        envelope.extend_from_slice(&sealed);
        Ok(Ciphertext::from_bytes(envelope))
    }

    /// Open an envelope produced by [`encrypt`](Self::encrypt) under the
    /// same key material.
    pub fn decrypt(&self, ciphertext: &Ciphertext) -> Result<String, CredentialCipherError> {
        let bytes = ciphertext.as_bytes();
        if bytes.len() < 1 + NONCE_LEN {
            return Err(CredentialCipherError::Decryption {
                reason: "envelope too short".to_string(),
            });
        }
        if bytes[0] != ENVELOPE_VERSION {
            return Err(CredentialCipherError::Decryption {
                reason: format!("unsupported envelope version: {}", bytes[0]),
            });
        }

        let (nonce_bytes, sealed) = bytes[1..].split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext =
            self.cipher
                .decrypt(nonce, sealed)
                .map_err(|e| CredentialCipherError::Decryption {
                    reason: format!("decrypt failed: {e}"),
                })?;

        String::from_utf8(plaintext).map_err(|e| CredentialCipherError::Decryption {
            reason: format!("invalid UTF-8 plaintext: {e}"),
        })
    }
}

#[async_trait]
impl CredentialCipher for AesGcmCipher {
    async fn encrypt(&self, plaintext: &str) -> Result<Ciphertext, CredentialCipherError> {
        AesGcmCipher::encrypt(self, plaintext)
    }

    async fn decrypt(&self, ciphertext: &Ciphertext) -> Result<String, CredentialCipherError> {
        AesGcmCipher::decrypt(self, ciphertext)
    }
}
