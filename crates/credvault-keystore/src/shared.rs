use async_trait::async_trait;
use credvault_core::cipher::{Ciphertext, CredentialCipher, CredentialCipherError};
use tokio::sync::OnceCell;

use crate::cipher::AesGcmCipher;
use crate::keystore::KeyStore;

/// Lazily-initialized cipher handle bound to one key store at construction.
///
/// The composition root builds one of these and passes it (by reference or
/// `Arc`) to whatever needs encrypt/decrypt; there is no process-global
/// instance. One handle means one descriptor; code that needs a different
/// key builds a different handle.
///
/// Concurrent first callers are serialized so provisioning and key load run
/// at most once per handle, and every caller observes the same cipher. A
/// failed initialization is not cached; the next caller retries.
pub struct SharedCipher<S: KeyStore> {
    store: S,
    cell: OnceCell<AesGcmCipher>,
}

impl<S: KeyStore> SharedCipher<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            cell: OnceCell::new(),
        }
    }

    /// The underlying cipher, opening it on first use.
    pub async fn get(&self) -> Result<&AesGcmCipher, CredentialCipherError> {
        self.cell
            .get_or_try_init(|| AesGcmCipher::open(&self.store))
            .await
    }
}

#[async_trait]
impl<S: KeyStore> CredentialCipher for SharedCipher<S> {
    async fn encrypt(&self, plaintext: &str) -> Result<Ciphertext, CredentialCipherError> {
        self.get().await?.encrypt(plaintext)
    }

    async fn decrypt(&self, ciphertext: &Ciphertext) -> Result<String, CredentialCipherError> {
        self.get().await?.decrypt(ciphertext)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;
    use crate::keystore::{FileKeyStore, InMemoryKeyStore, KeyDescriptor, KeyMaterial};

    fn file_backed(root: &std::path::Path) -> SharedCipher<FileKeyStore> {
        let descriptor = KeyDescriptor::new(root, "shared", "data-key").expect("descriptor");
        SharedCipher::new(FileKeyStore::new(descriptor))
    }

    #[tokio::test]
    async fn repeated_gets_return_the_same_instance() {
        let dir = tempfile::tempdir().expect("tempdir");
        let shared = file_backed(dir.path());

        let first = shared.get().await.expect("first get");
        let envelope = first.encrypt("stable").expect("encrypt");

        let second = shared.get().await.expect("second get");
        assert!(std::ptr::eq(first, second), "same cached cipher");
        assert_eq!(second.decrypt(&envelope).expect("decrypt"), "stable");
    }

    #[tokio::test]
    async fn concurrent_first_access_provisions_one_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let shared = Arc::new(file_backed(dir.path()));

        let mut handles = Vec::new();
        for i in 0..8 {
            let shared = Arc::clone(&shared);
            handles.push(tokio::spawn(async move {
                shared
                    .encrypt(&format!("credential-{i}"))
                    .await
                    .expect("encrypt")
            }));
        }

        let mut envelopes = Vec::new();
        for handle in handles {
            envelopes.push(handle.await.expect("join"));
        }

        let namespace_dir = dir.path().join("shared");
        let entries: Vec<_> = std::fs::read_dir(&namespace_dir)
            .expect("read namespace dir")
            .collect();
        assert_eq!(entries.len(), 1, "exactly one key file");

        for (i, envelope) in envelopes.iter().enumerate() {
            let restored = shared.decrypt(envelope).await.expect("decrypt");
            assert_eq!(restored, format!("credential-{i}"));
        }
    }

    #[tokio::test]
    async fn facade_round_trips_through_the_trait() {
        let shared = SharedCipher::new(InMemoryKeyStore::default());

        let envelope = shared.encrypt("hello world").await.expect("encrypt");
        assert_eq!(shared.decrypt(&envelope).await.expect("decrypt"), "hello world");
    }

    /// Key store that fails its first call, then delegates.
    struct FlakyKeyStore {
        calls: AtomicUsize,
        inner: InMemoryKeyStore,
    }

    #[async_trait]
    impl KeyStore for FlakyKeyStore {
        async fn get_or_create(&self) -> Result<KeyMaterial, CredentialCipherError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(CredentialCipherError::Storage {
                    reason: "transient failure".to_string(),
                });
            }
            self.inner.get_or_create().await
        }
    }

    #[tokio::test]
    async fn failed_initialization_is_not_cached() {
        let shared = SharedCipher::new(FlakyKeyStore {
            calls: AtomicUsize::new(0),
            inner: InMemoryKeyStore::default(),
        });

        let err = shared.get().await.expect_err("first init fails");
        assert!(matches!(err, CredentialCipherError::Storage { .. }));

        // The handle recovers once the store does.
        let cipher = shared.get().await.expect("second init succeeds");
        let envelope = cipher.encrypt("recovered").expect("encrypt");
        assert_eq!(cipher.decrypt(&envelope).expect("decrypt"), "recovered");
    }
}
