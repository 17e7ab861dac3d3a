use std::{
    fmt,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use credvault_core::cipher::CredentialCipherError;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, instrument};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Symmetric key length in bytes (AES-256).
const KEY_LEN: usize = 32;

/// Maximum allowed length for a descriptor segment.
const MAX_SEGMENT_LEN: usize = 128;

/// Current on-disk key file format version.
const KEY_FILE_VERSION: u32 = 1;

/// Identifies where key material lives: the key file sits at
/// `<root>/<namespace>/<name>.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDescriptor {
    root: PathBuf,
    namespace: String,
    name: String,
}

impl KeyDescriptor {
    /// Build a descriptor, rejecting namespace/name segments that are empty
    /// or would escape the root directory.
    pub fn new(
        root: impl Into<PathBuf>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self, CredentialCipherError> {
        let namespace = namespace.into();
        let name = name.into();
        validate_segment("key namespace", &namespace)?;
        validate_segment("key name", &name)?;
        Ok(Self {
            root: root.into(),
            namespace,
            name,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `namespace/name`, used as the key identifier in logs.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Path of the key file addressed by this descriptor.
    pub fn key_path(&self) -> PathBuf {
        self.root
            .join(&self.namespace)
            .join(format!("{}.json", self.name))
    }
}

/// Validate that a descriptor segment is non-empty and path-safe.
///
/// Allowed: ASCII alphanumeric, underscore, hyphen. Max length 128.
fn validate_segment(field: &str, segment: &str) -> Result<(), CredentialCipherError> {
    if segment.is_empty() {
        return Err(CredentialCipherError::InvalidDescriptor {
            reason: format!("{field} must not be empty"),
        });
    }
    if segment.len() > MAX_SEGMENT_LEN {
        return Err(CredentialCipherError::InvalidDescriptor {
            reason: format!("{field} exceeds maximum length of {MAX_SEGMENT_LEN} characters"),
        });
    }
    if !segment
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(CredentialCipherError::InvalidDescriptor {
            reason: format!(
                "{field} contains invalid characters (allowed: alphanumeric, underscore, hyphen): {segment}"
            ),
        });
    }
    Ok(())
}

/// Key material used to parameterize the credential cipher.
/// Zeroed on drop; Debug redacts the key bytes.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    /// Identifier for logging/rotation (never log key bytes).
    id: String,
    /// 256-bit symmetric key.
    bytes: [u8; KEY_LEN],
}

impl KeyMaterial {
    fn new(id: String, bytes: [u8; KEY_LEN]) -> Self {
        Self { id, bytes }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("id", &self.id)
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// On-disk envelope for persisted key material.
#[derive(Debug, Serialize, Deserialize)]
struct KeyFile {
    version: u32,
    created_at: DateTime<Utc>,
    /// Base64-encoded 256-bit key.
    key: String,
}

/// Provides access to named key material (filesystem in production; memory
/// in tests and ephemeral sessions).
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Load the key material, generating and persisting it on first use.
    /// Idempotent: existing material is never overwritten.
    async fn get_or_create(&self) -> Result<KeyMaterial, CredentialCipherError>;
}

/// Filesystem-backed key store addressed by a [`KeyDescriptor`].
pub struct FileKeyStore {
    descriptor: KeyDescriptor,
}

impl FileKeyStore {
    pub fn new(descriptor: KeyDescriptor) -> Self {
        Self { descriptor }
    }

    pub fn descriptor(&self) -> &KeyDescriptor {
        &self.descriptor
    }

    /// Load and validate an existing key file; `Ok(None)` when absent.
    async fn load_existing(
        &self,
        path: &Path,
    ) -> Result<Option<KeyMaterial>, CredentialCipherError> {
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(storage_err(err)),
        };

        let file: KeyFile =
            serde_json::from_slice(&raw).map_err(|e| CredentialCipherError::CorruptKeyMaterial {
                reason: format!("unparseable key file: {e}"),
            })?;
        if file.version != KEY_FILE_VERSION {
            return Err(CredentialCipherError::CorruptKeyMaterial {
                reason: format!("unsupported key file version: {}", file.version),
            });
        }

        let decoded =
            BASE64
                .decode(&file.key)
                .map_err(|e| CredentialCipherError::CorruptKeyMaterial {
                    reason: format!("key decode failed: {e}"),
                })?;
        if decoded.len() != KEY_LEN {
            return Err(CredentialCipherError::CorruptKeyMaterial {
                reason: format!("expected {KEY_LEN} key bytes, got {}", decoded.len()),
            });
        }

        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&decoded);
        Ok(Some(KeyMaterial::new(
            self.descriptor.qualified_name(),
            bytes,
        )))
    }

    /// Generate fresh material and persist it without clobbering a
    /// concurrently written key file. If another writer wins the rename, its
    /// material is loaded and returned so all parties agree on one key.
    async fn generate_at(&self, path: &Path) -> Result<KeyMaterial, CredentialCipherError> {
        let parent = path.parent().ok_or_else(|| CredentialCipherError::Storage {
            reason: "invalid key material path".to_string(),
        })?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(storage_err)?;
        restrict_dir_permissions(parent).await?;

        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);

        let file = KeyFile {
            version: KEY_FILE_VERSION,
            created_at: Utc::now(),
            key: BASE64.encode(bytes),
        };
        let json = serde_json::to_vec(&file).map_err(storage_err)?;

        let mut tmp = NamedTempFile::new_in(parent).map_err(storage_err)?;
        tmp.write_all(&json).map_err(storage_err)?;
        tmp.flush().map_err(storage_err)?;
        restrict_file_permissions(tmp.as_file())?;

        match tmp.persist_noclobber(path) {
            Ok(_) => {
                debug!(path = %path.display(), "generated key material");
                Ok(KeyMaterial::new(self.descriptor.qualified_name(), bytes))
            }
            Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
                // Lost the race to another writer; adopt its key.
                self.load_existing(path)
                    .await?
                    .ok_or_else(|| CredentialCipherError::Storage {
                        reason: "key file vanished during provisioning".to_string(),
                    })
            }
            Err(err) => Err(storage_err(err.error)),
        }
    }
}

#[async_trait]
impl KeyStore for FileKeyStore {
    #[instrument(skip_all, fields(key = %self.descriptor.qualified_name()))]
    async fn get_or_create(&self) -> Result<KeyMaterial, CredentialCipherError> {
        let path = self.descriptor.key_path();
        if let Some(material) = self.load_existing(&path).await? {
            return Ok(material);
        }
        self.generate_at(&path).await
    }
}

/// In-memory key store for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyStore {
    inner: Arc<Mutex<Option<KeyMaterial>>>,
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn get_or_create(&self) -> Result<KeyMaterial, CredentialCipherError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| CredentialCipherError::Storage {
                reason: format!("lock poisoned: {err}"),
            })?;

        if let Some(existing) = guard.clone() {
            return Ok(existing);
        }

        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        let material = KeyMaterial::new("memory".to_string(), bytes);
        *guard = Some(material.clone());
        Ok(material)
    }
}

#[cfg(unix)]
async fn restrict_dir_permissions(path: &Path) -> Result<(), CredentialCipherError> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o700);
    tokio::fs::set_permissions(path, perms)
        .await
        .map_err(storage_err)
}

#[cfg(not(unix))]
async fn restrict_dir_permissions(_path: &Path) -> Result<(), CredentialCipherError> {
    Ok(())
}

#[cfg(unix)]
fn restrict_file_permissions(file: &std::fs::File) -> Result<(), CredentialCipherError> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(0o600))
        .map_err(storage_err)
}

#[cfg(not(unix))]
fn restrict_file_permissions(_file: &std::fs::File) -> Result<(), CredentialCipherError> {
    Ok(())
}

fn storage_err<E: ToString>(err: E) -> CredentialCipherError {
    CredentialCipherError::Storage {
        reason: err.to_string(),
    }
}
