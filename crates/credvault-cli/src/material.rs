use std::path::PathBuf;

use color_eyre::Result;
use credvault_keystore::{
    keystore::{FileKeyStore, KeyDescriptor},
    shared::SharedCipher,
};
use dirs::data_dir;
use tracing::debug;

use crate::cli::Cli;
use crate::config::Config;

const DEFAULT_KEY_NAME: &str = "credential-key";
const DEFAULT_KEY_NAMESPACE: &str = "credvault";

/// Resolve the default key material directory.
pub fn default_material_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("credvault").join("material"))
}

/// Resolve the key descriptor: CLI flags win over config, config over
/// built-in defaults.
pub fn descriptor_from(config: &Config, cli: &Cli) -> Result<KeyDescriptor> {
    let root = match cli
        .material_path
        .clone()
        .or_else(|| config.material_path.clone())
    {
        Some(root) => root,
        None => default_material_dir()?,
    };
    let namespace = cli
        .key_namespace
        .clone()
        .or_else(|| config.key_namespace.clone())
        .unwrap_or_else(|| DEFAULT_KEY_NAMESPACE.to_string());
    let name = cli
        .key_name
        .clone()
        .or_else(|| config.key_name.clone())
        .unwrap_or_else(|| DEFAULT_KEY_NAME.to_string());

    debug!(?root, namespace, name, "resolved key descriptor");
    KeyDescriptor::new(root, namespace, name).map_err(|e| color_eyre::eyre::eyre!(e.to_string()))
}

/// Build the cipher handle the subcommands share. This is the composition
/// root: the descriptor is fixed here and nowhere else.
pub fn cipher_from(config: &Config, cli: &Cli) -> Result<SharedCipher<FileKeyStore>> {
    let descriptor = descriptor_from(config, cli)?;
    Ok(SharedCipher::new(FileKeyStore::new(descriptor)))
}

/// Helper for tests to construct a cipher handle rooted at a temp dir.
#[cfg(test)]
pub fn test_cipher(root: impl Into<PathBuf>) -> SharedCipher<FileKeyStore> {
    let descriptor =
        KeyDescriptor::new(root.into(), "test", "test-key").expect("test descriptor");
    SharedCipher::new(FileKeyStore::new(descriptor))
}
