use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// CLI surface definition. One subcommand per keystore operation.
#[derive(Parser, Debug)]
#[command(
    name = "credvault",
    about = "Provision and exercise credential-encryption key material",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Directory holding key material (defaults to the platform data dir).
    #[arg(long, global = true)]
    pub material_path: Option<PathBuf>,

    /// Logical key name within the namespace.
    #[arg(long, global = true)]
    pub key_name: Option<String>,

    /// Namespace grouping related keys.
    #[arg(long, global = true)]
    pub key_namespace: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ensure key material exists, generating it when absent.
    Generate,
    /// Run an encrypt/decrypt round-trip against the configured key.
    Health,
    /// Encrypt a credential and print the base64 envelope.
    Encrypt {
        /// Plaintext credential to seal.
        plaintext: String,
    },
    /// Decrypt a base64 envelope produced by `encrypt`.
    Decrypt {
        /// Base64-encoded ciphertext envelope.
        ciphertext: String,
    },
    /// Print version and exit.
    Version,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}
