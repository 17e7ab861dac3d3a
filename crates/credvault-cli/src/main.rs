mod cli;
mod config;
mod material;

use clap::Parser;
use color_eyre::Result;
use credvault_core::cipher::{Ciphertext, CredentialCipher};
use credvault_keystore::keystore::{FileKeyStore, KeyStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::{Cli, Command, ConfigCommand};

/// Entry point wiring the CLI to the keystore.
#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = Cli::parse();
    let config = config::load()?;
    match cli.command.clone() {
        Command::Generate => run_generate(&config, &cli).await?,
        Command::Health => run_health(&config, &cli).await?,
        Command::Encrypt { plaintext } => run_encrypt(&plaintext, &config, &cli).await?,
        Command::Decrypt { ciphertext } => run_decrypt(&ciphertext, &config, &cli).await?,
        Command::Version => print_version(),
        Command::Config(ConfigCommand::Init) => init_config(&config)?,
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info to avoid noisy stdout.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("credvault {}", env!("CARGO_PKG_VERSION"));
}

/// Ensures key material exists for the resolved descriptor.
async fn run_generate(config: &config::Config, cli: &Cli) -> Result<()> {
    let store = FileKeyStore::new(material::descriptor_from(config, cli)?);
    store
        .get_or_create()
        .await
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
    println!(
        "Key material ready at {}",
        store.descriptor().key_path().display()
    );
    Ok(())
}

/// Runs a quick encrypt/decrypt round-trip against the configured key.
async fn run_health(config: &config::Config, cli: &Cli) -> Result<()> {
    let cipher = material::cipher_from(config, cli)?;
    run_cipher_health(&cipher).await?;
    println!("Cipher: ok");
    Ok(())
}

async fn run_cipher_health<C: CredentialCipher>(cipher: &C) -> Result<()> {
    let probe = "health-probe";
    let envelope = cipher
        .encrypt(probe)
        .await
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
    let round_trip = cipher
        .decrypt(&envelope)
        .await
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;

    if round_trip != probe {
        color_eyre::eyre::bail!("cipher round-trip failed");
    }
    Ok(())
}

async fn run_encrypt(plaintext: &str, config: &config::Config, cli: &Cli) -> Result<()> {
    let cipher = material::cipher_from(config, cli)?;
    let envelope = cipher
        .encrypt(plaintext)
        .await
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
    println!("{}", envelope.to_base64());
    Ok(())
}

async fn run_decrypt(encoded: &str, config: &config::Config, cli: &Cli) -> Result<()> {
    let cipher = material::cipher_from(config, cli)?;
    let envelope =
        Ciphertext::from_base64(encoded).map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
    let plaintext = cipher
        .decrypt(&envelope)
        .await
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
    println!("{plaintext}");
    Ok(())
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use credvault_core::cipher::MaskingCipher;

    use super::*;
    use crate::material;

    #[tokio::test]
    async fn health_check_with_file_backed_cipher_succeeds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cipher = material::test_cipher(dir.path());
        run_cipher_health(&cipher)
            .await
            .expect("health check should succeed");
    }

    #[tokio::test]
    async fn health_check_with_masking_double_succeeds() {
        run_cipher_health(&MaskingCipher::new())
            .await
            .expect("health check should succeed");
    }

    #[tokio::test]
    async fn base64_envelope_survives_the_cli_data_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cipher = material::test_cipher(dir.path());

        // Same shape as `encrypt` then `decrypt` subcommands: envelope goes
        // out as base64 text and comes back in.
        let envelope = cipher.encrypt("hello world").await.expect("encrypt");
        let wire = envelope.to_base64();

        let restored = cipher
            .decrypt(&Ciphertext::from_base64(&wire).expect("decode"))
            .await
            .expect("decrypt");
        assert_eq!(restored, "hello world");
    }
}
