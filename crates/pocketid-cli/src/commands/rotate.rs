use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use pocketid_oidc::observability::init_tracing;
use pocketid_oidc::{EncryptionKeyRotator, OidcConfig};
use pocketid_oidc_postgres::PostgresOidcStore;
use serde_json::json;

use crate::cli::{OutputFormat, RotateArgs};
use crate::output::{print_field, print_json, print_success, print_warning};

pub async fn encryption_key_rotate(
    args: &RotateArgs,
    config_path: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let config = OidcConfig::load(config_path).context("Failed to load configuration")?;
    init_tracing(&config.logging);
    let instance_id = config.require_instance_id()?.to_string();
    let database_url = args
        .database_url
        .clone()
        .or_else(|| config.storage.database_url.clone())
        .context("No database configured (--database-url or storage.database_url)")?;

    if !args.yes && !confirm()? {
        bail!("Aborted");
    }

    let store = PostgresOidcStore::connect(&database_url, config.storage.max_connections)
        .await
        .context("Failed to connect to the database")?;
    store.migrate().await?;

    let rotator = EncryptionKeyRotator::new(Arc::new(store), instance_id);
    let report = rotator
        .rotate(args.encryption_key.as_bytes(), args.new_key.as_bytes())
        .await?;

    match format {
        OutputFormat::Json => print_json(&json!({
            "signing_key_rotated": report.signing_key_rotated,
            "secrets_reencrypted": report.secrets_reencrypted,
        }))?,
        OutputFormat::Text => {
            let signing_key = if report.signing_key_rotated {
                "re-encrypted"
            } else {
                "none stored"
            };
            print_field("Signing key", signing_key);
            print_field("Secrets", report.secrets_reencrypted);
            print_success("Encryption key rotation completed successfully.");
            println!("Restart pocket-id with the new ENCRYPTION_KEY to use the rotated data.");
        }
    }
    Ok(())
}

fn confirm() -> Result<bool> {
    print_warning(
        "Rotating the encryption key re-encrypts secrets in the database. \
         Pocket ID must be restarted with the new ENCRYPTION_KEY afterwards.",
    );
    print!("Continue? [y/N] ");
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("no"));
    }
}
