use anyhow::{Context, Result};
use pocketid_oidc::secret::{generate_client_secret, hash_client_secret};
use serde_json::json;

use crate::cli::OutputFormat;
use crate::output::{print_field, print_json, print_warning};

/// Prints a fresh client secret and the hash to store for it.
pub fn generate(format: OutputFormat) -> Result<()> {
    let secret = generate_client_secret();
    let hash = hash_client_secret(&secret)
        .map_err(|e| anyhow::anyhow!(e.to_string()))
        .context("Failed to hash client secret")?;

    match format {
        OutputFormat::Json => print_json(&json!({ "secret": secret, "hash": hash }))?,
        OutputFormat::Text => {
            print_field("Secret", &secret);
            print_field("Hash", &hash);
            print_warning("The secret is shown once; store only the hash.");
        }
    }
    Ok(())
}
