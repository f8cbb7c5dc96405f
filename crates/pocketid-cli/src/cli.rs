use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "pocketid")]
#[command(about = "Pocket ID operator CLI")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ./pocketid.toml when present)
    #[arg(short, long, global = true, env = "POCKETID_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum, Default, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Re-encrypt the signing key and stored secrets with a new encryption key
    EncryptionKeyRotate(RotateArgs),
    /// Generate a client secret and its Argon2 hash
    GenerateClientSecret,
}

#[derive(clap::Args)]
pub struct RotateArgs {
    /// Current encryption key
    #[arg(long, env = "ENCRYPTION_KEY", hide_env_values = true)]
    pub encryption_key: String,

    /// New encryption key to re-encrypt data with
    #[arg(long)]
    pub new_key: String,

    /// PostgreSQL connection string (overrides the configuration file)
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Do not prompt for confirmation
    #[arg(short, long)]
    pub yes: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rotate() {
        let cli = Cli::try_parse_from([
            "pocketid",
            "encryption-key-rotate",
            "--encryption-key",
            "old-operator-secret",
            "--new-key",
            "new-operator-secret",
            "-y",
        ])
        .unwrap();

        let Commands::EncryptionKeyRotate(args) = cli.command else {
            panic!("expected encryption-key-rotate");
        };
        assert_eq!(args.new_key, "new-operator-secret");
        assert!(args.yes);
        assert_eq!(cli.format, OutputFormat::Text);
    }

    #[test]
    fn test_rotate_requires_new_key() {
        assert!(
            Cli::try_parse_from(["pocketid", "encryption-key-rotate", "--encryption-key", "x"]).is_err()
        );
    }

    #[test]
    fn test_parse_generate_client_secret_as_json() {
        let cli =
            Cli::try_parse_from(["pocketid", "--format", "json", "generate-client-secret"]).unwrap();
        assert!(matches!(cli.command, Commands::GenerateClientSecret));
        assert_eq!(cli.format, OutputFormat::Json);
    }
}
