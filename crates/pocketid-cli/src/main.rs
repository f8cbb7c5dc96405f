mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};
use output::print_error;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::EncryptionKeyRotate(args) => {
            commands::rotate::encryption_key_rotate(args, cli.config.as_deref(), cli.format)
                .await?;
        }
        Commands::GenerateClientSecret => {
            commands::client_secret::generate(cli.format)?;
        }
    }

    Ok(())
}
