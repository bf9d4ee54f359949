mod cli;
mod commands;
mod observability;
mod output;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use octofhir_sync::config::loader::load_config;
use octofhir_sync_memory::MemoryDatabase;

use cli::{Cli, Commands, ConfigCommands};
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
    let config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    observability::init_tracing_with_level(&config.logging.level);

    match &cli.command {
        Commands::Config(args) => match &args.command {
            ConfigCommands::Show => {
                let store = store_path(&cli.store)?;
                println!("# {}: {}", "store".cyan(), store.display());
                println!("{}", toml::to_string_pretty(&config)?);
            }
        },
        Commands::Insert(args) => {
            let db = open_store(&cli.store).await?;
            commands::journal::insert(&db, &args.file).await?;
        }
        Commands::Update(args) => {
            let db = open_store(&cli.store).await?;
            commands::journal::update(&db, &args.file).await?;
        }
        Commands::Delete(args) => {
            let db = open_store(&cli.store).await?;
            commands::journal::delete(&db, &args.reference).await?;
        }
        Commands::Status => {
            let db = open_store(&cli.store).await?;
            commands::status::status(&db).await?;
        }
        Commands::Upload => {
            let db = Arc::new(open_store(&cli.store).await?);
            commands::upload::upload(db, &config, &cli.server, &cli.token).await?;
        }
    }

    Ok(())
}

fn store_path(cli_store: &Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = cli_store {
        return Ok(path.clone());
    }
    Ok(dirs::home_dir()
        .context("Cannot determine home directory")?
        .join(".octofhir-sync")
        .join("store.json"))
}

async fn open_store(cli_store: &Option<PathBuf>) -> Result<MemoryDatabase> {
    let path = store_path(cli_store)?;
    MemoryDatabase::open(&path)
        .await
        .with_context(|| format!("Failed to open store {}", path.display()))
}
