use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "octofhir-sync")]
#[command(about = "Record FHIR edits offline and upload them to a server later")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Local store file (default: ~/.octofhir-sync/store.json)
    #[arg(long, global = true, env = "OCTOFHIR_SYNC_STORE")]
    pub store: Option<PathBuf>,

    /// Configuration file (default: ./octofhir-sync.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// FHIR base URL to upload to
    #[arg(short, long, global = true, env = "OCTOFHIR_URL")]
    pub server: Option<String>,

    /// Bearer token sent with uploads
    #[arg(long, global = true, env = "OCTOFHIR_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a resource locally
    Insert(FileArgs),
    /// Replace a resource locally
    Update(FileArgs),
    /// Delete a resource locally (e.g. Patient/123)
    Delete(DeleteArgs),
    /// Show pending local changes
    Status,
    /// Upload pending changes to the server
    Upload,
    /// Inspect configuration
    Config(ConfigArgs),
}

#[derive(clap::Args)]
pub struct FileArgs {
    /// Path to JSON file (reads from stdin if omitted)
    pub file: Option<String>,
}

#[derive(clap::Args)]
pub struct DeleteArgs {
    /// Resource reference (e.g. Patient/123)
    pub reference: String,
}

#[derive(clap::Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration as TOML
    Show,
}
