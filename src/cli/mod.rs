use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "convoindex",
    version,
    about = "Conversation chunking, embedding and similarity search"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the REST server.
    Serve(ServeOpts),
    /// Ingest a conversation from a JSON file.
    Ingest(IngestOpts),
    /// Search stored chunks.
    Search(SearchOpts),
    /// List stored conversations.
    List(ListOpts),
    /// Delete a conversation and its chunks.
    Delete(DeleteOpts),
    /// Show index statistics.
    Stats(StatsOpts),
    Config(ConfigOpts),
    Version,
}

#[derive(clap::Args)]
pub struct ServeOpts {
    #[arg(short, long)]
    pub config: Option<String>,
    #[arg(short, long)]
    pub port: Option<u16>,
    #[arg(short, long)]
    pub bind: Option<String>,
}

#[derive(clap::Args)]
pub struct IngestOpts {
    #[arg(short, long)]
    pub config: Option<String>,
    /// JSON file with conversation metadata and a `messages` array.
    pub file: PathBuf,
}

#[derive(clap::Args)]
pub struct SearchOpts {
    #[arg(short, long)]
    pub config: Option<String>,
    pub query: String,
    #[arg(short = 'k', long)]
    pub top_k: Option<i64>,
}

#[derive(clap::Args)]
pub struct ListOpts {
    #[arg(short, long)]
    pub config: Option<String>,
    #[arg(short, long)]
    pub limit: Option<usize>,
    #[arg(short, long, default_value_t = 0)]
    pub offset: usize,
}

#[derive(clap::Args)]
pub struct DeleteOpts {
    #[arg(short, long)]
    pub config: Option<String>,
    pub id: uuid::Uuid,
}

#[derive(clap::Args)]
pub struct StatsOpts {
    #[arg(short, long)]
    pub config: Option<String>,
}

#[derive(clap::Args)]
pub struct ConfigOpts {
    #[arg(short, long)]
    pub config: Option<String>,
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    Show,
    Validate,
    Init,
}
