use anyhow::Context;
use clap::Parser;
use convoindex::cli::{Cli, Commands, ConfigAction};
use convoindex::config::{validate_config_object, Config, DEFAULT_LIST_LIMIT};
use convoindex::gateway::GatewayServer;
use convoindex::logging;
use convoindex::pipeline::{ConversationIndex, ConversationInput};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(opts) => {
            info!("Starting convoindex REST server");
            let config = Config::load(opts.config.as_deref())?;
            let server = GatewayServer::start(config, opts).await?;
            server.run_until_shutdown().await?;
        }
        Commands::Ingest(opts) => {
            let config = Config::load(opts.config.as_deref())?;
            let raw = std::fs::read_to_string(&opts.file)
                .with_context(|| format!("cannot read {}", opts.file.display()))?;
            let input: ConversationInput = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not a conversation document", opts.file.display()))?;

            let index = ConversationIndex::open(&config)?;
            let id = index.ingest(input.meta, &input.messages).await?;
            println!("{id}");
        }
        Commands::Search(opts) => {
            let config = Config::load(opts.config.as_deref())?;
            let top_k = opts.top_k.unwrap_or(config.search.default_top_k);
            let index = ConversationIndex::open(&config)?;
            let results = index.search(&opts.query, top_k).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Commands::List(opts) => {
            let config = Config::load(opts.config.as_deref())?;
            let index = ConversationIndex::open(&config)?;
            let limit = opts.limit.unwrap_or(DEFAULT_LIST_LIMIT);
            let records = index.list_conversations(limit, opts.offset)?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Commands::Delete(opts) => {
            let config = Config::load(opts.config.as_deref())?;
            let index = ConversationIndex::open(&config)?;
            if !index.delete_conversation(&opts.id)? {
                anyhow::bail!("conversation {} not found", opts.id);
            }
            info!("Conversation {} deleted", opts.id);
        }
        Commands::Stats(opts) => {
            let config = Config::load(opts.config.as_deref())?;
            let index = ConversationIndex::open(&config)?;
            println!("{}", serde_json::to_string_pretty(&index.stats()?)?);
        }
        Commands::Config(opts) => match opts.action {
            ConfigAction::Init => {
                let path = opts.config.as_deref().unwrap_or("convoindex.json");
                Config::write_default(path)?;
                info!("Configuration file created at {}", path);
            }
            ConfigAction::Show => {
                let config = Config::load(opts.config.as_deref())?;
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            ConfigAction::Validate => {
                let config = Config::load(opts.config.as_deref())?;
                validate_config_object(&config)?;
                info!("Configuration is valid");
            }
        },
        Commands::Version => {
            println!("convoindex {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
