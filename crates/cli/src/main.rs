use anyhow::Result;
use clap::{Parser, Subcommand};
use codemend_cli::api_client::ApiClient;
use codemend_common::{tracing_setup, RepoKey, SystemConfig};
use codemend_orchestrator::Services;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "codemend")]
#[command(about = "Autonomous code-modification service")]
struct Cli {
    /// Path to a TOML config file; defaults + env vars otherwise
    #[arg(long, env = "CODEMEND_CONFIG")]
    config: Option<String>,

    /// Server base URL for client commands
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the API server
    Serve,
    /// Clone and index a repository into the knowledge stores
    Index {
        /// Repository URL (may embed a branch reference)
        #[arg(long)]
        repo: String,
        /// Wipe the repository's vectors and graph first
        #[arg(long)]
        force: bool,
    },
    /// Submit a requirement against a running server and follow progress
    Submit {
        #[arg(long)]
        repo: String,
        #[arg(long)]
        requirement: String,
        /// "scaffold" or "maintain"
        #[arg(long, default_value = "maintain")]
        mode: String,
    },
    /// Show a conversation's current state
    Status { conversation_id: String },
    /// Cancel a running conversation
    Cancel { conversation_id: String },
}

fn load_config(path: Option<&str>) -> Result<SystemConfig> {
    Ok(match path {
        Some(path) => SystemConfig::load(path)?,
        None => {
            let mut config = SystemConfig::default();
            config.apply_env();
            config
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_setup::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => {
            let config = load_config(cli.config.as_deref())?;
            let services = Arc::new(Services::initialize(config).await?);
            codemend_api::run_server(services).await?;
        }
        Commands::Index { repo, force } => {
            let config = load_config(cli.config.as_deref())?;
            let services = Arc::new(Services::initialize(config).await?);

            let workspace_id = format!("index-{}", uuid::Uuid::new_v4());
            let (working_copy, clean_url, branch) = services
                .workspace
                .clone_for_conversation(&repo, &workspace_id)?;
            let branch = branch.unwrap_or_else(|| {
                working_copy
                    .head()
                    .ok()
                    .and_then(|h| h.shorthand().map(str::to_string))
                    .unwrap_or_else(|| "main".to_string())
            });
            let key = RepoKey::new(clean_url, branch);

            let report = if force {
                services
                    .indexer
                    .force_reindex(&services.workspace, &working_copy, &key)
                    .await?
            } else {
                services
                    .indexer
                    .sync(&services.workspace, &working_copy, &key)
                    .await?
            };
            println!(
                "{}: {} file(s) analyzed, {} chunk(s) created, {} deleted in {} ms",
                report.outcome,
                report.files_analyzed,
                report.chunks_created,
                report.chunks_deleted,
                report.total_ms
            );
        }
        Commands::Submit {
            repo,
            requirement,
            mode,
        } => {
            let client = ApiClient::new(cli.server);
            let conversation_id = client.create_conversation(&requirement, &repo, &mode).await?;
            println!("conversation: {conversation_id}");
            let view = client.follow(&conversation_id).await?;
            if let Some(pr_url) = view["pr_url"].as_str() {
                println!("pull request: {pr_url}");
            }
        }
        Commands::Status { conversation_id } => {
            let client = ApiClient::new(cli.server);
            let view = client.get_conversation(&conversation_id).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Commands::Cancel { conversation_id } => {
            let client = ApiClient::new(cli.server);
            client.cancel_conversation(&conversation_id).await?;
            println!("cancellation requested for {conversation_id}");
        }
    }

    Ok(())
}
