mod config;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use turnstile_core::ToolRegistry;
use turnstile_engine::DelegateTool;
use turnstile_logging::{init_logging, redact_secrets};
use turnstile_model::{ModelClient, OpenAiCompatClient};
use turnstile_protocol::{ProtocolServer, ServerConfig};
use turnstile_session::SessionStore;
use turnstile_tools::register_builtins;

use config::Config;

#[derive(Parser)]
#[command(name = "turnstile")]
#[command(about = "Turnstile — turn execution engine for coding agents")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the protocol on stdin/stdout
    Serve {
        /// Approve all side-effecting tool calls without prompting
        #[arg(long)]
        auto_approve: bool,
    },
    /// List the registered tools
    Tools,
}

fn build_registry() -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    register_builtins(&mut registry)?;
    registry.register(Arc::new(DelegateTool))?;
    Ok(registry)
}

async fn serve(config: Config) -> Result<()> {
    let registry = build_registry()?;

    let model: Option<Arc<dyn ModelClient>> = config.api_key.as_ref().map(|key| {
        let mut client = OpenAiCompatClient::new(key.clone());
        if let Some(base_url) = &config.base_url {
            client = client.with_base_url(base_url.clone());
        }
        Arc::new(client) as Arc<dyn ModelClient>
    });
    match &model {
        Some(_) => info!(model = %config.model, "llm backend configured"),
        None => info!("no API key set; prompts will fail with llm-not-configured"),
    }

    let store = match &config.db_path {
        Some(path) => Some(Arc::new(SessionStore::open(path)?)),
        None => None,
    };

    let server = ProtocolServer::new(
        ServerConfig {
            model,
            model_name: config.model,
            system_prompt: config.system_prompt,
            engine: config.engine,
            store,
        },
        registry,
    );

    info!("serving protocol on stdio");
    let stdio = tokio::io::join(tokio::io::stdin(), tokio::io::stdout());
    server.run(stdio).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut config = Config::from_env();
    init_logging(config.log_dir.as_deref().map(Path::new), &config.log_level);
    debug!(
        config = %redact_secrets(&format!("{config:?}")),
        "resolved configuration"
    );

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { auto_approve } => {
            config.engine.auto_approve = config.engine.auto_approve || auto_approve;
            serve(config).await?;
        }
        Commands::Tools => {
            let registry = build_registry()?;
            for declaration in registry.declarations() {
                println!("{:<16} {}", declaration.name, declaration.description);
            }
        }
    }
    Ok(())
}
