//! # CMEI Fila — waitlist service
//!
//! Usage:
//!   cmei-fila serve                       # Start the HTTP API (default port 3000)
//!   cmei-fila serve --port 8080           # Custom port
//!   cmei-fila create-token secretaria     # Mint an API token for an operator
//!   cmei-fila revoke-tokens secretaria    # Revoke every token of an operator
//!   cmei-fila import inscricoes.csv       # Bulk-import children from CSV

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cmei_core::config::CmeiConfig;
use cmei_db::WaitlistDb;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cmei-fila", version, about = "CMEI waitlist service")]
struct Cli {
    /// Config file (defaults to $CMEI_CONFIG or ~/.cmei/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP API
    Serve {
        /// Listen port (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Create an API token for an operator and print it once
    CreateToken { usuario: String },
    /// Revoke every API token of an operator
    RevokeTokens { usuario: String },
    /// Import children from a CSV file
    Import {
        file: PathBuf,
        /// Operator recorded in the history log
        #[arg(long, default_value = "importacao")]
        usuario: String,
    },
}

fn load_config(path: Option<&str>) -> Result<CmeiConfig> {
    let path = path
        .map(String::from)
        .or_else(|| std::env::var("CMEI_CONFIG").ok())
        .map(|p| PathBuf::from(shellexpand::tilde(&p).to_string()));
    let mut config = match path {
        Some(p) => CmeiConfig::load_from(&p).with_context(|| format!("loading {}", p.display()))?,
        None => CmeiConfig::load()?,
    };
    config.apply_env();
    Ok(config)
}

fn open_db(config: &CmeiConfig) -> Result<WaitlistDb> {
    let db_path = config.database.expanded_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(WaitlistDb::open(&db_path)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "cmei=debug,cmei_gateway=debug,cmei_workflow=debug,cmei_db=debug,cmei_notify=debug,tower_http=debug"
    } else {
        "cmei=info,cmei_gateway=info,cmei_workflow=info,cmei_db=info,cmei_notify=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { port } => {
            if let Some(port) = port {
                config.gateway.port = port;
            }
            cmei_gateway::start(config).await?;
        }
        Command::CreateToken { usuario } => {
            let db = open_db(&config)?;
            let token = db.create_token(&usuario)?;
            println!("Token for '{usuario}' (shown once):");
            println!("{token}");
        }
        Command::RevokeTokens { usuario } => {
            let db = open_db(&config)?;
            let revoked = db.revoke_tokens(&usuario)?;
            println!("Revoked {revoked} token(s) for '{usuario}'");
        }
        Command::Import { file, usuario } => {
            let csv = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            let db = Arc::new(open_db(&config)?);
            let workflow = cmei_workflow::Workflow::new(db, &config.fila);
            let report = workflow.importar_csv(&csv, &usuario).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
