//! CLI interface for voicebridge

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::store::CallStore;
use crate::types::HumanAgent;

#[derive(Parser)]
#[command(name = "voicebridge")]
#[command(about = "Real-time telephony voice agent", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the config file (defaults to the platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the webhook + media-stream server (default)
    Serve {
        /// Bind host (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Bind port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Manage the human agent pool used for escalations
    Agents {
        #[command(subcommand)]
        command: AgentCommands,
    },
    /// List recent calls
    Calls {
        /// Maximum calls to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Show the turn history of a call
    History {
        /// Internal call id
        call_id: String,
    },
}

#[derive(Subcommand)]
enum AgentCommands {
    /// Add (or update) a human agent
    Add {
        name: String,
        email: String,
        /// Comma-separated skills
        #[arg(long)]
        skills: Option<String>,
        /// Comma-separated departments
        #[arg(long)]
        departments: Option<String>,
    },
    /// List all agents
    List,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = match cli.config {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        None | Some(Commands::Serve { host: None, port: None }) => {
            crate::server::start(config).await
        }
        Some(Commands::Serve { host, port }) => {
            let mut config = config;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            crate::server::start(config).await
        }
        Some(Commands::Agents { command }) => run_agents(command, &config).await,
        Some(Commands::Calls { limit }) => {
            let store = open_store(&config).await?;
            for call in store.list_recent_calls(limit).await? {
                println!(
                    "{}  {}  {:<11}  {} -> {}  sid={}",
                    call.started_at.format("%Y-%m-%d %H:%M:%S"),
                    call.id,
                    call.status.as_str(),
                    call.from_number,
                    call.to_number,
                    call.call_sid.as_deref().unwrap_or("-"),
                );
            }
            Ok(())
        }
        Some(Commands::History { call_id }) => {
            let store = open_store(&config).await?;
            for turn in store.interactions(&call_id, None).await? {
                println!(
                    "[{}] {:>8}: {}",
                    turn.timestamp.format("%H:%M:%S"),
                    turn.speaker.as_str(),
                    turn.text,
                );
            }
            Ok(())
        }
    }
}

async fn run_agents(command: AgentCommands, config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    match command {
        AgentCommands::Add {
            name,
            email,
            skills,
            departments,
        } => {
            let agent = HumanAgent {
                id: Uuid::new_v4().to_string(),
                name: name.clone(),
                email,
                is_available: true,
                is_active: true,
                skills: split_csv(skills),
                departments: split_csv(departments),
                active_escalations: 0,
                total_escalations: 0,
                last_active_at: None,
            };
            store.upsert_agent(&agent).await?;
            println!("added agent {} ({})", name, agent.id);
        }
        AgentCommands::List => {
            for agent in store.list_agents().await? {
                println!(
                    "{}  {:<20}  available={}  active={}  skills={}",
                    agent.id,
                    agent.name,
                    agent.is_available,
                    agent.is_active,
                    agent.skills.join(","),
                );
            }
        }
    }
    Ok(())
}

async fn open_store(config: &Config) -> Result<Arc<CallStore>> {
    Ok(Arc::new(CallStore::new(config.database_path()).await?))
}

fn split_csv(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
