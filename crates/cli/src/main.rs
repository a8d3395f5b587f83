//! Cloud Cost Optimizer CLI
//!
//! A command-line tool for querying savings, remediations, the audit trail
//! and health of a running cost agent.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{report, settings, status};

/// Cloud Cost Optimizer CLI
#[derive(Parser)]
#[command(name = "cco")]
#[command(author, version, about = "CLI for the Cloud Cost Optimizer agent", long_about = None)]
pub struct Cli {
    /// Agent URL (can also be set via CCO_API_URL env var or saved with `cco config set --url`)
    #[arg(long, env = "CCO_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, global = true)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show total and per-service savings
    Summary,

    /// List applied remediations
    Remediations {
        /// Only show remediations for this service
        #[arg(long, short)]
        service: Option<String>,
    },

    /// List anomalies that were denied or failed
    Audit,

    /// List recent cost observations
    Observations {
        /// Number of observations to show
        #[arg(long, short, default_value_t = 20)]
        limit: usize,
    },

    /// Show agent health
    Status,

    /// Manage saved CLI settings
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show saved settings
    Show,

    /// Save settings used when no flag or env var is given
    Set {
        /// Agent URL
        #[arg(long)]
        url: Option<String>,

        /// Default output format
        #[arg(long)]
        default_format: Option<output::OutputFormat>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let saved = config::Config::load()?;
    let format = saved.resolve_format(cli.format);

    match cli.command {
        // Settings commands never talk to the agent
        Commands::Config(ConfigCommands::Show) => settings::show(format)?,
        Commands::Config(ConfigCommands::Set {
            url,
            default_format,
        }) => settings::set(url, default_format)?,
        command => {
            let client = client::ApiClient::new(&saved.resolve_api_url(cli.api_url))?;
            run_agent_command(&client, command, format).await?;
        }
    }

    Ok(())
}

async fn run_agent_command(
    client: &client::ApiClient,
    command: Commands,
    format: output::OutputFormat,
) -> Result<()> {
    match command {
        Commands::Summary => report::show_summary(client, format).await,
        Commands::Remediations { service } => {
            report::list_remediations(client, service, format).await
        }
        Commands::Audit => report::list_audit(client, format).await,
        Commands::Observations { limit } => report::list_observations(client, limit, format).await,
        Commands::Status => status::show_status(client, format).await,
        Commands::Config(_) => Ok(()),
    }
}
