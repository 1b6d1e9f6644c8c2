//! CPU advisor debug CLI
//!
//! Talks to the advisor and the CPU plugin over their unix sockets and to
//! the advisor's HTTP health endpoint.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{checkpoint, health, watch};
use std::time::Duration;

/// CPU advisor debug CLI
#[derive(Parser)]
#[command(name = "cpuadvctl")]
#[command(author, version, about = "Debug CLI for the CPU Advisor", long_about = None)]
pub struct Cli {
    /// CPUAdvisor unix socket
    #[arg(
        long,
        env = "CPUADVCTL_ADVISOR_SOCKET",
        default_value = "/var/lib/katalyst/qrm_advisor/cpu_advisor.sock"
    )]
    pub advisor_socket: String,

    /// CPU plugin unix socket
    #[arg(
        long,
        env = "CPUADVCTL_PLUGIN_SOCKET",
        default_value = "/var/lib/katalyst/qrm_advisor/cpu_plugin.sock"
    )]
    pub plugin_socket: String,

    /// Advisor health/metrics endpoint URL
    #[arg(long, env = "CPUADVCTL_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Dial timeout in seconds
    #[arg(long, default_value_t = 5)]
    pub timeout: u64,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Stream ListAndWatch responses from the advisor
    Watch {
        /// Stop after this many responses
        #[arg(long, short)]
        count: Option<usize>,
    },

    /// Print the CPU plugin checkpoint
    Checkpoint,

    /// Show advisor health
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let timeout = Duration::from_secs(cli.timeout);

    match cli.command {
        Commands::Watch { count } => {
            watch::watch(&cli.advisor_socket, timeout, count, cli.format).await?;
        }
        Commands::Checkpoint => {
            checkpoint::show_checkpoint(&cli.plugin_socket, timeout, cli.format).await?;
        }
        Commands::Health => {
            let client = client::ApiClient::new(&cli.api_url)?;
            health::show_health(&client, cli.format).await?;
        }
    }

    Ok(())
}
