//! hostlink-agent: entry point.
//!
//! ```text
//! hostlink-agent --session-type=desktop --channel-id=<id>   Run a desktop session
//! hostlink-agent --config <path>                            Load a custom config TOML
//! hostlink-agent --gen-config                               Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use hostlink_agent::config::AgentConfig;
use hostlink_agent::logging;
use hostlink_core::desktop::SessionPowerController;
use hostlink_core::{AgentRole, Channel, DesktopSessionAgent, PlatformSubsystems};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "hostlink-agent", about = "hostlink per-session agent")]
struct Cli {
    /// What this agent does: "desktop" or "file-transfer".
    #[arg(long, required_unless_present = "gen_config")]
    session_type: Option<AgentRole>,

    /// Endpoint id published by the broker.
    #[arg(long, required_unless_present = "gen_config")]
    channel_id: Option<String>,

    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "hostlink-agent.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&AgentConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let config = AgentConfig::load(&cli.config);
    logging::init(&config.logging)?;

    info!("hostlink-agent v{}", env!("CARGO_PKG_VERSION"));

    let (Some(role), Some(channel_id)) = (cli.session_type, cli.channel_id) else {
        return Err("--session-type and --channel-id are required".into());
    };
    info!(%role, channel_id = %channel_id, "starting agent");

    match role {
        AgentRole::Desktop => {
            let channel = Channel::connect(&channel_id).await?;
            let agent = DesktopSessionAgent::new(
                channel,
                PlatformSubsystems::new(config.capture_options()),
                Box::new(SessionPowerController::new()),
            );
            agent.run().await?;
        }
        AgentRole::FileTransfer => {
            error!("file transfer sessions are not handled by this agent");
            return Err("unsupported session type: file-transfer".into());
        }
    }

    info!("agent exiting");
    Ok(())
}
