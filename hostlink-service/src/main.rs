//! hostlink-service: entry point.
//!
//! ```text
//! hostlink-service                  Launch the agent and drive one session
//! hostlink-service --config <path>  Load a custom config TOML
//! hostlink-service --session <id>   Override the target session
//! hostlink-service --gen-config     Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};

use hostlink_core::{Server, ServerEvent, launch_session_process};
use hostlink_service::broker::{BrokerSession, verify_peer_session};
use hostlink_service::config::ServiceConfig;
use hostlink_service::logging;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "hostlink-service", about = "hostlink demonstration broker")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "hostlink-service.toml")]
    config: PathBuf,

    /// OS session to launch the agent into; overrides the config.
    #[arg(long)]
    session: Option<u32>,

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
        let text = toml::to_string_pretty(&ServiceConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ServiceConfig::load(&cli.config);
    if let Some(session_id) = cli.session {
        config.session.session_id = session_id;
    }
    logging::init(&config.logging)?;

    info!("hostlink-service v{}", env!("CARGO_PKG_VERSION"));

    let session_type = config.session.session_type;
    let session_id = config.session.session_id;

    // 1. Publish a fresh endpoint.
    let channel_id = Server::create_unique_id();
    let (server_tx, mut server_rx) = mpsc::unbounded_channel();
    let mut server = Server::new();
    server.start(&channel_id, server_tx)?;

    // 2. Launch the agent into the target session.
    info!(?session_type, session_id, channel_id = %channel_id, "launching agent");
    if let Err(err) = launch_session_process(session_type, session_id, &channel_id, config.agent.executable()) {
        error!(error = %err, step = ?err.failed_step(), "agent launch failed");
        return Err(err.into());
    }

    // 3. Wait for it to connect back.
    let accepted = tokio::time::timeout(config.agent.connect_timeout(), server_rx.recv()).await;
    let channel = match accepted {
        Ok(Some(ServerEvent::Connection(channel))) => channel,
        Ok(Some(ServerEvent::Error)) | Ok(None) => return Err("server failed before the agent connected".into()),
        Err(_) => return Err("agent did not connect in time".into()),
    };
    server.stop();

    verify_peer_session(&channel, session_id)?;

    // 4. Drive the session until the agent leaves or Ctrl-C.
    let session = BrokerSession::new(channel, session_type.agent_role());
    let frames = session
        .run(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Ctrl-C received, shutting down");
        })
        .await?;

    info!(frames, "session finished");
    Ok(())
}
