//! PDI control client - Main entry point
//!
//! Talks to a running pdi-server over the length-framed control
//! protocol: query per-instance status, toggle the force-update flag,
//! and tail the daemon's streamed log lines.

use std::net::SocketAddr;
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use pdi_common::channel::ControlChannel;
use pdi_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use pdi_common::types::{Command, CommandReply, ControlPayload};

/// Default control connect timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

#[derive(Parser)]
#[command(name = "pdi-ctl", about = "Control client for a running pdi-server", version)]
struct Cli {
    /// Control endpoint of the daemon
    #[arg(long, env = "PDI_CONTROL_ADDR", default_value = "127.0.0.1:7171")]
    addr: SocketAddr,

    /// Connect timeout in seconds
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS)]
    timeout: u64,

    /// Verbose logging to the console
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report per-instance status and pending work counts
    Status,
    /// Toggle the force-update flag on one instance
    ForceUpdate {
        /// Instance name
        instance: String,
        /// Enable (--on) or disable (--off) forced persistence
        #[arg(long, conflicts_with = "off")]
        on: bool,
        #[arg(long)]
        off: bool,
    },
    /// Stream the daemon's log lines to stdout
    Tail,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Warn
        })
        .output(LogOutput::Console)
        .log_file_prefix("pdi-ctl".to_string())
        .build();
    // A control client should work even when logging cannot be set up.
    let _ = init_logging(&log_config);

    if let Err(e) = run(&cli).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let timeout = Duration::from_secs(cli.timeout);
    let channel = ControlChannel::connect(cli.addr, timeout)
        .await
        .with_context(|| format!("cannot reach daemon at {}", cli.addr))?;

    match &cli.command {
        Commands::Status => {
            let reply = roundtrip(&channel, Command::Status).await?;
            if reply.instances.is_empty() {
                println!("No instances registered");
                return Ok(());
            }
            println!(
                "{:<24} {:>8} {:>12} {:>8}",
                "INSTANCE", "RUNNING", "FORCE_UPDATE", "PENDING"
            );
            for row in &reply.instances {
                println!(
                    "{:<24} {:>8} {:>12} {:>8}",
                    row.name, row.running, row.force_update, row.pending_files
                );
            }
        },
        Commands::ForceUpdate { instance, on, off } => {
            if *on == *off {
                anyhow::bail!("pass exactly one of --on or --off");
            }
            let reply = roundtrip(
                &channel,
                Command::ForceUpdate {
                    instance: instance.clone(),
                    enabled: *on,
                },
            )
            .await?;
            if !reply.ok {
                anyhow::bail!("{}", reply.detail);
            }
            println!("{}", reply.detail);
        },
        Commands::Tail => {
            println!("Tailing {} (Ctrl+C to stop)", cli.addr);
            loop {
                let frame = channel.read_message().await?;
                match ControlPayload::from_frame_text(&frame) {
                    Ok(ControlPayload::LogLine(line)) => {
                        println!(
                            "{} [{}] {}",
                            line.timestamp.format("%Y-%m-%d %H:%M:%S"),
                            line.level,
                            line.message
                        );
                    },
                    // Replies to other controllers' commands are not
                    // broadcast; anything else is unexpected noise.
                    Ok(_) => {},
                    Err(e) => tracing::warn!(error = %e, "Skipping undecodable frame"),
                }
            }
        },
    }

    Ok(())
}

/// Send one command and wait for the daemon's reply, skipping any log
/// lines interleaved on the stream.
async fn roundtrip(channel: &ControlChannel, command: Command) -> Result<CommandReply> {
    let text = ControlPayload::Command(command)
        .to_frame_text()
        .context("cannot encode command")?;
    channel.send(&text).await?;

    loop {
        let frame = channel.read_message().await?;
        match ControlPayload::from_frame_text(&frame) {
            Ok(ControlPayload::CommandReply(reply)) => return Ok(reply),
            Ok(_) => continue,
            Err(e) => anyhow::bail!("undecodable reply from daemon: {}", e),
        }
    }
}
