//! Singleton - command-line front end for the single-instance guard.
//!
//! The first invocation for an app id becomes the owner and prints every
//! message it receives until interrupted. Later invocations forward their
//! arguments to the owner and exit.

use anyhow::Result;
use clap::Parser;
use singleton_core::{GuardConfig, MessageClient, Role, SingleAppGuard};
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "singleton")]
#[command(about = "Run one instance per app id; later launches message the first")]
struct Args {
    /// Application id (empty = derive from this executable's path)
    #[arg(long, default_value = "")]
    app_id: String,

    /// How long a later launch waits for delivery, in milliseconds
    #[arg(long, default_value_t = GuardConfig::DEFAULT_SEND_TIMEOUT.as_millis() as u64)]
    timeout_ms: u64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Message forwarded to the running instance
    #[arg(trailing_var_arg = true)]
    message: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries received messages
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let guard = SingleAppGuard::builder(args.app_id.as_str())
        .on_message(tx)
        .build();

    match guard.determine_role().await {
        Role::Guest => {
            let message = args.message.join(" ");
            let timeout = Duration::from_millis(args.timeout_ms);
            match forward(&guard, &message, timeout).await {
                Ok(()) => {
                    info!("Delivered to the running instance");
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    warn!("Could not reach the running instance: {}", e);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Role::Owner => {
            if !guard.is_listening().await {
                warn!("Running without a message channel");
            }
            info!(
                "Owning {} (pid {}), press Ctrl-C to exit",
                guard.endpoint_name(),
                std::process::id()
            );

            loop {
                tokio::select! {
                    Some(message) = rx.recv() => println!("{}", message),
                    signal = tokio::signal::ctrl_c() => {
                        signal?;
                        info!("Shutdown signal received, exiting");
                        break;
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Send to the owner without arbitrating again; the role is already known.
async fn forward(
    guard: &SingleAppGuard,
    message: &str,
    timeout: Duration,
) -> singleton_core::Result<()> {
    MessageClient::new(guard.channel_address().clone())
        .send(message, timeout)
        .await
}
