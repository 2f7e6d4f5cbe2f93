//! stomp-sync smoke binary
//!
//! Drives a blocking session against the in-process loopback broker.

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stomp_sync::{Args, Headers, LoopbackClient, LoopbackConfig, Session};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("stomp_sync={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.session_config().context("invalid session configuration")?;

    info!("Destination: {}", args.destination);
    info!("Messages: {}", args.messages);
    info!("Transactional: {}", args.transactional);
    info!("Receipt timeout: {:?}", config.receipt_timeout());

    // Receipts are answered from the runtime's worker threads, never from main.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .context("failed to start runtime")?;

    let client = Arc::new(LoopbackClient::start(
        runtime.handle(),
        LoopbackConfig {
            receipt_delay: args.receipt_delay(),
        },
    ));
    let mut session = Session::new(client.clone(), config)?;

    let send_all = |session: &mut Session| -> stomp_sync::Result<Vec<String>> {
        (0..args.messages)
            .map(|i| session.send(&args.destination, format!("message {}", i), &Headers::new()))
            .collect()
    };

    let receipts = if args.transactional {
        session.transaction(send_all)?
    } else {
        send_all(&mut session)?
    };

    for receipt in &receipts {
        info!("Receipt: {}", receipt);
    }
    for entry in client.journal() {
        info!(
            "Broker saw {} {} (transaction: {})",
            entry.command,
            entry.target,
            entry.header("transaction").unwrap_or("-")
        );
    }

    Ok(())
}
