//! Premium monitor - terminal front-end
//!
//! Streams foreign and domestic prices, prints the premium table on a timer and
//! accepts operator commands on stdin.

mod commands;
mod render;
mod settings;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::time::Interval;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use premium_feed::PremiumMonitor;

use crate::commands::{Command, HELP};
use crate::settings::Settings;

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        }
        _ = terminate => {
            info!("Received termination signal");
        }
    }
}

fn print_table(monitor: &PremiumMonitor) {
    let table = render::render_table(&monitor.snapshot(), monitor.selection(), &monitor.active_flashes());
    println!("{}", table);
}

fn print_status(monitor: &PremiumMonitor) {
    let stats = monitor.stats();
    println!(
        "exchange={} loading={} rate={} records={} domestic={} foreign_updates={} domestic_updates={} seq={} age={:?}",
        stats.exchange.map(|e| e.label()).unwrap_or("-"),
        stats.loading,
        stats.rate,
        stats.record_count,
        stats.domestic_count,
        stats.foreign_updates,
        stats.domestic_updates,
        stats.snapshot_sequence,
        stats.snapshot_age,
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Starting premium monitor v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load()?;
    info!(
        "Initial exchange {}, publishing every {:?}",
        settings.monitor.domestic.initial_exchange,
        settings.monitor.engine.publish_interval()
    );

    let mut monitor = PremiumMonitor::new(settings.monitor.clone());
    monitor.start().await?;
    info!("Background services started");
    println!("{}", HELP);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut refresh = settings.console.refresh_interval().map(tokio::time::interval);
    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = next_tick(&mut refresh) => print_table(&monitor),
            line = lines.next(), if stdin_open => match line {
                Some(Ok(line)) if line.trim().is_empty() => {}
                Some(Ok(line)) => match line.parse::<Command>() {
                    Ok(Command::Switch(exchange)) => {
                        if let Err(e) = monitor.select_exchange(exchange).await {
                            error!("Switch to {} failed: {}", exchange, e);
                        }
                    }
                    Ok(Command::Show) => print_table(&monitor),
                    Ok(Command::Status) => print_status(&monitor),
                    Ok(Command::Help) => println!("{}", HELP),
                    Ok(Command::Quit) => break,
                    Err(e) => println!("{}", e),
                },
                Some(Err(e)) => {
                    warn!("stdin read failed: {}", e);
                    stdin_open = false;
                }
                None => {
                    info!("stdin closed, running until signalled");
                    stdin_open = false;
                }
            },
        }
    }

    monitor.stop().await;
    info!("Shutdown complete");
    Ok(())
}
