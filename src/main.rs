//! Hourglass - Delayed message queue.
//!
//! Operator entry point: enqueue messages, run a consumer, inspect a queue.

mod cli;
mod config;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hourglass_monitor::{render_metrics, EventCounters, QueueMonitor};
use hourglass_queue::{handler_fn, Consumer, DelayQueue, Publisher, SendOptions};

use cli::{Cli, Commands};
use config::{AppConfig, ConfigLoader};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Send {
            queue,
            payload,
            delay_secs,
            at,
            retry,
            ttl_secs,
        } => {
            let mut opts = SendOptions::new();
            if let Some(retry) = retry {
                opts = opts.with_retry_count(retry);
            }
            if let Some(ttl) = ttl_secs {
                opts = opts.with_ttl(Duration::from_secs(ttl));
            }
            send(&config, &queue, &payload, delay_secs, at, opts).await
        }
        Commands::Consume {
            queue,
            report,
            stats_interval_secs,
        } => consume(&config, &queue, report, stats_interval_secs).await,
        Commands::Stats { queue, json } => stats(&config, &queue, json).await,
        Commands::Watch {
            queue,
            interval_secs,
        } => watch(&config, &queue, interval_secs).await,
    }
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    ConfigLoader::load_or_default(path)
        .with_context(|| format!("failed to load config '{}'", path.display()))
}

async fn send(
    config: &AppConfig,
    queue: &str,
    payload: &str,
    delay_secs: u64,
    at: Option<chrono::DateTime<chrono::Utc>>,
    opts: SendOptions,
) -> anyhow::Result<()> {
    let store = config.store.open().await?;
    let publisher = Publisher::new(queue, store, config.queue.clone())?;

    let id = match at {
        Some(at) => publisher.send_at(payload, at, opts).await?,
        None => {
            publisher
                .send_after(payload, Duration::from_secs(delay_secs), opts)
                .await?
        }
    };
    println!("{}", id);
    Ok(())
}

async fn consume(
    config: &AppConfig,
    name: &str,
    report: bool,
    stats_interval_secs: u64,
) -> anyhow::Result<()> {
    let store = config.store.open().await?;
    let queue = Arc::new(DelayQueue::new(name, store, config.queue.clone())?);
    if report {
        queue.enable_report();
    }

    let label = queue.name().to_string();
    let consumer = Consumer::new(queue.clone()).with_handler(handler_fn(move |payload: String| {
        let label = label.clone();
        async move {
            info!("[{}] {}", label, payload);
            Ok::<_, anyhow::Error>(true)
        }
    }));
    let mut task = consumer.start()?;

    let mut ticker = tokio::time::interval(Duration::from_secs(stats_interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Shutting down consumer for '{}'", name);
                break;
            }
            joined = &mut task => {
                if let Err(e) = joined {
                    error!("Consumer task for '{}' ended: {}", name, e);
                }
                return Ok(());
            }
            _ = ticker.tick(), if stats_interval_secs > 0 => {
                match queue.stats().await {
                    Ok(stats) => info!("Queue '{}': {:?}", name, stats),
                    Err(e) => warn!("Failed to read stats for '{}': {}", name, e),
                }
            }
        }
    }

    consumer.stop();
    task.await?;
    Ok(())
}

async fn stats(config: &AppConfig, name: &str, json: bool) -> anyhow::Result<()> {
    let store = config.store.open().await?;
    let monitor = QueueMonitor::new(name, store, config.queue.clone())?;
    let stats = monitor.stats().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("queue:       {}", monitor.name());
        println!("pending:     {}", stats.pending);
        println!("ready:       {}", stats.ready);
        println!("in-flight:   {}", stats.in_flight);
        println!("retry:       {}", stats.retry);
        println!("dead-letter: {}", stats.dead_letter);
        println!("outstanding: {}", stats.outstanding);
    }
    Ok(())
}

async fn watch(config: &AppConfig, name: &str, interval_secs: u64) -> anyhow::Result<()> {
    let store = config.store.open().await?;
    let monitor = QueueMonitor::new(name, store, config.queue.clone())?;
    let counters = Arc::new(EventCounters::new());
    let handle = monitor.listen(counters.clone()).await?;
    info!("Watching events of '{}'", name);

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                if handle.is_closed() {
                    warn!("Event stream of '{}' ended", name);
                    break;
                }
                match monitor.stats().await {
                    Ok(stats) => print!("{}", render_metrics(name, &counters.snapshot(), &stats)),
                    Err(e) => warn!("Failed to read stats for '{}': {}", name, e),
                }
            }
        }
    }

    handle.close();
    handle.join().await;
    Ok(())
}
