//! taskhub: submit a batch of tasks and follow them to completion.
//!
//! ```text
//! taskhub --delay 10,20,30 --http 2 --file 1 --json
//! ```

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use taskhub_core::{
    ServiceBuilder, StreamItem, TaskEvent, TaskError, TaskService, TaskToCreate, TaskhubConfig,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "taskhub")]
#[command(about = "Run tasks on an in-process worker pool and stream their status")]
#[command(version)]
struct Cli {
    /// Config file (defaults are used if it does not exist)
    #[arg(long, short, default_value = "taskhub.toml")]
    config: PathBuf,

    /// Delay tasks to submit, as a comma-separated list of milliseconds
    #[arg(long, value_delimiter = ',')]
    delay: Vec<u64>,

    /// Number of simulated HTTP calls to submit
    #[arg(long, default_value_t = 0)]
    http: usize,

    /// Number of simulated file operations to submit
    #[arg(long, default_value_t = 0)]
    file: usize,

    /// Override the worker pool size
    #[arg(long)]
    workers: Option<usize>,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn requests(&self) -> Vec<TaskToCreate> {
        let mut requests: Vec<TaskToCreate> =
            self.delay.iter().map(|ms| TaskToCreate::new("delay", *ms)).collect();
        requests.extend((0..self.http).map(|n| {
            TaskToCreate::new("http", 0).with_payload(json!({
                "url": format!("https://example.invalid/items/{n}"),
                "method": "GET",
            }))
        }));
        requests.extend((0..self.file).map(|n| {
            TaskToCreate::new("file", 0).with_payload(json!({
                "path": format!("/tmp/taskhub-{n}.dat"),
                "operation": "write",
            }))
        }));
        requests
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskhub=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config = TaskhubConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }

    let requests = cli.requests();
    if requests.is_empty() {
        anyhow::bail!("nothing to do: pass --delay, --http or --file");
    }

    let service = ServiceBuilder::new(config).build()?;
    let result = run(&service, requests, cli.json).await;
    service.shutdown().await;

    let counts = service.counts().await?;
    if cli.json {
        println!("{}", serde_json::to_string(&json!({ "counts": counts }))?);
    } else {
        println!(
            "done: completed={} failed={} cancelled={}",
            counts.completed, counts.failed, counts.cancelled
        );
    }
    result
}

async fn run(service: &TaskService, requests: Vec<TaskToCreate>, as_json: bool) -> Result<()> {
    // 投入前に購読しておけば Queued イベントも取りこぼさない
    let mut updates = service.stream_updates();

    let mut pending = HashSet::new();
    for request in requests {
        match service.submit_task(request).await {
            Ok(id) => {
                pending.insert(id);
            }
            Err(e @ TaskError::Overloaded { .. }) => tracing::warn!(error = %e, "task rejected"),
            Err(e) => return Err(e.into()),
        }
    }

    while !pending.is_empty() {
        let item = tokio::select! {
            item = updates.recv() => item,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(remaining = pending.len(), "interrupted, cancelling remaining tasks");
                for id in &pending {
                    service.cancel_task(id).await?;
                }
                break;
            }
        };
        let Some(item) = item else { break };

        match &item {
            StreamItem::Event(event) => {
                print_event(event, as_json)?;
                if event.is_terminal() {
                    pending.remove(&event.task_id);
                }
            }
            StreamItem::Gap { missed, policy } => {
                tracing::warn!(missed, ?policy, "missed updates");
                // fall back to polling what we lost
                for id in pending.clone() {
                    if service.get_task(&id).await?.is_terminal() {
                        pending.remove(&id);
                    }
                }
            }
        }
    }
    Ok(())
}

fn print_event(event: &TaskEvent, as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    let from = event.old_status.map(|s| s.as_str()).unwrap_or("-");
    let detail = event
        .snapshot
        .error
        .as_deref()
        .or(event.snapshot.result.as_deref())
        .unwrap_or("");
    println!(
        "{} {:<20} {:>10} -> {:<10} {}",
        event.timestamp.format("%H:%M:%S%.3f"),
        event.task_id.as_str(),
        from,
        event.new_status.as_str(),
        detail
    );
    Ok(())
}
