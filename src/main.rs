use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use speedlog::config::{parse_tz, ExportConfig, FirstWindow, DEFAULT_TIMEZONE};
use speedlog::export::scheduler;
use speedlog::load_generator;
use speedlog::store::{Event, EventStore, MemoryStore, StoreError};

#[derive(Parser, Debug)]
#[command(
    name = "speedlog",
    about = "Performance-event aggregator with a Graphite drip feed"
)]
struct Args {
    /// Graphite collector host:port
    #[arg(short = 'g', long = "graphite")]
    graphite: String,

    /// Process timezone: "UTC-0" or a ±HH:MM offset
    #[arg(short = 't', long = "tz", default_value = DEFAULT_TIMEZONE)]
    tz: String,

    /// Project title registered at startup
    #[arg(short = 'r', long = "project", default_value = "default")]
    project: String,

    /// Aggregation bucket size in seconds
    #[arg(long, default_value_t = 60)]
    bucket_secs: u32,

    /// How far the export window advances per tick, in seconds
    #[arg(long, default_value_t = 60)]
    step_secs: u32,

    /// Tick interval in seconds (defaults to the step)
    #[arg(long)]
    tick_secs: Option<u32>,

    /// Start with the window [now - step, now) instead of the
    /// historical empty first window
    #[arg(long)]
    look_back: bool,

    /// JSON file with events to seed into the store at startup
    #[arg(long)]
    seed: Option<std::path::PathBuf>,

    /// Generate a synthetic event stream (demo mode)
    #[arg(long)]
    demo: bool,
}

/// Shape of one entry in a `--seed` file. Events are assigned to the
/// project registered via `--project`.
#[derive(Debug, Deserialize)]
struct SeedEvent {
    metric_name: String,
    metric_time: chrono::DateTime<chrono::Utc>,
    duration_ms: f64,
}

/// A zero-length interval would panic the tick timer; refuse it up
/// front with a clear message instead.
fn intervals_are_positive(args: &Args) -> bool {
    args.bucket_secs > 0
        && args.step_secs > 0
        && args.tick_secs.unwrap_or(args.step_secs) > 0
}

fn load_seed(store: &dyn EventStore, project_id: Uuid, path: &Path) -> anyhow::Result<usize> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let seeds: Vec<SeedEvent> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;

    let count = seeds.len();
    for seed in seeds {
        store.add_event(Event {
            project_id,
            metric_name: seed.metric_name,
            metric_time: seed.metric_time,
            duration_ms: seed.duration_ms,
        })?;
    }
    Ok(count)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if !intervals_are_positive(&args) {
        error!("bucket, step and tick intervals must all be positive");
        std::process::exit(1);
    }

    let tz = match parse_tz(&args.tz) {
        Ok(tz) => tz,
        Err(e) => {
            error!(error = %e, "cannot start");
            std::process::exit(1);
        }
    };

    let store = Arc::new(MemoryStore::new());
    let project = match store.add_project(&args.project) {
        Ok(project) => project,
        Err(StoreError::DuplicateProject(_)) => {
            info!(project = %args.project, "project exists, skipping");
            match store.project_by_title(&args.project) {
                Ok(Some(project)) => project,
                _ => {
                    error!(project = %args.project, "cannot look up existing project");
                    std::process::exit(1);
                }
            }
        }
        Err(e) => {
            error!(error = %e, "cannot register project");
            std::process::exit(1);
        }
    };

    if let Some(path) = &args.seed {
        match load_seed(store.as_ref(), project.id, path) {
            Ok(count) => info!(count, file = %path.display(), "seeded events"),
            Err(e) => {
                error!(error = %e, "seeding failed");
                std::process::exit(1);
            }
        }
    }

    let running = Arc::new(AtomicBool::new(true));
    let load = args.demo.then(|| {
        info!("demo load generator enabled");
        load_generator::spawn(running.clone(), store.clone(), project.id, 20)
    });

    let mut config = ExportConfig::new(&args.graphite);
    config.bucket = chrono::Duration::seconds(i64::from(args.bucket_secs));
    config.step = chrono::Duration::seconds(i64::from(args.step_secs));
    config.tick_interval =
        std::time::Duration::from_secs(u64::from(args.tick_secs.unwrap_or(args.step_secs)));
    config.tz = tz;
    if args.look_back {
        config.first_window = FirstWindow::LookBack;
    }

    info!(
        collector = %config.collector_addr,
        project = %project.title,
        "export pipeline starting"
    );
    let exporter = scheduler::spawn(store, config);

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutting down");

    running.store(false, Ordering::SeqCst);
    if let Some(handle) = load {
        let _ = handle.await;
    }
    exporter.stop().await;
}
