use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::{Event, EventStore};

/// Operations the demo stream pretends to measure.
const METRICS: &[&str] = &["login", "search", "checkout", "render"];

/// Spawns a task that feeds synthetic events into the store until the
/// `running` flag goes false. Durations are mostly fast with a slow
/// tail, so the exported median and max visibly disagree.
pub fn spawn(
    running: Arc<AtomicBool>,
    store: Arc<dyn EventStore>,
    project_id: Uuid,
    events_per_sec: u32,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // Deterministic stream: same seed, same demo data.
        let mut rng = StdRng::seed_from_u64(42);
        let pause = Duration::from_millis(1_000 / u64::from(events_per_sec.max(1)));

        debug!("load generator started");
        while running.load(Ordering::Relaxed) {
            let metric = METRICS[rng.gen_range(0..METRICS.len())];
            let whole_ms: i32 = if rng.gen_bool(0.9) {
                rng.gen_range(20..400)
            } else {
                rng.gen_range(400..2_000)
            };
            let duration_ms = f64::from(whole_ms);

            let event = Event {
                project_id,
                metric_name: metric.to_owned(),
                metric_time: Utc::now(),
                duration_ms,
            };
            if let Err(e) = store.add_event(event) {
                warn!(error = %e, "failed to record synthetic event");
            }

            tokio::time::sleep(pause).await;
        }
        debug!("load generator stopped");
    })
}
