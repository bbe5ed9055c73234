use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, Timelike, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use super::{metric_path, ExportPoint, GraphiteExporter};
use crate::aggregate::group_by;
use crate::config::{ExportConfig, FirstWindow};
use crate::store::EventStore;

// ─── Cursor ──────────────────────────────────────────────────────

/// The scheduler's notion of where the last export left off.
///
/// Owned by one scheduler task, never shared. The first `advance`
/// anchors `window_end` to "now" truncated to the minute in the given
/// zone; every later one slides the window forward by exactly one step,
/// regardless of what "now" has drifted to.
#[derive(Debug)]
pub struct ExportCursor {
    window_end: Option<DateTime<Utc>>,
    step: Duration,
    first_window: FirstWindow,
}

impl ExportCursor {
    pub fn new(step: Duration, first_window: FirstWindow) -> Self {
        Self {
            window_end: None,
            step,
            first_window,
        }
    }

    /// Returns the next `[from, to)` window to query.
    pub fn advance(&mut self, now: DateTime<Utc>, tz: &FixedOffset) -> (DateTime<Utc>, DateTime<Utc>) {
        let (from, to) = match self.window_end {
            None => {
                let end = truncate_to_minute(now, tz);
                let start = match self.first_window {
                    // Historical quirk: the very first query is empty.
                    FirstWindow::Degenerate => end,
                    FirstWindow::LookBack => end - self.step,
                };
                (start, end)
            }
            Some(end) => (end, end + self.step),
        };
        self.window_end = Some(to);
        (from, to)
    }
}

/// Drops seconds and sub-second precision from "now", interpreted in
/// the configured zone.
pub fn truncate_to_minute(now: DateTime<Utc>, tz: &FixedOffset) -> DateTime<Utc> {
    let local = now.with_timezone(tz);
    let trimmed = local
        - Duration::seconds(i64::from(local.second()))
        - Duration::nanoseconds(i64::from(local.nanosecond()));
    trimmed.with_timezone(&Utc)
}

// ─── One tick's worth of work ────────────────────────────────────

/// Fetches, aggregates and title-resolves everything in one window.
///
/// Any store failure yields an empty cycle: the error is logged, the
/// cursor has already advanced, the window is never re-queried. A
/// project that cannot be resolved to a title costs only its own
/// points.
pub fn collect_cycle(
    store: &dyn EventStore,
    bucket: Duration,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Vec<ExportPoint> {
    let groups = match store.all_events_grouped(from, to) {
        Ok(groups) => groups,
        Err(e) => {
            warn!(%from, %to, error = %e, "fetching events failed, exporting nothing this tick");
            return Vec::new();
        }
    };

    let mut out = Vec::new();
    for group in groups {
        let title = match store.project_title(group.project_id) {
            Ok(Some(title)) if !title.is_empty() => title,
            Ok(_) => {
                warn!(project_id = %group.project_id, "project title unresolved, skipping its points");
                continue;
            }
            Err(e) => {
                warn!(project_id = %group.project_id, error = %e, "project lookup failed, skipping its points");
                continue;
            }
        };
        for point in group_by(bucket, &group.events) {
            out.push(ExportPoint {
                project_title: title.clone(),
                point,
            });
        }
    }
    out
}

// ─── Background task ─────────────────────────────────────────────

/// Handle to a running export task. `stop` shuts it down cooperatively
/// and waits for it to finish; dropping the handle signals the same
/// shutdown without waiting. Keep the handle alive for as long as the
/// export loop should run.
pub struct SchedulerHandle {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SchedulerHandle {
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}

/// Spawns the export loop: once per tick, advance the window cursor,
/// collect the window's points and ship them to the collector.
///
/// The tick timer skips rather than queues missed ticks, so under
/// sustained overload some windows are silently dropped; this pipeline
/// promises best-effort export, not delivery of every window.
pub fn spawn(store: Arc<dyn EventStore>, config: ExportConfig) -> SchedulerHandle {
    let (stop, mut stopped) = watch::channel(false);

    let handle = tokio::spawn(async move {
        let exporter = GraphiteExporter::from_config(&config);
        let mut cursor = ExportCursor::new(config.step, config.first_window);

        // First tick fires after one interval, not immediately, matching
        // a plain ticker.
        let mut interval =
            tokio::time::interval_at(Instant::now() + config.tick_interval, config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks = IntervalStream::new(interval);

        debug!(collector = %config.collector_addr, "export task started");
        loop {
            tokio::select! {
                _ = stopped.changed() => break,
                Some(_) = ticks.next() => {
                    let (from, to) = cursor.advance(Utc::now(), &config.tz);
                    debug!(%from, %to, "export tick");
                    let points = collect_cycle(store.as_ref(), config.bucket, from, to);
                    exporter.send(&points, metric_path).await;
                }
            }
        }
        debug!("export task stopped");
    });

    SchedulerHandle { stop, handle }
}
