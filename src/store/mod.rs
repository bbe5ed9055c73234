pub mod memory;

pub use memory::MemoryStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ─── Data model ──────────────────────────────────────────────────

/// One observed measurement, immutable once written.
/// This is the "write" side: ingestion appends these, the export
/// pipeline and the on-demand query path only ever read them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Owning project. Opaque here; resolved to a title only at export.
    pub project_id: Uuid,
    /// e.g. "login", "search.autocomplete"
    pub metric_name: String,
    /// Moment of observation, UTC-normalized at write time.
    pub metric_time: DateTime<Utc>,
    /// The measurement itself. Kept as-is; validation is an
    /// ingestion-time concern.
    pub duration_ms: f64,
}

/// Read-only from the core's perspective; only the `id → title`
/// lookup is ever needed.
#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: Uuid,
    pub title: String,
}

/// All events of one project inside a queried window, time-ordered.
#[derive(Debug, Clone)]
pub struct EventGroup {
    pub project_id: Uuid,
    pub events: Vec<Event>,
}

// ─── Errors ──────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("project \"{0}\" already exists")]
    DuplicateProject(String),
    #[error("store backend unavailable: {0}")]
    Unavailable(String),
}

// ─── Store contract ──────────────────────────────────────────────

/// Seam between the pipeline and whatever holds the events.
///
/// Time ranges are half-open: `from` inclusive, `to` exclusive.
/// Queries return an empty Vec, never an error, when nothing matches;
/// backend failures come back verbatim (retry policy belongs to the
/// caller). Events are ordered by `metric_time`, ties broken by
/// insertion order.
pub trait EventStore: Send + Sync {
    /// Append-only ingestion path.
    fn add_event(&self, event: Event) -> Result<(), StoreError>;

    /// On-demand query with exact-match filters. Empty filter values
    /// are not supported; callers supply concrete ones.
    fn query(
        &self,
        project_id: Uuid,
        metric_name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>, StoreError>;

    /// Single-pass windowed fetch across every project, grouped so the
    /// downstream title lookup is batched per project. Group order is
    /// deterministic (ascending project id).
    fn all_events_grouped(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<EventGroup>, StoreError>;

    /// Registers a project; a duplicate title is an error the caller
    /// may choose to log and ignore.
    fn add_project(&self, title: &str) -> Result<Project, StoreError>;

    /// Lookup for callers that only know the title, e.g. a bootstrap
    /// that wants to reuse an already-registered project.
    fn project_by_title(&self, title: &str) -> Result<Option<Project>, StoreError>;

    /// `id → title`. `Ok(None)` when the project no longer exists.
    fn project_title(&self, id: Uuid) -> Result<Option<String>, StoreError>;
}
