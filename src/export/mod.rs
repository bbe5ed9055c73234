pub mod graphite;
pub mod scheduler;

pub use graphite::GraphiteExporter;
pub use scheduler::{SchedulerHandle, spawn};

use crate::aggregate::{AggregatedPoint, StatValue};

/// Root of every exported metric path.
pub const PATH_PREFIX: &str = "speedlog.tests";

/// The three statistics shipped per aggregated point, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stat {
    Median,
    Max,
    Min,
}

impl Stat {
    pub fn as_str(self) -> &'static str {
        match self {
            Stat::Median => "median",
            Stat::Max => "max",
            Stat::Min => "min",
        }
    }
}

/// An aggregated point with its project already resolved to a title.
/// This is the exporter's input; unresolved projects never get this far.
#[derive(Debug, Clone)]
pub struct ExportPoint {
    pub project_title: String,
    pub point: AggregatedPoint,
}

impl ExportPoint {
    /// Statistic values in the order they go on the wire.
    pub fn stats(&self) -> [(Stat, StatValue); 3] {
        [
            (Stat::Median, self.point.median_duration_ms),
            (Stat::Max, self.point.max_duration_ms),
            (Stat::Min, self.point.min_duration_ms),
        ]
    }
}

/// Default path mapper: `speedlog.tests.<project>.<metric>.<statistic>`.
pub fn metric_path(project: &str, metric: &str, stat: Stat) -> String {
    format!("{PATH_PREFIX}.{project}.{metric}.{}", stat.as_str())
}
