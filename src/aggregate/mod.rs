use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::store::Event;

// ─── Statistic values ────────────────────────────────────────────

/// A statistic tagged with how it renders on the wire.
///
/// The tag is decided here, at aggregation time: an integral value
/// becomes `Integer` and prints as an integer literal, everything else
/// stays `Decimal`. The protocol boundary then never has to inspect
/// runtime types.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatValue {
    Integer(i64),
    Decimal(f64),
}

impl StatValue {
    pub fn from_ms(value: f64) -> Self {
        if value.is_finite()
            && value.fract() == 0.0
            && value >= i64::MIN as f64
            && value <= i64::MAX as f64
        {
            StatValue::Integer(value as i64)
        } else {
            StatValue::Decimal(value)
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            StatValue::Integer(v) => v as f64,
            StatValue::Decimal(v) => v,
        }
    }
}

impl fmt::Display for StatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatValue::Integer(v) => write!(f, "{v}"),
            StatValue::Decimal(v) => write!(f, "{v}"),
        }
    }
}

// ─── Aggregated output ───────────────────────────────────────────

/// Order statistics for one `(bucket, metric)` group.
/// `sample_count` is always ≥ 1; empty buckets are never emitted.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedPoint {
    pub metric_name: String,
    /// Start of the bucket the samples fell into (minute-truncated for
    /// the default granularity).
    pub bucket_start: DateTime<Utc>,
    pub median_duration_ms: StatValue,
    pub min_duration_ms: StatValue,
    pub max_duration_ms: StatValue,
    pub sample_count: usize,
}

/// Truncates a timestamp down to the start of its bucket.
pub fn bucket_start(ts: DateTime<Utc>, bucket: Duration) -> DateTime<Utc> {
    let width = bucket.num_seconds().max(1);
    let secs = ts.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(width), 0).unwrap_or(ts)
}

/// Groups events by `(bucket start, metric name)` and computes median,
/// min and max of the durations in each group.
///
/// Durations are sorted ascending; min and max are the ends of the
/// sorted run, the median is the middle element for an odd count and
/// the mean of the two middle elements for an even count (which may be
/// fractional even for integral inputs). Emission order is ascending
/// bucket start, then metric name, so output is deterministic.
pub fn group_by(bucket: Duration, events: &[Event]) -> Vec<AggregatedPoint> {
    let mut groups: BTreeMap<(DateTime<Utc>, String), Vec<f64>> = BTreeMap::new();
    for ev in events {
        groups
            .entry((bucket_start(ev.metric_time, bucket), ev.metric_name.clone()))
            .or_default()
            .push(ev.duration_ms);
    }

    groups
        .into_iter()
        .map(|((start, metric_name), mut durations)| {
            durations.sort_by(|a, b| a.total_cmp(b));
            let count = durations.len();
            let mid = count / 2;
            let median = if count % 2 == 1 {
                durations[mid]
            } else {
                (durations[mid - 1] + durations[mid]) / 2.0
            };
            AggregatedPoint {
                metric_name,
                bucket_start: start,
                median_duration_ms: StatValue::from_ms(median),
                min_duration_ms: StatValue::from_ms(durations[0]),
                max_duration_ms: StatValue::from_ms(durations[count - 1]),
                sample_count: count,
            }
        })
        .collect()
}
