use std::time::Duration as StdDuration;

use chrono::{Duration, FixedOffset, Offset, Utc};
use thiserror::Error;

/// Sentinel accepted on the CLI for a zero-offset fixed zone.
pub const DEFAULT_TIMEZONE: &str = "UTC-0";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unrecognized timezone \"{0}\" (expected \"UTC-0\", \"UTC\" or a ±HH:MM offset)")]
    BadTimezone(String),
}

/// How the scheduler picks its very first window.
///
/// The historical behavior is `Degenerate`: the first tick queries the
/// empty window `[now, now)` (both bounds truncated to the minute) and
/// real windows start on the second tick. `LookBack` instead starts with
/// `[now - step, now)` so the minute leading up to startup is exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FirstWindow {
    #[default]
    Degenerate,
    LookBack,
}

/// Everything the export pipeline needs to know, resolved by the caller.
///
/// The bucket size, window step and tick interval all default to one
/// minute; they are kept separate so tests can tick fast while stepping
/// through realistic windows.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Collector `host:port`.
    pub collector_addr: String,
    /// Aggregation bucket granularity.
    pub bucket: Duration,
    /// How far the window advances per tick.
    pub step: Duration,
    /// Wall-clock pause between ticks.
    pub tick_interval: StdDuration,
    /// Zone used to truncate "now" for the first window.
    pub tz: FixedOffset,
    pub first_window: FirstWindow,
    /// Bound on dialing the collector.
    pub connect_timeout: StdDuration,
    /// Bound on each line write, so a stalled collector cannot wedge
    /// the export task.
    pub write_timeout: StdDuration,
}

impl ExportConfig {
    pub fn new(collector_addr: impl Into<String>) -> Self {
        Self {
            collector_addr: collector_addr.into(),
            bucket: Duration::minutes(1),
            step: Duration::minutes(1),
            tick_interval: StdDuration::from_secs(60),
            tz: Utc.fix(),
            first_window: FirstWindow::default(),
            connect_timeout: StdDuration::from_secs(5),
            write_timeout: StdDuration::from_secs(5),
        }
    }
}

/// Parses the process timezone argument.
///
/// Accepts the `"UTC-0"` sentinel, plain `"UTC"`, the empty string, or a
/// fixed offset of the form `+HH:MM` / `-HH:MM`.
pub fn parse_tz(spec: &str) -> Result<FixedOffset, ConfigError> {
    if spec.is_empty() || spec == DEFAULT_TIMEZONE || spec == "UTC" {
        return Ok(Utc.fix());
    }

    let bad = || ConfigError::BadTimezone(spec.to_owned());

    let (sign, rest) = if let Some(r) = spec.strip_prefix('+') {
        (1i32, r)
    } else if let Some(r) = spec.strip_prefix('-') {
        (-1i32, r)
    } else {
        return Err(bad());
    };

    let (hours, minutes) = rest.split_once(':').ok_or_else(bad)?;
    let hours: i32 = hours.parse().map_err(|_| bad())?;
    let minutes: i32 = minutes.parse().map_err(|_| bad())?;
    if hours > 23 || minutes > 59 || hours < 0 || minutes < 0 {
        return Err(bad());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(bad)
}
