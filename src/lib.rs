//! speedlog: timestamped performance events in, per-minute median/min/max
//! summaries out, drip-fed to a Graphite-style collector over its
//! plain-text TCP protocol.
//!
//! The pipeline is: scheduler tick → windowed store query → minute-bucket
//! aggregation → project-title resolution → wire export. Each piece is
//! usable on its own; `export::scheduler::spawn` wires them together as a
//! background task with a cooperative stop handle.

pub mod aggregate;
pub mod config;
pub mod export;
pub mod load_generator;
pub mod store;
