//! hostglance-core — shared library for the hostglance telemetry pipeline.
//!
//! Provides:
//! - `fs` — filesystem abstraction over `/proc` and `/sys` (real + mock)
//! - `model` — the `Snapshot` data model shared by every component
//! - `churn` — counts read/parse failures for the security evaluator
//! - `collectors` — per-domain sampling (CPU, memory, network, disk,
//!   filesystem, thermal, GPU device, processes)
//! - `gpu_attributor` — fuses per-process GPU activity across backends
//! - `alerts` — sustained-threshold alert engine
//! - `security` — pure security-finding evaluator
//! - `buffers` — lock-free double-buffered snapshot publication
//! - `producer` — the scheduler that drives every collector and publishes
//! - `prometheus` — Prometheus text-exposition serializer
//! - `logchunk` — hour-rotated log writer for the serialized snapshots

pub mod alerts;
pub mod buffers;
pub mod churn;
pub mod collectors;
pub mod fs;
pub mod gpu_attributor;
pub mod logchunk;
pub mod model;
pub mod producer;
pub mod prometheus;
pub mod security;
