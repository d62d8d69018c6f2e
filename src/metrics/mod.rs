//! Prometheus metrics for the Longhorn uninstaller
//!
//! This module exposes metrics for following teardown progress.

mod prometheus;

pub use prometheus::*;
