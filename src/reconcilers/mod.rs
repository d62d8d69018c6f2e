//! Teardown logic
//!
//! This module contains the business logic of the uninstall:
//! - The orchestrator and its phase ordering
//! - The per-kind teardown table
//! - Driver and cluster configuration cleanup
//! - The grace period policy

mod cluster_config;
pub mod grace_period;
pub mod teardown;
pub mod uninstall;

pub use grace_period::GracePeriod;
pub use uninstall::{PassOutcome, Uninstaller, WaitReason};
