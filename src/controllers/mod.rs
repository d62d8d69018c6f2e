//! Reconciliation scheduling
//!
//! Turns change notifications into teardown passes and decides when a pass
//! runs again.

pub mod queue;
mod uninstall_controller;

pub use queue::{RateLimiter, WorkQueue};
pub use uninstall_controller::UninstallController;
