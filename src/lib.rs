//! Longhorn Uninstaller
//!
//! Tears a Longhorn installation down to zero: every custom resource, the
//! manager and CSI driver workloads, and the cluster-level configuration
//! Longhorn registers, in an order that avoids resources being recreated or
//! stranded behind finalizers.

pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod feed;
pub mod metrics;
pub mod reconcilers;
pub mod store;

pub use error::{Error, Result};
