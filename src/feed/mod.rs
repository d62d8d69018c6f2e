//! Change feed abstraction
//!
//! A [`ChangeFeed`] delivers add/update/delete notifications for one watch
//! target to a handler and reports when its initial listing has been
//! delivered. The uninstaller only uses the notifications as a trigger, so
//! handlers receive no payload.

mod kube_feed;

pub use kube_feed::KubeChangeFeed;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::crd::ResourceKind;
use crate::error::{Error, Result};

/// Callback invoked for every accepted notification
pub type EventHandler = Arc<dyn Fn() + Send + Sync>;

/// Something the uninstaller watches
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WatchTarget {
    /// A Longhorn custom resource kind
    Managed(ResourceKind),
    /// Cluster-scoped CSIDriver registrations
    CsiDrivers,
    /// DaemonSets in the Longhorn namespace
    DaemonSets,
    /// Deployments in the Longhorn namespace
    Deployments,
}

impl WatchTarget {
    /// Whether events from other namespaces must be dropped
    pub fn namespace_filtered(&self) -> bool {
        matches!(self, WatchTarget::DaemonSets | WatchTarget::Deployments)
    }
}

impl fmt::Display for WatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchTarget::Managed(kind) => write!(f, "{}", kind),
            WatchTarget::CsiDrivers => f.write_str("csidrivers"),
            WatchTarget::DaemonSets => f.write_str("daemonsets"),
            WatchTarget::Deployments => f.write_str("deployments"),
        }
    }
}

/// Accepts events by the namespace of the object they concern
#[derive(Clone, Debug, Default)]
pub struct NamespaceFilter {
    namespace: Option<String>,
}

impl NamespaceFilter {
    /// Accept events from every namespace
    pub fn any() -> Self {
        Self { namespace: None }
    }

    /// Accept only events for objects in `namespace`
    pub fn only(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
        }
    }

    pub fn accepts(&self, namespace: Option<&str>) -> bool {
        match &self.namespace {
            None => true,
            Some(expected) => namespace == Some(expected.as_str()),
        }
    }
}

/// Live watch with a synced predicate; the watch stops when dropped
pub struct Subscription {
    target: WatchTarget,
    synced: watch::Receiver<bool>,
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn new(target: WatchTarget, synced: watch::Receiver<bool>, handle: JoinHandle<()>) -> Self {
        Self {
            target,
            synced,
            handle,
        }
    }

    pub fn target(&self) -> WatchTarget {
        self.target
    }

    /// Whether the initial listing has been delivered
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Block until the initial listing has been delivered
    pub async fn wait_synced(&mut self) -> Result<()> {
        let target = self.target;
        self.synced
            .wait_for(|synced| *synced)
            .await
            .map(|_| ())
            .map_err(|_| Error::Sync(format!("watch on {} ended before initial sync", target)))
    }

    /// Stop delivering notifications
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Source of change notifications
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Whether the schema of `kind` is installed in the cluster
    async fn is_installed(&self, kind: ResourceKind) -> Result<bool>;

    /// Start watching `target`, invoking `handler` for each accepted event
    fn subscribe(&self, target: WatchTarget, handler: EventHandler) -> Subscription;
}
