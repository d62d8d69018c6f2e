//! In-memory store and change feed shared by the integration tests
//!
//! The fake store follows the API server's soft-delete rules: deleting an
//! object that still carries finalizers only stamps a deletion timestamp,
//! and stripping the last finalizer of a deleting object removes it.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;

use longhorn_uninstaller::config::{
    CSI_DRIVER_NAME, DRIVER_DAEMON_SETS, DRIVER_DEPLOYMENTS, LEASE_NAMES, MANAGER_DAEMON_SET,
    MUTATING_WEBHOOK_NAME, SECRET_NAMES, SETTING_DEFAULT_ENGINE_IMAGE,
    SETTING_DELETING_CONFIRMATION_FLAG, STORAGE_CLASS_NAME, VALIDATING_WEBHOOK_NAME,
};
use longhorn_uninstaller::crd::{
    ManagedResource, ResourceKind, LABEL_BACKUP_TARGET, LABEL_BACKUP_VOLUME, LONGHORN_FINALIZER,
};
use longhorn_uninstaller::feed::{ChangeFeed, EventHandler, Subscription, WatchTarget};
use longhorn_uninstaller::store::{ObjectKind, ResourceStore, Workload};
use longhorn_uninstaller::{Error, Result};

pub const NAMESPACE: &str = "longhorn-system";
pub const DEFAULT_ENGINE_IMAGE: &str = "longhornio/longhorn-engine:v1.7.0";

/// Mutation recorded by the fake store
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Delete(ResourceKind, String),
    Update(ResourceKind, String),
    RemoveFinalizer(ResourceKind, String),
    DeleteObject(ObjectKind, String),
}

/// Error returned by an injected failure
#[derive(Clone, Copy, Debug)]
pub enum Failure {
    NotFound,
    Conflict,
    Internal,
}

impl Failure {
    fn error(self, what: &str) -> Error {
        match self {
            Failure::NotFound => Error::not_found(what.to_string()),
            Failure::Conflict => Error::Conflict(what.to_string()),
            Failure::Internal => Error::Io(std::io::Error::other(format!("injected: {}", what))),
        }
    }
}

#[derive(Default)]
struct State {
    resources: HashMap<ResourceKind, BTreeMap<String, ManagedResource>>,
    settings: HashMap<String, String>,
    workloads: BTreeMap<(ObjectKind, String), Workload>,
    /// Workloads whose deletion only stamps a timestamp
    lingering: HashSet<(ObjectKind, String)>,
    objects: BTreeSet<(ObjectKind, String)>,
    calls: Vec<Call>,
    update_failures: HashMap<ResourceKind, Failure>,
    list_failures: HashMap<ResourceKind, Failure>,
    backup_volume_failure: Option<Failure>,
}

/// In-memory [`ResourceStore`]
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<State>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A confirmed, healthy installation with every cluster-level object
    /// Longhorn creates but no custom resources
    pub fn installed() -> Self {
        let store = Self::new();
        store.set_setting(SETTING_DELETING_CONFIRMATION_FLAG, "true");
        store.set_setting(SETTING_DEFAULT_ENGINE_IMAGE, DEFAULT_ENGINE_IMAGE);
        store.set_workload(ObjectKind::DaemonSet, MANAGER_DAEMON_SET, 3, 3);
        for name in DRIVER_DEPLOYMENTS {
            store.set_workload(ObjectKind::Deployment, name, 1, 1);
        }
        for name in DRIVER_DAEMON_SETS {
            store.set_workload(ObjectKind::DaemonSet, name, 3, 3);
        }
        store.insert_object(ObjectKind::CsiDriver, CSI_DRIVER_NAME);
        store.insert_object(ObjectKind::ValidatingWebhookConfiguration, VALIDATING_WEBHOOK_NAME);
        store.insert_object(ObjectKind::MutatingWebhookConfiguration, MUTATING_WEBHOOK_NAME);
        store.insert_object(ObjectKind::StorageClass, STORAGE_CLASS_NAME);
        for name in LEASE_NAMES {
            store.insert_object(ObjectKind::Lease, name);
        }
        for name in SECRET_NAMES {
            store.insert_object(ObjectKind::Secret, name);
        }
        store.insert_object(ObjectKind::PodDisruptionBudget, "csi-attacher");
        store.insert_object(ObjectKind::PodDisruptionBudget, "instance-manager-e-1a2b");
        store.insert_object(ObjectKind::PodDisruptionBudget, "my-app");
        store
    }

    pub fn insert(&self, resource: ManagedResource) {
        self.state
            .lock()
            .resources
            .entry(resource.kind())
            .or_default()
            .insert(resource.name(), resource);
    }

    pub fn set_setting(&self, name: &str, value: &str) {
        self.state
            .lock()
            .settings
            .insert(name.to_string(), value.to_string());
    }

    pub fn set_workload(&self, kind: ObjectKind, name: &str, ready: i32, desired: i32) {
        self.state.lock().workloads.insert(
            (kind, name.to_string()),
            Workload {
                name: name.to_string(),
                deletion_timestamp: None,
                ready,
                desired,
            },
        );
    }

    /// Make deletion of a workload wait for its pods, as a real controller would
    pub fn linger(&self, kind: ObjectKind, name: &str) {
        self.state.lock().lingering.insert((kind, name.to_string()));
    }

    pub fn insert_object(&self, kind: ObjectKind, name: &str) {
        self.state.lock().objects.insert((kind, name.to_string()));
    }

    pub fn fail_update(&self, kind: ResourceKind, failure: Failure) {
        self.state.lock().update_failures.insert(kind, failure);
    }

    pub fn fail_list(&self, kind: ResourceKind, failure: Failure) {
        self.state.lock().list_failures.insert(kind, failure);
    }

    pub fn fail_backup_volume_lookup(&self, failure: Failure) {
        self.state.lock().backup_volume_failure = Some(failure);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.update_failures.clear();
        state.list_failures.clear();
        state.backup_volume_failure = None;
    }

    pub fn get(&self, kind: ResourceKind, name: &str) -> Option<ManagedResource> {
        self.state
            .lock()
            .resources
            .get(&kind)
            .and_then(|items| items.get(name).cloned())
    }

    pub fn count(&self, kind: ResourceKind) -> usize {
        self.state
            .lock()
            .resources
            .get(&kind)
            .map_or(0, BTreeMap::len)
    }

    /// Total managed resources left across all kinds
    pub fn remaining(&self) -> usize {
        self.state.lock().resources.values().map(BTreeMap::len).sum()
    }

    pub fn workload(&self, kind: ObjectKind, name: &str) -> Option<Workload> {
        self.state
            .lock()
            .workloads
            .get(&(kind, name.to_string()))
            .cloned()
    }

    pub fn has_object(&self, kind: ObjectKind, name: &str) -> bool {
        let state = self.state.lock();
        let key = (kind, name.to_string());
        state.objects.contains(&key) || state.workloads.contains_key(&key)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Move the deletion timestamp of a resource into the past
    pub fn age_deletion(&self, kind: ResourceKind, name: &str, age: Duration) {
        let mut state = self.state.lock();
        if let Some(resource) = state
            .resources
            .get_mut(&kind)
            .and_then(|items| items.get_mut(name))
        {
            let aged = resource.clone().with_deletion_timestamp(Utc::now() - age);
            *resource = aged;
        }
    }

    /// Let the owning controller finish every pending deletion of `kind`
    pub fn complete_deletions(&self, kind: ResourceKind) {
        if let Some(items) = self.state.lock().resources.get_mut(&kind) {
            items.retain(|_, resource| resource.deletion_timestamp().is_none());
        }
    }

    /// Let every lingering workload finish terminating
    pub fn complete_workload_deletions(&self) {
        self.state
            .lock()
            .workloads
            .retain(|_, workload| workload.deletion_timestamp.is_none());
    }
}

#[async_trait]
impl ResourceStore for FakeStore {
    async fn list(&self, kind: ResourceKind) -> Result<BTreeMap<String, ManagedResource>> {
        let state = self.state.lock();
        if let Some(failure) = state.list_failures.get(&kind) {
            return Err(failure.error(kind.plural()));
        }
        Ok(state.resources.get(&kind).cloned().unwrap_or_default())
    }

    async fn delete(&self, kind: ResourceKind, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::Delete(kind, name.to_string()));
        let items = state.resources.entry(kind).or_default();
        let Some(resource) = items.get(name).cloned() else {
            return Err(Error::not_found(format!("{} {}", kind, name)));
        };
        if resource.finalizers().is_empty() {
            items.remove(name);
        } else if resource.deletion_timestamp().is_none() {
            items.insert(name.to_string(), resource.with_deletion_timestamp(Utc::now()));
        }
        Ok(())
    }

    async fn update(&self, resource: &ManagedResource) -> Result<ManagedResource> {
        let mut state = self.state.lock();
        let kind = resource.kind();
        let name = resource.name();
        state.calls.push(Call::Update(kind, name.clone()));
        if let Some(failure) = state.update_failures.get(&kind) {
            return Err(failure.error(&name));
        }
        let items = state.resources.entry(kind).or_default();
        if !items.contains_key(&name) {
            return Err(Error::not_found(format!("{} {}", kind, name)));
        }
        items.insert(name, resource.clone());
        Ok(resource.clone())
    }

    async fn remove_finalizer(&self, resource: &ManagedResource) -> Result<()> {
        let mut state = self.state.lock();
        let kind = resource.kind();
        let name = resource.name();
        state.calls.push(Call::RemoveFinalizer(kind, name.clone()));
        let items = state.resources.entry(kind).or_default();
        let Some(stored) = items.get_mut(&name) else {
            return Err(Error::not_found(format!("{} {}", kind, name)));
        };
        stored
            .object_mut()
            .metadata
            .finalizers
            .get_or_insert_with(Vec::new)
            .retain(|f| f != LONGHORN_FINALIZER);
        if stored.finalizers().is_empty() && stored.deletion_timestamp().is_some() {
            items.remove(&name);
        }
        Ok(())
    }

    async fn get_backup_volume(&self, backup_target: &str, volume: &str) -> Result<ManagedResource> {
        let state = self.state.lock();
        if let Some(failure) = state.backup_volume_failure {
            return Err(failure.error(volume));
        }
        state
            .resources
            .get(&ResourceKind::BackupVolume)
            .and_then(|items| {
                items.values().find(|bv| {
                    bv.label(LABEL_BACKUP_TARGET) == Some(backup_target)
                        && bv.label(LABEL_BACKUP_VOLUME) == Some(volume)
                })
            })
            .cloned()
            .ok_or_else(|| Error::not_found(format!("backup volume {}", volume)))
    }

    async fn get_setting(&self, name: &str) -> Result<String> {
        self.state
            .lock()
            .settings
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("setting {}", name)))
    }

    async fn get_workload(&self, kind: ObjectKind, name: &str) -> Result<Workload> {
        self.workload(kind, name)
            .ok_or_else(|| Error::not_found(format!("{} {}", kind, name)))
    }

    async fn list_objects(&self, kind: ObjectKind) -> Result<Vec<String>> {
        let state = self.state.lock();
        let objects = state
            .objects
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, name)| name.clone());
        let workloads = state
            .workloads
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, name)| name.clone());
        Ok(objects.chain(workloads).collect())
    }

    async fn delete_object(&self, kind: ObjectKind, name: &str) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.calls.push(Call::DeleteObject(kind, name.to_string()));
        let key = (kind, name.to_string());
        if state.objects.remove(&key) {
            return Ok(());
        }
        if !state.workloads.contains_key(&key) {
            return Err(Error::not_found(format!("{} {}", kind, name)));
        }
        if state.lingering.contains(&key) {
            if let Some(workload) = state.workloads.get_mut(&key) {
                workload.deletion_timestamp.get_or_insert_with(Utc::now);
            }
        } else {
            state.workloads.remove(&key);
        }
        Ok(())
    }
}

/// Change feed whose subscriptions are synced from the start
#[derive(Default)]
pub struct FakeFeed {
    installed: HashSet<ResourceKind>,
    subscribed: Mutex<Vec<WatchTarget>>,
    handlers: Mutex<Vec<EventHandler>>,
    unsynced: bool,
}

impl FakeFeed {
    /// Feed with every Longhorn kind installed
    pub fn all_installed() -> Self {
        Self::with_installed(ResourceKind::ALL)
    }

    pub fn with_installed(kinds: impl IntoIterator<Item = ResourceKind>) -> Self {
        Self {
            installed: kinds.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Subscriptions never report their initial sync
    pub fn never_synced(mut self) -> Self {
        self.unsynced = true;
        self
    }

    pub fn subscribed(&self) -> Vec<WatchTarget> {
        self.subscribed.lock().clone()
    }

    /// Deliver one notification to every subscriber
    pub fn notify(&self) {
        for handler in self.handlers.lock().iter() {
            handler();
        }
    }
}

#[async_trait]
impl ChangeFeed for FakeFeed {
    async fn is_installed(&self, kind: ResourceKind) -> Result<bool> {
        Ok(self.installed.contains(&kind))
    }

    fn subscribe(&self, target: WatchTarget, handler: EventHandler) -> Subscription {
        self.subscribed.lock().push(target);
        self.handlers.lock().push(handler);

        let (tx, rx) = watch::channel(!self.unsynced);
        let handle = tokio::spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await;
        });
        Subscription::new(target, rx, handle)
    }
}

/// Instance of `kind` carrying the Longhorn finalizer
pub fn resource(kind: ResourceKind, name: &str) -> ManagedResource {
    ManagedResource::build(kind, name, NAMESPACE).with_finalizer(LONGHORN_FINALIZER)
}

pub fn shared(store: FakeStore) -> Arc<FakeStore> {
    Arc::new(store)
}
