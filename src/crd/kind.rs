//! Managed Resource Kinds

use std::fmt;

use kube::core::{ApiResource, GroupVersionKind};

use super::{LONGHORN_GROUP, LONGHORN_VERSION};

/// One of the Longhorn custom resource kinds the uninstaller drives to zero
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Volume,
    Snapshot,
    Engine,
    Replica,
    BackupTarget,
    BackupVolume,
    Backup,
    SystemBackup,
    EngineImage,
    BackingImage,
    ShareManager,
    BackingImageManager,
    BackingImageDataSource,
    RecurringJob,
    Node,
    InstanceManager,
    Orphan,
    SystemRestore,
    SupportBundle,
}

impl ResourceKind {
    /// Every managed kind, in teardown order
    pub const ALL: [ResourceKind; 19] = [
        ResourceKind::Volume,
        ResourceKind::Snapshot,
        ResourceKind::Engine,
        ResourceKind::Replica,
        ResourceKind::BackupTarget,
        ResourceKind::BackupVolume,
        ResourceKind::Backup,
        ResourceKind::SystemBackup,
        ResourceKind::EngineImage,
        ResourceKind::BackingImage,
        ResourceKind::ShareManager,
        ResourceKind::BackingImageManager,
        ResourceKind::BackingImageDataSource,
        ResourceKind::RecurringJob,
        ResourceKind::Node,
        ResourceKind::InstanceManager,
        ResourceKind::Orphan,
        ResourceKind::SystemRestore,
        ResourceKind::SupportBundle,
    ];

    /// Kubernetes `kind` of the resource
    pub fn kind(&self) -> &'static str {
        match self {
            ResourceKind::Volume => "Volume",
            ResourceKind::Snapshot => "Snapshot",
            ResourceKind::Engine => "Engine",
            ResourceKind::Replica => "Replica",
            ResourceKind::BackupTarget => "BackupTarget",
            ResourceKind::BackupVolume => "BackupVolume",
            ResourceKind::Backup => "Backup",
            ResourceKind::SystemBackup => "SystemBackup",
            ResourceKind::EngineImage => "EngineImage",
            ResourceKind::BackingImage => "BackingImage",
            ResourceKind::ShareManager => "ShareManager",
            ResourceKind::BackingImageManager => "BackingImageManager",
            ResourceKind::BackingImageDataSource => "BackingImageDataSource",
            ResourceKind::RecurringJob => "RecurringJob",
            ResourceKind::Node => "Node",
            ResourceKind::InstanceManager => "InstanceManager",
            ResourceKind::Orphan => "Orphan",
            ResourceKind::SystemRestore => "SystemRestore",
            ResourceKind::SupportBundle => "SupportBundle",
        }
    }

    /// Plural resource name used in API paths
    pub fn plural(&self) -> &'static str {
        match self {
            ResourceKind::Volume => "volumes",
            ResourceKind::Snapshot => "snapshots",
            ResourceKind::Engine => "engines",
            ResourceKind::Replica => "replicas",
            ResourceKind::BackupTarget => "backuptargets",
            ResourceKind::BackupVolume => "backupvolumes",
            ResourceKind::Backup => "backups",
            ResourceKind::SystemBackup => "systembackups",
            ResourceKind::EngineImage => "engineimages",
            ResourceKind::BackingImage => "backingimages",
            ResourceKind::ShareManager => "sharemanagers",
            ResourceKind::BackingImageManager => "backingimagemanagers",
            ResourceKind::BackingImageDataSource => "backingimagedatasources",
            ResourceKind::RecurringJob => "recurringjobs",
            ResourceKind::Node => "nodes",
            ResourceKind::InstanceManager => "instancemanagers",
            ResourceKind::Orphan => "orphans",
            ResourceKind::SystemRestore => "systemrestores",
            ResourceKind::SupportBundle => "supportbundles",
        }
    }

    /// Name of the CustomResourceDefinition backing this kind
    pub fn crd_name(&self) -> String {
        format!("{}.{}", self.plural(), LONGHORN_GROUP)
    }

    /// Dynamic API descriptor for this kind
    pub fn api_resource(&self) -> ApiResource {
        ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk(LONGHORN_GROUP, LONGHORN_VERSION, self.kind()),
            self.plural(),
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plural())
    }
}

/// Dynamic API descriptor for Longhorn settings
pub fn setting_api_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk(LONGHORN_GROUP, LONGHORN_VERSION, "Setting"),
        "settings",
    )
}
