//! Per-kind teardown table
//!
//! Every kind is driven through the same soft-delete, grace period,
//! finalizer-removal cycle; the table records where a kind deviates from it.
//! Tables are scanned top to bottom and the first kind with any remaining
//! instance is the only one acted on in that pass.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::{debug, info};

use super::uninstall::{Uninstaller, WaitReason};
use crate::config::{
    engine_image_daemon_set_name, share_manager_pod_name, support_bundle_manager_name,
    SETTING_DEFAULT_ENGINE_IMAGE,
};
use crate::crd::{
    ManagedResource, ResourceKind, ANNOTATION_DELETE_ENGINE_IMAGE, ANNOTATION_DELETE_NODE,
};
use crate::error::{Error, Result, ResultExt};
use crate::metrics;
use crate::store::ObjectKind;

/// How the remaining instances of one kind are handled
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// Soft-delete, then strip the finalizer per the policy
    Delete(DeletePolicy),
    /// Neutralise the remote URL first; only a later pass deletes
    ReleaseBackupTargets,
    /// Another controller owns the cleanup; just wait
    AwaitExternal,
    /// Delete backups whose backup volume no longer exists
    PruneOrphanedBackups,
    /// Must already be gone; report as stuck
    Stuck,
}

/// Variations on the default deletion cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeletePolicy {
    /// Runs once before the deletion request
    pub prepare: Option<Prepare>,
    /// Generated object deleted before the finalizer is stripped
    pub child: Option<ChildObject>,
    pub finalizer: FinalizerRemoval,
}

impl DeletePolicy {
    /// Delete, then strip the finalizer once the grace period has elapsed
    pub const fn standard() -> Self {
        Self {
            prepare: None,
            child: None,
            finalizer: FinalizerRemoval::AfterGracePeriod,
        }
    }

    /// Delete and leave the rest to the owning controller
    pub const fn delete_only() -> Self {
        Self {
            prepare: None,
            child: None,
            finalizer: FinalizerRemoval::Never,
        }
    }

    pub const fn with_child(self, child: ChildObject) -> Self {
        Self {
            child: Some(child),
            ..self
        }
    }

    pub const fn with_prepare(self, prepare: Prepare) -> Self {
        Self {
            prepare: Some(prepare),
            ..self
        }
    }

    pub const fn with_finalizer(self, finalizer: FinalizerRemoval) -> Self {
        Self { finalizer, ..self }
    }
}

/// When a soft-deleted instance has its finalizer stripped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinalizerRemoval {
    AfterGracePeriod,
    Immediately,
    Never,
}

/// Step persisted on an instance before it is deleted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Prepare {
    /// Annotate the default engine image so the validator lets it go
    MarkDefaultEngineImage,
    /// Annotate the node so the validator lets it go
    MarkNodeForDeletion,
}

/// Object generated from an instance by its controller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildObject {
    EngineImageDaemonSet,
    ShareManagerPod,
    /// Pod named exactly after its owner
    OwnerNamedPod,
    SupportBundleManager,
}

impl ChildObject {
    /// Kind and name of the child generated for `owner`
    pub fn locate(&self, owner: &str) -> (ObjectKind, String) {
        match self {
            ChildObject::EngineImageDaemonSet => {
                (ObjectKind::DaemonSet, engine_image_daemon_set_name(owner))
            }
            ChildObject::ShareManagerPod => (ObjectKind::Pod, share_manager_pod_name(owner)),
            ChildObject::OwnerNamedPod => (ObjectKind::Pod, owner.to_string()),
            ChildObject::SupportBundleManager => {
                (ObjectKind::Deployment, support_bundle_manager_name(owner))
            }
        }
    }
}

/// One row of a teardown table
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TeardownStep {
    pub kind: ResourceKind,
    pub strategy: Strategy,
}

const fn step(kind: ResourceKind, strategy: Strategy) -> TeardownStep {
    TeardownStep { kind, strategy }
}

/// Kinds the manager does not recreate, in the order they must disappear
pub const NON_RECREATABLE: [TeardownStep; 18] = [
    step(ResourceKind::Volume, Strategy::Delete(DeletePolicy::standard())),
    step(ResourceKind::Snapshot, Strategy::Delete(DeletePolicy::standard())),
    step(ResourceKind::Engine, Strategy::Delete(DeletePolicy::standard())),
    step(ResourceKind::Replica, Strategy::Delete(DeletePolicy::standard())),
    step(ResourceKind::BackupTarget, Strategy::ReleaseBackupTargets),
    step(ResourceKind::BackupVolume, Strategy::AwaitExternal),
    step(ResourceKind::Backup, Strategy::PruneOrphanedBackups),
    step(ResourceKind::SystemBackup, Strategy::Stuck),
    step(
        ResourceKind::EngineImage,
        Strategy::Delete(
            DeletePolicy::standard()
                .with_prepare(Prepare::MarkDefaultEngineImage)
                .with_child(ChildObject::EngineImageDaemonSet),
        ),
    ),
    step(ResourceKind::BackingImage, Strategy::Delete(DeletePolicy::standard())),
    step(
        ResourceKind::ShareManager,
        Strategy::Delete(DeletePolicy::standard().with_child(ChildObject::ShareManagerPod)),
    ),
    step(
        ResourceKind::BackingImageManager,
        Strategy::Delete(DeletePolicy::standard().with_child(ChildObject::OwnerNamedPod)),
    ),
    step(
        ResourceKind::BackingImageDataSource,
        Strategy::Delete(DeletePolicy::standard().with_child(ChildObject::OwnerNamedPod)),
    ),
    step(ResourceKind::RecurringJob, Strategy::Delete(DeletePolicy::delete_only())),
    step(
        ResourceKind::Node,
        Strategy::Delete(
            DeletePolicy::standard()
                .with_prepare(Prepare::MarkNodeForDeletion)
                .with_finalizer(FinalizerRemoval::Immediately),
        ),
    ),
    step(ResourceKind::InstanceManager, Strategy::Delete(DeletePolicy::delete_only())),
    step(ResourceKind::Orphan, Strategy::Delete(DeletePolicy::delete_only())),
    step(ResourceKind::SystemRestore, Strategy::Delete(DeletePolicy::delete_only())),
];

/// Kinds that need the manager running to be cleaned up
pub const MANAGER_DEPENDENT: [TeardownStep; 1] = [step(
    ResourceKind::SupportBundle,
    Strategy::Delete(DeletePolicy::standard().with_child(ChildObject::SupportBundleManager)),
)];

/// Kinds the manager recreates; only finished once the manager is gone
pub const RECREATABLE: [TeardownStep; 1] =
    [step(ResourceKind::BackupTarget, Strategy::ReleaseBackupTargets)];

impl Uninstaller {
    /// Act on the first kind of `steps` that still has instances
    pub(crate) async fn scan(&self, steps: &[TeardownStep]) -> Result<Option<WaitReason>> {
        for step in steps {
            let remaining = self
                .store
                .list(step.kind)
                .await
                .map_err(|e| e.context(format!("failed to list {}", step.kind)))?;
            metrics::REMAINING_RESOURCES
                .with_label_values(&[step.kind.plural()])
                .set(remaining.len() as f64);

            if remaining.is_empty() {
                continue;
            }

            info!(kind = %step.kind, count = remaining.len(), "Found {} {} remaining", remaining.len(), step.kind);
            return self.tear_down(step, remaining).await.map(Some);
        }
        Ok(None)
    }

    async fn tear_down(
        &self,
        step: &TeardownStep,
        remaining: BTreeMap<String, ManagedResource>,
    ) -> Result<WaitReason> {
        let kind = step.kind;
        let count = remaining.len();

        match step.strategy {
            Strategy::Delete(policy) => {
                for resource in remaining.into_values() {
                    self.delete_resource(policy, resource)
                        .await
                        .map_err(|e| e.context(format!("failed to delete {}", kind)))?;
                }
                Ok(WaitReason::Deleting { kind, count })
            }
            Strategy::ReleaseBackupTargets => {
                for target in remaining.into_values() {
                    self.release_backup_target(target)
                        .await
                        .map_err(|e| e.context(format!("failed to delete {}", kind)))?;
                }
                Ok(WaitReason::Deleting { kind, count })
            }
            Strategy::AwaitExternal => Ok(WaitReason::ExternalCleanup { kind, count }),
            Strategy::PruneOrphanedBackups => {
                for backup in remaining.values() {
                    self.prune_backup(backup).await?;
                }
                Ok(WaitReason::Deleting { kind, count })
            }
            Strategy::Stuck => Err(Error::Stuck { kind, count }),
        }
    }

    async fn delete_resource(&self, policy: DeletePolicy, mut resource: ManagedResource) -> Result<()> {
        let Some(deleted_at) = resource.deletion_timestamp() else {
            if let Some(prepare) = policy.prepare {
                self.prepare(prepare, &mut resource).await?;
            }
            return self.mark_for_deletion(&resource).await;
        };

        let release = match policy.finalizer {
            FinalizerRemoval::Never => false,
            FinalizerRemoval::Immediately => true,
            FinalizerRemoval::AfterGracePeriod => self.grace_period.has_elapsed(deleted_at, Utc::now()),
        };
        if !release {
            debug!(kind = %resource.kind(), name = %resource.name(), "Waiting for owner to finish deletion");
            return Ok(());
        }

        if let Some(child) = policy.child {
            self.delete_child(child, &resource).await?;
        }
        self.remove_finalizer(&resource).await
    }

    async fn prepare(&self, prepare: Prepare, resource: &mut ManagedResource) -> Result<()> {
        let name = resource.name();
        match prepare {
            Prepare::MarkDefaultEngineImage => {
                let default_image = self
                    .store
                    .get_setting(SETTING_DEFAULT_ENGINE_IMAGE)
                    .await
                    .map_err(|e| e.context("failed to get default engine image setting"))?;
                if resource.engine_image()? != default_image {
                    return Ok(());
                }
                info!(name = %name, annotation = ANNOTATION_DELETE_ENGINE_IMAGE, "Adding annotation to engine image to mark for deletion");
                resource.annotate(ANNOTATION_DELETE_ENGINE_IMAGE, "");
                self.store.update(resource).await.map_err(|e| {
                    e.context("failed to update engine image annotations to mark for deletion")
                })?;
            }
            Prepare::MarkNodeForDeletion => {
                info!(name = %name, annotation = ANNOTATION_DELETE_NODE, "Adding annotation to node to mark for deletion");
                resource.annotate(ANNOTATION_DELETE_NODE, "");
                self.store
                    .update(resource)
                    .await
                    .map_err(|e| e.context("failed to update node annotations to mark for deletion"))?;
            }
        }
        metrics::record_mutation(resource.kind().plural(), "annotate");
        Ok(())
    }

    pub(crate) async fn mark_for_deletion(&self, resource: &ManagedResource) -> Result<()> {
        let kind = resource.kind();
        let name = resource.name();
        let existed = self
            .store
            .delete(kind, &name)
            .await
            .found()
            .map_err(|e| e.context("failed to mark for deletion"))?;
        if existed {
            info!(kind = %kind, name = %name, "Marked for deletion");
            metrics::record_mutation(kind.plural(), "delete");
        } else {
            info!(kind = %kind, name = %name, "{} is not found", kind.kind());
        }
        Ok(())
    }

    async fn delete_child(&self, child: ChildObject, owner: &ManagedResource) -> Result<()> {
        let (child_kind, child_name) = child.locate(&owner.name());
        let existed = self
            .store
            .delete_object(child_kind, &child_name)
            .await
            .found()
            .map_err(|e| e.context(format!("failed to delete {} {}", child_kind, child_name)))?;
        if existed {
            info!(kind = %owner.kind(), name = %owner.name(), child = %child_name, "Removed {}", child_kind);
            metrics::record_mutation(owner.kind().plural(), "delete_child");
        } else {
            info!(kind = %owner.kind(), name = %owner.name(), child = %child_name, "{} is not found", child_kind);
        }
        Ok(())
    }

    async fn remove_finalizer(&self, resource: &ManagedResource) -> Result<()> {
        let kind = resource.kind();
        let name = resource.name();
        let existed = self
            .store
            .remove_finalizer(resource)
            .await
            .found()
            .map_err(|e| e.context("failed to remove finalizer"))?;
        if existed {
            info!(kind = %kind, name = %name, "Removed finalizer");
            metrics::record_mutation(kind.plural(), "remove_finalizer");
        } else {
            info!(kind = %kind, name = %name, "{} is not found", kind.kind());
        }
        Ok(())
    }

    /// Clear the URL of a live backup target before deleting it so its
    /// remote data survives the uninstall
    async fn release_backup_target(&self, mut target: ManagedResource) -> Result<()> {
        if target.deletion_timestamp().is_some() {
            return self.delete_resource(DeletePolicy::standard(), target).await;
        }

        if target.backup_target_needs_release()? {
            info!(name = %target.name(), "Cleanup BackupTarget URL and add annotation to mark for deletion");
            target.release_backup_target();
            self.store.update(&target).await.map_err(|e| {
                e.context("failed to update backup target annotations to mark for deletion")
            })?;
            metrics::record_mutation(ResourceKind::BackupTarget.plural(), "annotate");
            return Ok(());
        }

        self.mark_for_deletion(&target).await
    }

    /// Delete a backup nobody else will clean up: one that never completed,
    /// or whose backup volume is already gone
    async fn prune_backup(&self, backup: &ManagedResource) -> Result<()> {
        let name = backup.name();

        if backup.deletion_timestamp().is_some() {
            return self
                .delete_resource(DeletePolicy::standard(), backup.clone())
                .await
                .map_err(|e| e.context(format!("failed to delete backup {}", name)));
        }

        if let Some((backup_target, volume)) = backup.completed_backup_location()? {
            match self.store.get_backup_volume(&backup_target, &volume).await {
                Ok(_) => {
                    debug!(name = %name, volume = %volume, "Backup volume still present, leaving backup to its controller");
                    return Ok(());
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    return Err(Error::BackupVolumeLookup {
                        backup: name,
                        source: Box::new(e),
                    })
                }
            }
        }

        self.mark_for_deletion(backup)
            .await
            .map_err(|e| e.context(format!("failed to delete backup {}", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_order_is_fixed() {
        let kinds: Vec<ResourceKind> = NON_RECREATABLE.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, ResourceKind::ALL[..18].to_vec());
    }

    #[test]
    fn test_child_names() {
        assert_eq!(
            ChildObject::EngineImageDaemonSet.locate("ei-1"),
            (ObjectKind::DaemonSet, "engine-image-ei-1".to_string())
        );
        assert_eq!(
            ChildObject::OwnerNamedPod.locate("bim-1"),
            (ObjectKind::Pod, "bim-1".to_string())
        );
        assert_eq!(
            ChildObject::SupportBundleManager.locate("sb-1"),
            (ObjectKind::Deployment, "longhorn-support-bundle-manager-sb-1".to_string())
        );
    }

    #[test]
    fn test_special_rules() {
        let node = NON_RECREATABLE
            .iter()
            .find(|s| s.kind == ResourceKind::Node)
            .unwrap();
        assert_eq!(
            node.strategy,
            Strategy::Delete(DeletePolicy {
                prepare: Some(Prepare::MarkNodeForDeletion),
                child: None,
                finalizer: FinalizerRemoval::Immediately,
            })
        );

        for kind in [
            ResourceKind::RecurringJob,
            ResourceKind::InstanceManager,
            ResourceKind::Orphan,
            ResourceKind::SystemRestore,
        ] {
            let step = NON_RECREATABLE.iter().find(|s| s.kind == kind).unwrap();
            assert_eq!(step.strategy, Strategy::Delete(DeletePolicy::delete_only()), "{}", kind);
        }
    }
}
