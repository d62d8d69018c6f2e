//! Typed views of the kind-specific fields the uninstaller consults

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ManagedResource, ANNOTATION_DELETE_BACKUP_TARGET, LABEL_BACKUP_VOLUME};
use crate::error::Result;

/// Volume state reported while a workload is attaching it
pub const VOLUME_STATE_ATTACHING: &str = "attaching";

/// Volume state reported while a workload uses it
pub const VOLUME_STATE_ATTACHED: &str = "attached";

/// Volume status fields
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeStatus {
    #[serde(default)]
    pub state: String,
}

/// BackupTarget spec fields
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupTargetSpec {
    #[serde(default, rename = "backupTargetURL")]
    pub backup_target_url: String,
}

/// Backup status fields
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupStatus {
    /// Populated once the backup completed against a target
    #[serde(default)]
    pub backup_target_name: String,
}

/// EngineImage spec fields
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineImageSpec {
    #[serde(default)]
    pub image: String,
}

impl ManagedResource {
    /// Whether a volume is attaching or attached to a workload
    pub fn volume_in_use(&self) -> Result<bool> {
        let status: VolumeStatus = self.status()?;
        Ok(status.state == VOLUME_STATE_ATTACHING || status.state == VOLUME_STATE_ATTACHED)
    }

    /// Whether a backup target still points at remote storage or lacks the
    /// deletion annotation, and so must be neutralised before it is deleted
    pub fn backup_target_needs_release(&self) -> Result<bool> {
        let spec: BackupTargetSpec = self.spec()?;
        Ok(!spec.backup_target_url.is_empty() || !self.has_annotation(ANNOTATION_DELETE_BACKUP_TARGET))
    }

    /// Clear the backup target URL and mark it deletable by the uninstaller
    pub fn release_backup_target(&mut self) {
        self.annotate(ANNOTATION_DELETE_BACKUP_TARGET, "");
        self.set_spec_field("backupTargetURL", Value::String(String::new()));
    }

    /// Backup volume and backup target of a completed backup
    pub fn completed_backup_location(&self) -> Result<Option<(String, String)>> {
        let Some(volume) = self.label(LABEL_BACKUP_VOLUME) else {
            return Ok(None);
        };
        let status: BackupStatus = self.status()?;
        if status.backup_target_name.is_empty() {
            return Ok(None);
        }
        Ok(Some((status.backup_target_name, volume.to_string())))
    }

    /// Image of an engine image
    pub fn engine_image(&self) -> Result<String> {
        let spec: EngineImageSpec = self.spec()?;
        Ok(spec.image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ResourceKind;
    use serde_json::json;

    const NS: &str = "longhorn-system";

    #[test]
    fn test_volume_in_use_states() {
        for (state, in_use) in [("attached", true), ("attaching", true), ("detached", false)] {
            let vol = ManagedResource::build(ResourceKind::Volume, "v", NS)
                .with_status(json!({ "state": state }));
            assert_eq!(vol.volume_in_use().unwrap(), in_use, "state {}", state);
        }
    }

    #[test]
    fn test_backup_target_release_clears_url() {
        let mut bt = ManagedResource::build(ResourceKind::BackupTarget, "default", NS)
            .with_spec(json!({ "backupTargetURL": "s3://bucket@us-east-1/" }));
        assert!(bt.backup_target_needs_release().unwrap());

        bt.release_backup_target();
        assert!(!bt.backup_target_needs_release().unwrap());
        assert!(bt.spec::<BackupTargetSpec>().unwrap().backup_target_url.is_empty());
    }

    #[test]
    fn test_backup_target_without_annotation_needs_release() {
        let bt = ManagedResource::build(ResourceKind::BackupTarget, "default", NS);
        assert!(bt.backup_target_needs_release().unwrap());
    }

    #[test]
    fn test_completed_backup_location_requires_label_and_status() {
        let unlabelled = ManagedResource::build(ResourceKind::Backup, "b", NS)
            .with_status(json!({ "backupTargetName": "default" }));
        assert!(unlabelled.completed_backup_location().unwrap().is_none());

        let incomplete = ManagedResource::build(ResourceKind::Backup, "b", NS)
            .with_label(LABEL_BACKUP_VOLUME, "vol-1");
        assert!(incomplete.completed_backup_location().unwrap().is_none());

        let complete = incomplete.with_status(json!({ "backupTargetName": "default" }));
        assert_eq!(
            complete.completed_backup_location().unwrap(),
            Some(("default".to_string(), "vol-1".to_string()))
        );
    }
}
