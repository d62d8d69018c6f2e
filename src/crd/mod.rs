//! Longhorn custom resources as seen by the uninstaller
//!
//! The uninstaller never owns these kinds, it only lists, deletes and
//! strips finalizers from them, so they are handled as dynamic objects
//! keyed by [`ResourceKind`] rather than as derived `CustomResource` types.

mod kind;
mod resource;
mod views;

pub use kind::*;
pub use resource::*;
pub use views::*;

/// API group of every Longhorn custom resource
pub const LONGHORN_GROUP: &str = "longhorn.io";

/// Storage version of the Longhorn custom resources
pub const LONGHORN_VERSION: &str = "v1beta2";

/// Finalizer Longhorn controllers place on their resources
pub const LONGHORN_FINALIZER: &str = "longhorn.io";

/// Annotation allowing the validator to accept deletion of the default backup target
pub const ANNOTATION_DELETE_BACKUP_TARGET: &str = "longhorn.io/delete-backup-target-from-longhorn";

/// Annotation allowing the validator to accept deletion of the default engine image
pub const ANNOTATION_DELETE_ENGINE_IMAGE: &str = "longhorn.io/delete-engine-image-from-longhorn";

/// Annotation allowing the validator to accept deletion of a node
pub const ANNOTATION_DELETE_NODE: &str = "longhorn.io/delete-node-from-longhorn";

/// Label carrying the backup volume name of a backup
pub const LABEL_BACKUP_VOLUME: &str = "longhorn.io/backup-volume";

/// Label carrying the backup target name of a backup volume
pub const LABEL_BACKUP_TARGET: &str = "longhorn.io/backup-target";
