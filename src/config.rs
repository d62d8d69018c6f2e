//! Uninstaller configuration and well-known object names

use std::time::Duration;

/// Default namespace Longhorn is installed into
pub const DEFAULT_NAMESPACE: &str = "longhorn-system";

/// Setting that must be `true` before anything is deleted
pub const SETTING_DELETING_CONFIRMATION_FLAG: &str = "deleting-confirmation-flag";

/// Setting naming the engine image the validator protects
pub const SETTING_DEFAULT_ENGINE_IMAGE: &str = "default-engine-image";

/// Manager DaemonSet; recreates several resources while it runs
pub const MANAGER_DAEMON_SET: &str = "longhorn-manager";

/// CSI driver Deployments
pub const DRIVER_DEPLOYMENTS: [&str; 5] = [
    "longhorn-driver-deployer",
    CSI_ATTACHER,
    CSI_PROVISIONER,
    "csi-resizer",
    "csi-snapshotter",
];

/// CSI plugin DaemonSets
pub const DRIVER_DAEMON_SETS: [&str; 1] = ["longhorn-csi-plugin"];

pub const CSI_ATTACHER: &str = "csi-attacher";
pub const CSI_PROVISIONER: &str = "csi-provisioner";

/// CSIDriver registration object
pub const CSI_DRIVER_NAME: &str = "driver.longhorn.io";

pub const VALIDATING_WEBHOOK_NAME: &str = "longhorn-webhook-validator";
pub const MUTATING_WEBHOOK_NAME: &str = "longhorn-webhook-mutator";

/// StorageClass created by the chart
pub const STORAGE_CLASS_NAME: &str = "longhorn";

/// Leader-election leases held by Longhorn and its CSI sidecars
pub const LEASE_NAMES: [&str; 5] = [
    "longhorn-manager-upgrade-lock",
    "driver-longhorn-io",
    "external-attacher-leader-driver-longhorn-io",
    "external-resizer-driver-longhorn-io",
    "external-snapshotter-leader-driver-longhorn-io",
];

/// Webhook CA and serving certificate secrets
pub const SECRET_NAMES: [&str; 2] = ["longhorn-webhook-ca", "longhorn-webhook-tls"];

/// Prefix of PodDisruptionBudgets guarding instance managers
pub const INSTANCE_MANAGER_PDB_PREFIX: &str = "instance-manager";

/// Grace period before the uninstaller strips finalizers itself
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(90);

/// DaemonSet running an engine image on every node
pub fn engine_image_daemon_set_name(engine_image: &str) -> String {
    format!("engine-image-{}", engine_image)
}

/// Pod serving a share manager
pub fn share_manager_pod_name(share_manager: &str) -> String {
    format!("share-manager-{}", share_manager)
}

/// Deployment collecting a support bundle
pub fn support_bundle_manager_name(support_bundle: &str) -> String {
    format!("longhorn-support-bundle-manager-{}", support_bundle)
}

/// Whether a PodDisruptionBudget belongs to Longhorn
pub fn is_longhorn_pdb(name: &str) -> bool {
    name == CSI_ATTACHER || name == CSI_PROVISIONER || name.starts_with(INSTANCE_MANAGER_PDB_PREFIX)
}

/// Startup parameters of the teardown
#[derive(Clone, Debug)]
pub struct UninstallConfig {
    /// Namespace Longhorn is installed into
    pub namespace: String,
    /// Proceed even if the manager is not ready or volumes are in use
    pub force: bool,
}

impl UninstallConfig {
    pub fn new(namespace: impl Into<String>, force: bool) -> Self {
        Self {
            namespace: namespace.into(),
            force,
        }
    }
}

impl Default for UninstallConfig {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE, false)
    }
}

/// Scheduling parameters of the reconciliation worker
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Delay before re-running a pass that ended in Wait
    pub wait_requeue: Duration,
    /// First retry delay after a failed pass
    pub base_backoff: Duration,
    /// Upper bound of the per-failure retry delay
    pub max_backoff: Duration,
    /// Token-bucket refill rate shared by all retries
    pub bucket_qps: f64,
    /// Token-bucket capacity
    pub bucket_burst: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            wait_requeue: Duration::from_secs(5),
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            bucket_qps: 100.0,
            bucket_burst: 1000,
        }
    }
}
