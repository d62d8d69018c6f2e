//! CSI driver and cluster configuration cleanup
//!
//! These run once no Longhorn resource is left. Driver workloads are torn
//! down best-effort and reported as a Wait; configuration objects are
//! deleted by name and a missing object counts as deleted.

use tracing::{info, warn};

use super::uninstall::{Uninstaller, WaitReason};
use crate::config::{
    is_longhorn_pdb, CSI_DRIVER_NAME, DRIVER_DAEMON_SETS, DRIVER_DEPLOYMENTS, LEASE_NAMES,
    MUTATING_WEBHOOK_NAME, SECRET_NAMES, STORAGE_CLASS_NAME, VALIDATING_WEBHOOK_NAME,
};
use crate::error::{Result, ResultExt};
use crate::metrics;
use crate::store::ObjectKind;

impl Uninstaller {
    /// Delete the CSI driver workloads and registration
    ///
    /// Returns a Wait while any of them is terminating or failed to delete.
    pub(crate) async fn delete_driver(&self) -> Option<WaitReason> {
        let mut pending = 0;

        for name in DRIVER_DEPLOYMENTS {
            if self.delete_workload(ObjectKind::Deployment, name).await {
                pending += 1;
            }
        }
        for name in DRIVER_DAEMON_SETS {
            if self.delete_workload(ObjectKind::DaemonSet, name).await {
                pending += 1;
            }
        }

        match self
            .store
            .delete_object(ObjectKind::CsiDriver, CSI_DRIVER_NAME)
            .await
            .found()
        {
            Ok(true) => {
                info!(csi_driver = CSI_DRIVER_NAME, "Deleted");
                metrics::record_mutation("csidrivers", "delete");
            }
            Ok(false) => {}
            Err(e) => {
                warn!(csi_driver = CSI_DRIVER_NAME, error = %e, "Failed to delete");
                pending += 1;
            }
        }

        (pending > 0).then_some(WaitReason::DriverTerminating { pending })
    }

    /// Request deletion of a driver workload; true while it is still pending
    async fn delete_workload(&self, kind: ObjectKind, name: &str) -> bool {
        match self.store.get_workload(kind, name).await {
            Err(e) if e.is_not_found() => false,
            Err(e) => {
                warn!(kind = %kind, name = name, error = %e, "Failed to get for deletion");
                true
            }
            Ok(workload) if workload.deletion_timestamp.is_some() => {
                info!(kind = %kind, name = name, "Already marked for deletion");
                true
            }
            Ok(_) => match self.store.delete_object(kind, name).await.found() {
                Ok(existed) => {
                    if existed {
                        info!(kind = %kind, name = name, "Marked for deletion");
                        metrics::record_mutation(&kind.to_string(), "delete");
                    }
                    false
                }
                Err(e) => {
                    warn!(kind = %kind, name = name, error = %e, "Failed to mark for deletion");
                    true
                }
            },
        }
    }

    /// Remove webhooks, storage class, leases, secrets and disruption budgets
    pub(crate) async fn delete_cluster_config(&self) -> Result<()> {
        self.delete_named(ObjectKind::ValidatingWebhookConfiguration, VALIDATING_WEBHOOK_NAME)
            .await?;
        self.delete_named(ObjectKind::MutatingWebhookConfiguration, MUTATING_WEBHOOK_NAME)
            .await?;
        self.delete_named(ObjectKind::StorageClass, STORAGE_CLASS_NAME)
            .await?;
        for lease in LEASE_NAMES {
            self.delete_named(ObjectKind::Lease, lease).await?;
        }
        for secret in SECRET_NAMES {
            self.delete_named(ObjectKind::Secret, secret).await?;
        }
        self.delete_pod_disruption_budgets().await
    }

    async fn delete_named(&self, kind: ObjectKind, name: &str) -> Result<()> {
        let existed = self
            .store
            .delete_object(kind, name)
            .await
            .found()
            .map_err(|e| e.context(format!("failed to delete {} {}", kind, name)))?;
        if existed {
            info!(kind = %kind, name = name, "Successfully cleaned up");
            metrics::record_mutation(&kind.to_string(), "delete");
        }
        Ok(())
    }

    async fn delete_pod_disruption_budgets(&self) -> Result<()> {
        let budgets = match self.store.list_objects(ObjectKind::PodDisruptionBudget).await {
            Ok(budgets) => budgets,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.context("failed to list pod disruption budgets")),
        };

        for name in budgets.iter().filter(|name| is_longhorn_pdb(name)) {
            self.delete_named(ObjectKind::PodDisruptionBudget, name).await?;
        }
        Ok(())
    }
}
