//! Teardown orchestrator
//!
//! One call to [`Uninstaller::uninstall`] is one pass over the cluster:
//! - Precondition gate (confirmation flag, manager readiness, volumes in use)
//! - Non-recreatable kinds, while the manager still runs
//! - Manager-dependent kinds, then the manager itself
//! - Recreatable kinds, then a final zero-grace sweep
//! - CSI driver and cluster configuration
//!
//! Any phase may end the pass early with [`PassOutcome::Wait`]; the pass is
//! simply run again once the cluster has moved on.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use super::grace_period::GracePeriod;
use super::teardown::{MANAGER_DEPENDENT, NON_RECREATABLE, RECREATABLE};
use crate::config::{UninstallConfig, MANAGER_DAEMON_SET, SETTING_DELETING_CONFIRMATION_FLAG};
use crate::crd::ResourceKind;
use crate::error::{Error, Result};
use crate::metrics;
use crate::store::{ObjectKind, ResourceStore};

/// Result of a pass that did not fail
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PassOutcome {
    /// Everything is gone
    Done,
    /// Progress depends on other controllers; run the pass again later
    Wait(WaitReason),
}

/// Why a pass stopped before reaching the end
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WaitReason {
    /// Instances of `kind` were acted on and are on their way out
    Deleting { kind: ResourceKind, count: usize },
    /// Instances of `kind` are cleaned up by another controller
    ExternalCleanup { kind: ResourceKind, count: usize },
    /// The manager is running but not ready, and `force` is not set
    ManagerNotReady,
    /// The manager DaemonSet is being deleted
    ManagerTerminating,
    /// CSI driver objects are still terminating or could not be deleted
    DriverTerminating { pending: usize },
}

impl fmt::Display for WaitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitReason::Deleting { kind, count } => write!(f, "deleting {} {}", count, kind),
            WaitReason::ExternalCleanup { kind, count } => {
                write!(f, "waiting for {} {} to be cleaned up", count, kind)
            }
            WaitReason::ManagerNotReady => f.write_str("waiting for manager to become ready"),
            WaitReason::ManagerTerminating => f.write_str("waiting for manager to terminate"),
            WaitReason::DriverTerminating { pending } => {
                write!(f, "waiting for {} driver objects to terminate", pending)
            }
        }
    }
}

/// Observed state of the manager DaemonSet
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ManagerState {
    Ready,
    NotReady,
    Terminating,
    Absent,
}

/// Drives a Longhorn installation to zero
pub struct Uninstaller {
    pub(crate) store: Arc<dyn ResourceStore>,
    pub(crate) grace_period: GracePeriod,
    config: UninstallConfig,
    preconditions_met: AtomicBool,
}

impl Uninstaller {
    pub fn new(store: Arc<dyn ResourceStore>, config: UninstallConfig) -> Self {
        Self {
            store,
            grace_period: GracePeriod::default(),
            config,
            preconditions_met: AtomicBool::new(false),
        }
    }

    /// Start from a shorter grace period than the default
    pub fn with_grace_period(mut self, period: Duration) -> Self {
        self.grace_period = GracePeriod::new(period);
        self
    }

    pub fn config(&self) -> &UninstallConfig {
        &self.config
    }

    /// Grace period currently in force
    pub fn grace_period(&self) -> Duration {
        self.grace_period.current()
    }

    /// Run one teardown pass
    #[instrument(skip(self), fields(namespace = %self.config.namespace, force = self.config.force))]
    pub async fn uninstall(&self) -> Result<PassOutcome> {
        self.ensure_preconditions().await?;

        match self.manager_state().await? {
            ManagerState::Ready => {
                self.touch_backup_targets().await?;
                if let Some(reason) = self.scan(&NON_RECREATABLE).await? {
                    return Ok(PassOutcome::Wait(reason));
                }
            }
            // Deleting the manager now would skip the graceful cleanup
            ManagerState::NotReady if !self.config.force => {
                warn!("Manager is not ready, waiting before deleting it");
                return Ok(PassOutcome::Wait(WaitReason::ManagerNotReady));
            }
            ManagerState::NotReady | ManagerState::Terminating | ManagerState::Absent => {}
        }

        if let Some(reason) = self.scan(&MANAGER_DEPENDENT).await? {
            return Ok(PassOutcome::Wait(reason));
        }

        // The manager recreates some resources, so it goes before them
        if let Some(reason) = self.delete_manager().await? {
            return Ok(PassOutcome::Wait(reason));
        }

        if let Some(reason) = self.scan(&RECREATABLE).await? {
            return Ok(PassOutcome::Wait(reason));
        }

        // No controller is left to finish a graceful cleanup
        self.expire_grace_period();
        if let Some(reason) = self.scan(&NON_RECREATABLE).await? {
            return Ok(PassOutcome::Wait(reason));
        }

        if let Some(reason) = self.delete_driver().await {
            return Ok(PassOutcome::Wait(reason));
        }

        self.delete_cluster_config().await?;

        Ok(PassOutcome::Done)
    }

    /// Verify the uninstall may proceed
    ///
    /// Forcing past a manager that is not ready drops the grace period to
    /// zero, since nothing will perform a graceful cleanup.
    pub async fn check_preconditions(&self) -> Result<()> {
        let flag = self
            .store
            .get_setting(SETTING_DELETING_CONFIRMATION_FLAG)
            .await
            .map_err(|e| e.context("failed to check deleting-confirmation-flag setting"))?;
        let confirmed = parse_flag(&flag).ok_or_else(|| {
            Error::config(format!(
                "invalid {} setting value '{}'",
                SETTING_DELETING_CONFIRMATION_FLAG, flag
            ))
        })?;
        if !confirmed {
            return Err(Error::precondition(
                "cannot uninstall Longhorn because deleting-confirmation-flag is set to `false`. \
                 Please set it to `true` using Longhorn UI or \
                 kubectl -n longhorn-system edit settings.longhorn.io deleting-confirmation-flag",
            ));
        }

        if !self.manager_ready().await? {
            if !self.config.force {
                return Err(Error::precondition("manager not ready, set --force to continue"));
            }
            warn!("Manager is not ready, this may leave data behind");
            self.expire_grace_period();
        }

        let volumes = self.store.list(ResourceKind::Volume).await?;
        let mut volumes_in_use = false;
        for volume in volumes.values() {
            if volume.volume_in_use()? {
                warn!(volume = %volume.name(), "Volume is in use");
                volumes_in_use = true;
            }
        }
        if volumes_in_use && !self.config.force {
            return Err(Error::precondition("volume(s) are in use, set --force to continue"));
        }

        self.preconditions_met.store(true, Ordering::Release);
        Ok(())
    }

    /// Run the gate until it has passed once; later passes legitimately see
    /// the manager gone
    async fn ensure_preconditions(&self) -> Result<()> {
        if self.preconditions_met.load(Ordering::Acquire) {
            return Ok(());
        }
        self.check_preconditions().await
    }

    /// Whether the manager DaemonSet is up, tolerating one missing pod so an
    /// uninstall can run during an upgrade
    pub async fn manager_ready(&self) -> Result<bool> {
        Ok(self.manager_state().await? == ManagerState::Ready)
    }

    async fn manager_state(&self) -> Result<ManagerState> {
        let manager = match self
            .store
            .get_workload(ObjectKind::DaemonSet, MANAGER_DAEMON_SET)
            .await
        {
            Ok(manager) => manager,
            Err(e) if e.is_not_found() => return Ok(ManagerState::Absent),
            Err(e) => return Err(e),
        };

        if manager.deletion_timestamp.is_some() {
            warn!(daemon_set = MANAGER_DAEMON_SET, "Marked for deletion");
            return Ok(ManagerState::Terminating);
        }
        if manager.ready < manager.desired - 1 {
            warn!(
                daemon_set = MANAGER_DAEMON_SET,
                ready = manager.ready,
                desired = manager.desired,
                "Not enough ready pods"
            );
            return Ok(ManagerState::NotReady);
        }
        Ok(ManagerState::Ready)
    }

    /// Re-save every backup target so it is stored at the current API
    /// version; once the manager and its conversion webhook are gone,
    /// objects at an older version can no longer be deleted
    async fn touch_backup_targets(&self) -> Result<()> {
        let targets = self.store.list(ResourceKind::BackupTarget).await?;
        for target in targets.values() {
            match self.store.update(target).await {
                Ok(_) => {}
                Err(e) if e.is_conflict() => {}
                Err(e) => {
                    return Err(
                        e.context("failed to touch the backup target CR for API version migration")
                    )
                }
            }
        }
        Ok(())
    }

    async fn delete_manager(&self) -> Result<Option<WaitReason>> {
        let manager = match self
            .store
            .get_workload(ObjectKind::DaemonSet, MANAGER_DAEMON_SET)
            .await
        {
            Ok(manager) => manager,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        if manager.deletion_timestamp.is_some() {
            info!(daemon_set = MANAGER_DAEMON_SET, "Already marked for deletion");
            return Ok(Some(WaitReason::ManagerTerminating));
        }

        if let Err(e) = self
            .store
            .delete_object(ObjectKind::DaemonSet, MANAGER_DAEMON_SET)
            .await
        {
            warn!(daemon_set = MANAGER_DAEMON_SET, "Failed to mark for deletion");
            return Err(e);
        }
        info!(daemon_set = MANAGER_DAEMON_SET, "Marked for deletion");
        metrics::record_mutation("daemonsets", "delete");
        Ok(Some(WaitReason::ManagerTerminating))
    }

    fn expire_grace_period(&self) {
        self.grace_period.expire();
        metrics::GRACE_PERIOD_SECONDS.set(0.0);
    }
}

/// Parse a boolean setting the way Longhorn writes it
fn parse_flag(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        for value in ["true", "True", "TRUE", "t", "T", "1", " true\n"] {
            assert_eq!(parse_flag(value), Some(true), "{:?}", value);
        }
        for value in ["false", "False", "FALSE", "f", "F", "0"] {
            assert_eq!(parse_flag(value), Some(false), "{:?}", value);
        }
        for value in ["", "yes", "tRuE", "maybe", "2"] {
            assert_eq!(parse_flag(value), None, "{:?}", value);
        }
    }

    #[test]
    fn test_wait_reason_display() {
        assert_eq!(
            WaitReason::ManagerNotReady.to_string(),
            "waiting for manager to become ready"
        );
        assert_eq!(
            WaitReason::Deleting {
                kind: ResourceKind::Volume,
                count: 2
            }
            .to_string(),
            "deleting 2 volumes"
        );
    }
}
