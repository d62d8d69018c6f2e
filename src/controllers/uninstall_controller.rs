//! Uninstall controller
//!
//! Watches every installed Longhorn kind plus the driver workloads and runs
//! teardown passes through a single-worker queue until a pass reports
//! [`PassOutcome::Done`] or the caller stops it.

use std::sync::Arc;
use std::time::Instant;

use futures::future::try_join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::queue::{default_rate_limiter, WorkQueue};
use crate::config::ControllerConfig;
use crate::crd::ResourceKind;
use crate::error::{Error, Result};
use crate::feed::{ChangeFeed, Subscription, WatchTarget};
use crate::metrics;
use crate::reconcilers::{PassOutcome, Uninstaller};

/// Schedules teardown passes in response to cluster changes
pub struct UninstallController {
    uninstaller: Arc<Uninstaller>,
    feed: Arc<dyn ChangeFeed>,
    queue: WorkQueue,
    config: ControllerConfig,
    shutdown: CancellationToken,
}

impl UninstallController {
    pub fn new(
        uninstaller: Arc<Uninstaller>,
        feed: Arc<dyn ChangeFeed>,
        config: ControllerConfig,
    ) -> Self {
        let queue = WorkQueue::new(default_rate_limiter(&config));
        Self {
            uninstaller,
            feed,
            queue,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancelled once the uninstall has completed or its precondition failed
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until the uninstall completes or `stop` is cancelled
    ///
    /// A stop request lets the pass in progress finish and returns `Ok`.
    pub async fn run(&self, stop: CancellationToken) -> Result<()> {
        let started = Instant::now();

        let mut subscriptions = self.subscribe().await?;
        info!(watches = subscriptions.len(), "Waiting for caches to sync");
        if let Err(e) = wait_for_sync(&mut subscriptions, &stop).await {
            error!(error = %e, "Failed to sync caches");
            metrics::UNINSTALLER_HEALTH.set(0.0);
            return Err(e);
        }

        if let Err(e) = self.uninstaller.check_preconditions().await {
            error!(error = %e, "Uninstall precondition not met");
            metrics::UNINSTALLER_HEALTH.set(0.0);
            metrics::UNINSTALL_ERRORS
                .with_label_values(&[e.category()])
                .inc();
            self.shutdown.cancel();
            return Err(e);
        }
        metrics::GRACE_PERIOD_SECONDS.set(self.uninstaller.grace_period().as_secs_f64());

        info!("Uninstalling...");
        self.queue.add();

        let worker = Worker {
            uninstaller: self.uninstaller.clone(),
            queue: self.queue.clone(),
            shutdown: self.shutdown.clone(),
            config: self.config.clone(),
        };
        let worker = tokio::spawn(worker.run());

        let completed = tokio::select! {
            _ = self.shutdown.cancelled() => true,
            _ = stop.cancelled() => {
                info!("Stop requested, finishing the current pass");
                false
            }
        };

        self.queue.shut_down();
        if let Err(e) = worker.await {
            warn!(error = %e, "Worker task ended abnormally");
        }
        drop(subscriptions);

        let runtime = started.elapsed();
        if completed {
            info!(runtime_secs = runtime.as_secs_f64(), "Uninstallation completed");
        } else {
            info!(runtime_secs = runtime.as_secs_f64(), "Uninstallation stopped");
        }
        Ok(())
    }

    /// Subscribe to the driver workloads and to every installed Longhorn kind
    async fn subscribe(&self) -> Result<Vec<Subscription>> {
        let mut targets = vec![
            WatchTarget::CsiDrivers,
            WatchTarget::DaemonSets,
            WatchTarget::Deployments,
        ];
        for kind in ResourceKind::ALL {
            if self.feed.is_installed(kind).await? {
                targets.push(WatchTarget::Managed(kind));
            } else {
                debug!(kind = %kind, "Not installed, skipping watch");
            }
        }

        let subscriptions = targets
            .into_iter()
            .map(|target| {
                let queue = self.queue.clone();
                self.feed.subscribe(target, Arc::new(move || queue.add()))
            })
            .collect();
        Ok(subscriptions)
    }
}

async fn wait_for_sync(subscriptions: &mut [Subscription], stop: &CancellationToken) -> Result<()> {
    let synced = try_join_all(subscriptions.iter_mut().map(|s| s.wait_synced()));
    tokio::select! {
        result = synced => result.map(|_| ()),
        _ = stop.cancelled() => Err(Error::Sync("stopped before caches synced".to_string())),
    }
}

/// The single consumer of the work queue
struct Worker {
    uninstaller: Arc<Uninstaller>,
    queue: WorkQueue,
    shutdown: CancellationToken,
    config: ControllerConfig,
}

impl Worker {
    async fn run(self) {
        while self.process_next_work_item().await {}
        debug!("Worker stopped");
    }

    async fn process_next_work_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };
        debug!(key = key, "Processing");

        let started = Instant::now();
        let result = self.uninstaller.uninstall().await;
        let outcome = match &result {
            Ok(PassOutcome::Done) => "done",
            Ok(PassOutcome::Wait(_)) => "wait",
            Err(_) => "error",
        };
        metrics::UNINSTALL_PASSES.with_label_values(&[outcome]).inc();
        metrics::PASS_DURATION
            .with_label_values(&[outcome])
            .observe(started.elapsed().as_secs_f64());

        self.handle_result(result);
        self.queue.done();
        true
    }

    fn handle_result(&self, result: Result<PassOutcome>) {
        match result {
            Ok(PassOutcome::Done) => {
                self.queue.forget();
                self.shutdown.cancel();
            }
            Ok(PassOutcome::Wait(reason)) => {
                info!(reason = %reason, requeue = ?self.config.wait_requeue, "Waiting");
                self.queue.forget();
                self.queue.add_after(self.config.wait_requeue);
            }
            Err(e) => {
                metrics::UNINSTALL_ERRORS
                    .with_label_values(&[e.category()])
                    .inc();
                warn!(
                    error = %e,
                    retries = self.queue.num_requeues(),
                    "Failed to uninstall"
                );
                self.queue.add_rate_limited();
            }
        }
    }
}
