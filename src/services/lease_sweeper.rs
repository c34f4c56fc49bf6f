//! Lease sweeper: reclaims tasks whose worker stopped heartbeating.
//!
//! A task in a leased status whose heartbeat is older than the lease expiry
//! is failed with `lease_expired`. Lease failures never spawn fix children.

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domain::errors::{DomainResult, ErrorKind};
use crate::domain::models::config::LeaseConfig;
use crate::domain::ports::{Clock, TaskRepository};
use crate::services::event_bus::EventBus;
use crate::services::force_fail;

pub struct LeaseSweeper {
    tasks: Arc<dyn TaskRepository>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    config: LeaseConfig,
    shutdown: CancellationToken,
}

impl LeaseSweeper {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        config: LeaseConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            tasks,
            bus,
            clock,
            config,
            shutdown,
        }
    }

    /// Periodic sweep loop; runs until shutdown.
    pub async fn run(self) {
        info!(
            period_secs = self.config.sweep_interval_secs,
            lease_secs = self.config.expiry_secs,
            "lease sweeper started"
        );
        let period = Duration::from_secs(self.config.sweep_interval_secs);

        loop {
            tokio::select! {
                () = tokio::time::sleep(period) => {}
                () = self.shutdown.cancelled() => {
                    info!("lease sweeper stopping");
                    return;
                }
            }

            match self.sweep().await {
                Ok(0) => {}
                Ok(reclaimed) => warn!(reclaimed, "reclaimed expired leases"),
                Err(e) => error!(error = %e, "lease sweep failed"),
            }
        }
    }

    /// One sweep pass. Returns the number of reclaimed tasks.
    pub async fn sweep(&self) -> DomainResult<usize> {
        let expiry = ChronoDuration::seconds(
            i64::try_from(self.config.expiry_secs).unwrap_or(i64::MAX),
        );
        let cutoff = self.clock.now() - expiry;

        let expired = self.tasks.find_expired_leases(cutoff).await?;
        let mut reclaimed = 0;

        for task in expired {
            warn!(
                task_id = %task.id,
                status = %task.status,
                "lease expired, reclaiming task"
            );
            if force_fail(
                self.tasks.as_ref(),
                &self.bus,
                self.clock.as_ref(),
                task,
                ErrorKind::LeaseExpired,
                "lease expired",
            )
            .await?
            {
                reclaimed += 1;
            }
        }

        Ok(reclaimed)
    }

    /// Startup reconciliation: a freshly booted process has no live workers,
    /// so any task still in a leased status is an orphan from a previous
    /// process and is failed before the API starts accepting writes.
    pub async fn reconcile_startup(&self) -> DomainResult<usize> {
        // Far-future cutoff catches every leased task regardless of age.
        let cutoff = self.clock.now() + ChronoDuration::days(3650);
        let orphaned = self.tasks.find_expired_leases(cutoff).await?;
        let mut reclaimed = 0;

        for task in orphaned {
            warn!(task_id = %task.id, "orphaned task from previous process, failing");
            if force_fail(
                self.tasks.as_ref(),
                &self.bus,
                self.clock.as_ref(),
                task,
                ErrorKind::LeaseExpired,
                "lease expired",
            )
            .await?
            {
                reclaimed += 1;
            }
        }

        if reclaimed > 0 {
            info!(reclaimed, "startup reconciliation complete");
        }
        Ok(reclaimed)
    }
}
