//! Background cache maintenance.
//!
//! Each cycle:
//! 1. deletes expired cold entries in batches
//! 2. pre-warms the hot tier with frequently read cold geometries
//! 3. compacts the cold store once its journal fragmentation passes the
//!    configured threshold
//!
//! Work is split into batches with a yield between them so foreground
//! viewport lookups are never stalled.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CompactionReport, SweepReport};
use crate::config::MaintenanceConfig;
use crate::fetch::AirspaceFetcher;
use crate::manager::AirspaceCacheManager;

/// Summary of one maintenance cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaintenanceReport {
    pub sweep: SweepReport,
    pub prewarmed: usize,
    /// Fragmentation observed before any compaction.
    pub fragmentation: f64,
    pub compaction: Option<CompactionReport>,
    pub errors: usize,
}

/// Periodic maintenance over an [`AirspaceCacheManager`].
pub struct MaintenanceScheduler<F> {
    manager: AirspaceCacheManager<F>,
    config: MaintenanceConfig,
}

impl<F: AirspaceFetcher> MaintenanceScheduler<F> {
    pub fn new(manager: AirspaceCacheManager<F>) -> Self {
        let config = manager.config().maintenance.clone();
        Self { manager, config }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    /// Run one maintenance cycle.
    pub async fn run_once(&self) -> MaintenanceReport {
        let cold = self.manager.cold();
        let mut report = MaintenanceReport::default();

        match cold.delete_expired(self.config.batch_size).await {
            Ok(sweep) => report.sweep = sweep,
            Err(e) => {
                warn!(error = %e, "Expired entry sweep failed");
                report.errors += 1;
            }
        }

        report.prewarmed = self.prewarm().await;

        report.fragmentation = cold.fragmentation();
        if report.fragmentation > self.config.compaction_threshold {
            match cold.compact().await {
                Ok(compaction) => report.compaction = Some(compaction),
                Err(e) => {
                    warn!(error = %e, "Cold cache compaction failed");
                    report.errors += 1;
                }
            }
        }

        info!(
            expired_geometries = report.sweep.geometries_removed,
            expired_tiles = report.sweep.tiles_removed,
            prewarmed = report.prewarmed,
            fragmentation = format!("{:.1}%", report.fragmentation * 100.0),
            compacted = report.compaction.is_some(),
            errors = report.errors,
            "Maintenance cycle complete"
        );
        report
    }

    /// Promote frequently read cold geometries into the hot tier.
    async fn prewarm(&self) -> usize {
        let cold = self.manager.cold();
        let policy = self.manager.promotion_policy();
        let candidates: Vec<_> = cold
            .access_statistics()
            .into_iter()
            .filter(|r| !r.expired && policy.worth_inspecting(r.meta.access_count))
            .filter(|r| !self.manager.hot_contains_geometry(&r.id))
            .take(self.config.prewarm_limit)
            .collect();

        let mut promoted = 0;
        for batch in candidates.chunks(self.config.batch_size.max(1)) {
            for record in batch {
                let Some(geometry) = cold.peek_geometry(&record.id).await else {
                    continue;
                };
                if self.manager.promote_from_cold(geometry) {
                    promoted += 1;
                }
            }
            tokio::task::yield_now().await;
        }

        if promoted > 0 {
            debug!(promoted, "Pre-warmed hot tier");
        }
        promoted
    }

    /// Run cycles every interval until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            batch_size = self.config.batch_size,
            "Maintenance scheduler starting"
        );

        let mut interval = tokio::time::interval(self.config.interval);
        // Skip the first immediate tick
        interval.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Maintenance scheduler shutting down");
                    break;
                }

                _ = interval.tick() => {
                    self.run_once().await;
                }
            }
        }
    }
}
