//! Maintain command - expire, pre-warm and compact the cache.

use airspace_cache::config::format_size;
use airspace_cache::{AirspaceCacheManager, MaintenanceReport, MaintenanceScheduler};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::common::OfflineFetcher;
use crate::error::CliError;
use crate::runner::CliRunner;

pub async fn run(runner: CliRunner, once: bool) -> Result<(), CliError> {
    runner.log_startup("maintain");
    let cache = AirspaceCacheManager::open(runner.settings().clone(), OfflineFetcher).await?;
    let scheduler = MaintenanceScheduler::new(cache.clone());

    if once {
        print_report(&scheduler.run_once().await);
    } else {
        let shutdown = CancellationToken::new();
        let on_signal = shutdown.clone();
        ctrlc::set_handler(move || on_signal.cancel())
            .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

        println!(
            "Running maintenance every {}s. Press Ctrl+C to stop.",
            runner.settings().maintenance.interval.as_secs()
        );
        scheduler.run(shutdown).await;
        info!("Maintenance stopped by user");
    }

    let stats = cache.cold().stats();
    println!(
        "Cache now holds {} geometries and {} tiles ({})",
        stats.geometry_entries,
        stats.tile_entries,
        format_size(stats.stored_bytes)
    );
    cache.dispose().await?;
    Ok(())
}

fn print_report(report: &MaintenanceReport) {
    println!("Maintenance cycle:");
    println!(
        "  Expired:       {} geometries, {} tiles",
        report.sweep.geometries_removed, report.sweep.tiles_removed
    );
    println!("  Pre-warmed:    {}", report.prewarmed);
    println!("  Fragmentation: {:.1}%", report.fragmentation * 100.0);
    if let Some(compaction) = &report.compaction {
        println!("  Compaction:    {:?}", compaction);
    }
    if report.errors > 0 {
        println!("  Errors:        {} (see log)", report.errors);
    }
}
