//! Cache management CLI commands.

use std::sync::Arc;

use airspace_cache::config::format_size;
use airspace_cache::{ColdCache, SystemClock};

use crate::error::CliError;
use crate::runner::CliRunner;

/// Cache management actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAction {
    Stats,
    Clear,
}

pub async fn run(runner: CliRunner, action: CacheAction) -> Result<(), CliError> {
    let settings = runner.settings();
    let cold = ColdCache::open(&settings.cold, Arc::new(SystemClock)).await?;
    let dir = settings.cold.directory.display();

    match action {
        CacheAction::Stats => {
            runner.log_startup("cache stats");
            let stats = cold.stats();
            println!("Airspace cache: {}", dir);
            println!("  Geometries:    {}", stats.geometry_entries);
            println!("  Tiles:         {}", stats.tile_entries);
            println!("  Stored size:   {}", format_size(stats.stored_bytes));
            println!("  Content size:  {}", format_size(stats.content_bytes));
            println!("  Journal:       {} records", stats.journal_records);
            println!("  Fragmentation: {:.1}%", stats.fragmentation * 100.0);
            if stats.corruptions > 0 {
                println!("  Corrupt entries removed: {}", stats.corruptions);
            }
        }
        CacheAction::Clear => {
            runner.log_startup("cache clear");
            let before = cold.stats();
            println!("Clearing airspace cache at: {}", dir);
            cold.clear().await?;
            println!(
                "Removed {} geometries and {} tiles, freed {}",
                before.geometry_entries,
                before.tile_entries,
                format_size(before.stored_bytes)
            );
        }
    }

    cold.flush().await?;
    Ok(())
}
