//! Viewport command - resolve airspaces for a bounding box.

use std::io::{self, Write};

use airspace_cache::{
    AirspaceCacheConfig, AirspaceCacheManager, AirspaceFetcher, BoundingBox, HttpAirspaceFetcher,
    ViewportResult,
};
use tracing::warn;

use super::common::OfflineFetcher;
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the viewport command.
pub struct ViewportArgs {
    pub bounds: BoundingBox,
    pub zoom: f64,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub offline: bool,
    pub json: bool,
}

pub async fn run(mut runner: CliRunner, args: ViewportArgs) -> Result<(), CliError> {
    runner.log_startup("viewport");
    if !(0.0..=24.0).contains(&args.zoom) {
        return Err(CliError::InvalidArgument(format!(
            "zoom {} is outside 0-24",
            args.zoom
        )));
    }

    let remote = &mut runner.settings_mut().remote;
    if args.endpoint.is_some() {
        remote.endpoint = args.endpoint.clone();
    }
    if args.api_key.is_some() {
        remote.api_key = args.api_key.clone();
    }

    let settings = runner.settings().clone();
    if args.offline || settings.remote.endpoint.is_none() {
        if !args.offline {
            warn!("No remote endpoint configured, serving cached data only");
            eprintln!("No remote endpoint configured; serving cached data only.");
        }
        resolve(settings, OfflineFetcher, &args).await
    } else {
        let fetcher = HttpAirspaceFetcher::from_config(&settings.remote)?;
        resolve(settings, fetcher, &args).await
    }
}

async fn resolve<F: AirspaceFetcher>(
    settings: AirspaceCacheConfig,
    fetcher: F,
    args: &ViewportArgs,
) -> Result<(), CliError> {
    let cache = AirspaceCacheManager::open(settings, fetcher).await?;
    let result = cache.get_airspaces_for_viewport(args.bounds, args.zoom).await;

    if args.json {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        serde_json::to_writer_pretty(&mut out, &json_report(&result))
            .map_err(|e| CliError::Output(e.to_string()))?;
        writeln!(out).map_err(|e| CliError::Output(e.to_string()))?;
    } else {
        print_result(&args.bounds, args.zoom, &result);
        println!();
        println!("{}", cache.statistics().summary());
    }

    cache.dispose().await?;
    Ok(())
}

fn json_report(result: &ViewportResult) -> serde_json::Value {
    let tiles: Vec<_> = result
        .tile_status
        .iter()
        .map(|(key, status)| serde_json::json!({ "tile": key.to_string(), "status": status.to_string() }))
        .collect();
    serde_json::json!({
        "complete": result.is_complete(),
        "tiles": tiles,
        "airspaces": result.geometries.iter().map(|g| g.as_ref()).collect::<Vec<_>>(),
    })
}

fn print_result(bounds: &BoundingBox, zoom: f64, result: &ViewportResult) {
    println!("Viewport {} at zoom {}", bounds, zoom);
    let counts = result
        .status_counts()
        .into_iter()
        .map(|(label, n)| format!("{} {}", n, label))
        .collect::<Vec<_>>()
        .join(", ");
    println!("  Tiles: {} ({})", result.tile_status.len(), counts);

    for (key, status) in &result.tile_status {
        if !status.is_success() {
            println!("  ! {} {}", key, status);
        }
    }

    println!("  Airspaces: {}", result.geometries.len());
    for airspace in &result.geometries {
        println!(
            "    {:<16} {:<10} {:>5} vertices  {}",
            airspace.id,
            format!("{:?}", airspace.class),
            airspace.vertex_count(),
            airspace.name
        );
    }
}
