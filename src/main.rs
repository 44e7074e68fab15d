use anyhow::Result;
use clap::Parser;
use lidar_fetch::catalog::{self, TileCatalog};
use lidar_fetch::environment_agency::survey::{self, SurveyCatalog};
use lidar_fetch::environment_agency::Provider;
use lidar_fetch::region::{Nominatim, RegionResolver};
use lidar_fetch::request::FetchRequest;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Download Environment Agency LiDAR tiles covering a named place.
///
/// Without arguments, fetches the 2022 1m composite DTM for London into ./lidar_london.
#[derive(Parser, Debug)]
#[command(name = "lidar-fetch", version)]
struct Cli {
    /// TOML request describing region, product and destination folder
    #[arg(long)]
    request: Option<PathBuf>,

    /// Write the default request to this path and exit
    #[arg(long)]
    write_template: Option<PathBuf>,

    /// Save the listed tiles as a STAC item collection
    #[arg(long)]
    tiles: Option<PathBuf>,

    /// Download a previously saved tile set instead of resolving the region
    #[arg(long, conflicts_with = "tiles")]
    from_tiles: Option<PathBuf>,

    /// Save the download plan as JSON
    #[arg(long)]
    plan: Option<PathBuf>,

    /// Stop before downloading anything
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Some(path) = cli.write_template {
        FetchRequest::from_template(&survey::london_lidar_toml())?.write(&path)?;
        info!(path = %path.display(), "Wrote request template");
        return Ok(());
    }

    let request = match cli.request {
        Some(path) => FetchRequest::read(path)?,
        None => FetchRequest::from_template(&survey::london_lidar_toml())?,
    };
    let selection = request.selection()?;

    let tiles = match cli.from_tiles {
        Some(path) => catalog::read_tile_set(path)?,
        None => {
            let resolver =
                Nominatim::with_user_agent(&request.geocoder_url, &request.user_agent)?;
            let region = resolver.resolve_region(&request.region).await?;

            let catalog = SurveyCatalog::new(&request.download_url);
            catalog.list_tiles(&region, &selection).await?
        }
    };
    if let Some(path) = cli.tiles {
        catalog::write_tile_set(path, &tiles)?;
    }
    if tiles.items.is_empty() {
        warn!(region = %request.region, "No tiles found");
        return Ok(());
    }

    let plan =
        survey::generate_download_plan(&tiles, &request.folder, &selection, request.year)?;
    if let Some(path) = cli.plan {
        plan.write(path)?;
    }
    if cli.dry_run {
        info!(tasks = plan.tasks().len(), "Dry run, nothing downloaded");
        return Ok(());
    }

    let provider = Provider::with_user_agent(&request.user_agent)?;
    let report = plan.execute(&provider).await?;
    info!(
        downloaded = report.downloaded.len(),
        skipped = report.skipped.len(),
        unavailable = report.unavailable.len(),
        folder = %request.folder.display(),
        "Finished"
    );

    Ok(())
}
