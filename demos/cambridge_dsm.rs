use anyhow::Result;
use std::path::PathBuf;

extern crate lidar_fetch;
use lidar_fetch::catalog::{Dataset, Product, Selection, TileCatalog};
use lidar_fetch::environment_agency::survey::{self, SurveyCatalog};
use lidar_fetch::environment_agency::Provider;
use lidar_fetch::region::{Nominatim, RegionResolver, NOMINATIM_URL};

#[tokio::main]
async fn main() -> Result<()> {
    let folder = PathBuf::from("./outputs/cambridge");
    let user_agent = "lidar-fetch-demo/0.1";

    let resolver = Nominatim::with_user_agent(NOMINATIM_URL, user_agent)?;
    let region = resolver.resolve_region("Cambridge, England").await?;

    let selection = Selection::new(Dataset::Composite, Product::Dsm, 2.0);
    let catalog = SurveyCatalog::new(survey::DEFAULT_DOWNLOAD_URL);
    let tiles = catalog.list_tiles(&region, &selection).await?;

    let plan = survey::generate_download_plan(&tiles, &folder, &selection, None)?;
    std::fs::create_dir_all(&folder)?;
    let _ = plan.write(folder.join("download_plan.json"))?;

    let provider = Provider::with_user_agent(user_agent)?;
    let report = plan.execute(&provider).await?;
    println!("{report:#?}");

    Ok(())
}
