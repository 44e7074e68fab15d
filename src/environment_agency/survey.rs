//! Environment Agency LiDAR survey products, indexed on the 5km National Grid tiles the
//! survey download service delivers.
use crate::bng::{self, GRID_HEIGHT, GRID_WIDTH, TILE_SIZE};
use crate::catalog::{
    self, Dataset, Product, Selection, TileCatalog, TileInfo, BBOX_FIELD, DATASET_FIELD,
    DATA_ASSET, EPSG_FIELD, PRODUCT_FIELD, RESOLUTION_FIELD,
};
use crate::download_plan::{DownloadPlan, DownloadTask, FetchReport};
use crate::error::FetchError;
use crate::http::HttpObjOps;
use crate::region::Region;
use anyhow::Result;
use geo::{Intersects, Rect};
use serde_json::json;
use stac::{Asset, Item, ItemCollection};
use std::path::Path;
use toml;
use tracing::{debug, info};
use url::Url;

pub const DEFAULT_DOWNLOAD_URL: &str = "https://environment.data.gov.uk/ds/survey/get";

pub fn london_lidar_toml() -> toml::Table {
    toml::toml! {
        region = "London, England, United Kingdom"

        // 'composite' merges every survey flown over a tile, newest first
        dataset = "composite"

        product = "DTM"

        resolution = 1.0

        year = 2022

        folder = "lidar_london"
    }
}

/// Resolutions (metres) the service offers for a dataset and product.
pub fn offered_resolutions(dataset: Dataset, product: Product) -> &'static [f64] {
    match (dataset, product) {
        (Dataset::Composite, Product::Dtm | Product::Dsm) => &[0.25, 0.5, 1., 2.],
        (Dataset::Composite, Product::FirstReturnDsm) => &[1.],
        (Dataset::NationalLidarProgramme, _) => &[1.],
    }
}

fn check_offered(selection: &Selection) -> Result<()> {
    let offered = offered_resolutions(selection.dataset, selection.product);
    if !offered
        .iter()
        .any(|r| (r - selection.resolution).abs() < 1e-9)
    {
        return Err(FetchError::UnsupportedResolution {
            dataset: selection.dataset.to_string(),
            product: selection.product.to_string(),
            resolution: selection.resolution,
        }
        .into());
    }
    Ok(())
}

pub struct SurveyCatalog {
    download_url: String,
}

impl SurveyCatalog {
    pub fn new(download_url: &str) -> Self {
        Self {
            download_url: download_url.to_string(),
        }
    }

    fn tile_href(self: &Self, tile: &str, selection: &Selection) -> Result<String> {
        let mut url = Url::parse(&self.download_url)?;
        url.query_pairs_mut()
            .append_pair("grid", tile)
            .append_pair("dataset", selection.dataset.as_str())
            .append_pair("product", &selection.product_code());
        Ok(url.into())
    }

    fn tile_item(self: &Self, tile_box: &Rect<f64>, selection: &Selection) -> Result<Item> {
        let name = bng::tile_name(tile_box.min().x, tile_box.min().y)?;
        let href = self.tile_href(&name, selection)?;

        let mut item = Item::new(&name);
        item.collection = Some(selection.dataset.as_str().to_string());
        let fields = &mut item.properties.additional_fields;
        fields.insert(DATASET_FIELD.to_string(), json!(selection.dataset.as_str()));
        fields.insert(PRODUCT_FIELD.to_string(), json!(selection.product.as_str()));
        fields.insert(RESOLUTION_FIELD.to_string(), json!(selection.resolution));
        fields.insert(EPSG_FIELD.to_string(), json!(bng::EPSG));
        fields.insert(BBOX_FIELD.to_string(), json!(catalog::bbox_array(tile_box)));
        item.assets.insert(DATA_ASSET.to_string(), Asset::new(href));
        Ok(item)
    }
}

impl TileCatalog for SurveyCatalog {
    /// Tiles come back south to north, then west to east.
    async fn list_tiles(
        self: &Self,
        region: &Region,
        selection: &Selection,
    ) -> Result<ItemCollection> {
        check_offered(selection)?;

        let mut items = vec![];
        let bbox = match region.bbox() {
            Some(bbox) if bbox.intersects(&bng::grid_extent()) => bbox,
            _ => {
                info!(region = %region.name, "Region does not cover the National Grid");
                return Ok(ItemCollection::from(items));
            }
        };

        let max_col = (GRID_WIDTH / TILE_SIZE) as i64 - 1;
        let max_row = (GRID_HEIGHT / TILE_SIZE) as i64 - 1;
        let cols = ((bbox.min().x / TILE_SIZE).floor() as i64).max(0)
            ..=((bbox.max().x / TILE_SIZE).floor() as i64).min(max_col);
        let rows = ((bbox.min().y / TILE_SIZE).floor() as i64).max(0)
            ..=((bbox.max().y / TILE_SIZE).floor() as i64).min(max_row);

        for row in rows {
            for col in cols.clone() {
                let tile_box = bng::tile_rect(col as f64 * TILE_SIZE, row as f64 * TILE_SIZE);
                if region.geometry.intersects(&tile_box) {
                    items.push(self.tile_item(&tile_box, selection)?);
                }
            }
        }

        info!(
            region = %region.name,
            product = %selection.product_code(),
            tiles = items.len(),
            "Listed tiles"
        );
        Ok(ItemCollection::from(items))
    }
}

pub fn generate_download_plan(
    tile_set: &ItemCollection,
    folder: &Path,
    selection: &Selection,
    year: Option<u16>,
) -> Result<DownloadPlan> {
    let mut tasks: Vec<DownloadTask> = vec![];

    for item in tile_set.items.iter() {
        let info = TileInfo::from_item(item)?;
        if !selection.matches(&info) {
            debug!(tile = %info.id, "Tile was listed for another product");
            continue;
        }
        let url = with_year(&info.href, year)?;
        tasks.push(DownloadTask::new(&info.id, &url, folder));
    }
    Ok(DownloadPlan::new(tasks))
}

fn with_year(href: &str, year: Option<u16>) -> Result<String> {
    let mut url = Url::parse(href)?;
    if let Some(year) = year {
        url.query_pairs_mut().append_pair("year", &year.to_string());
    }
    Ok(url.into())
}

/// Downloads every tile of the set matching the selection into `folder`, one at a time.
pub async fn fetch_tiles(
    provider: &impl HttpObjOps,
    tile_set: &ItemCollection,
    folder: &Path,
    selection: &Selection,
    year: Option<u16>,
) -> Result<FetchReport> {
    let plan = generate_download_plan(tile_set, folder, selection, year)?;
    if plan.is_empty() {
        info!("No tiles to fetch");
    }
    plan.execute(provider).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download_plan::tests::{zip_bytes, TIFF_BYTES};
    use crate::environment_agency::Provider;
    use geo::{coord, LineString, MultiPolygon, Polygon};
    use std::fs;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_URL: &str = "https://example.com/ds/survey/get";

    fn dtm_1m() -> Selection {
        Selection::new(Dataset::Composite, Product::Dtm, 1.0)
    }

    fn rect_region(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Region {
        let polygon = Rect::new(coord! { x: min_x, y: min_y }, coord! { x: max_x, y: max_y });
        Region::new("test", MultiPolygon::new(vec![polygon.to_polygon()]))
    }

    fn ids(tiles: &ItemCollection) -> Vec<&str> {
        tiles.items.iter().map(|i| i.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_list_tiles_rectangle() {
        let catalog = SurveyCatalog::new(TEST_URL);
        let region = rect_region(528_000., 178_000., 536_000., 183_000.);
        let tiles = catalog.list_tiles(&region, &dtm_1m()).await.unwrap();

        assert_eq!(
            ids(&tiles),
            vec!["TQ27ne", "TQ37nw", "TQ37ne", "TQ28se", "TQ38sw", "TQ38se"]
        );

        let info = TileInfo::from_item(&tiles.items[0]).unwrap();
        assert_eq!(info.dataset.as_deref(), Some("composite"));
        assert_eq!(info.product.as_deref(), Some("DTM"));
        assert_eq!(info.resolution, Some(1.0));
        assert_eq!(info.bbox, Some(bng::tile_rect(525_000., 175_000.)));
        assert_eq!(
            info.href,
            "https://example.com/ds/survey/get?grid=TQ27ne&dataset=composite&product=DTM_1m"
        );
    }

    #[tokio::test]
    async fn test_listed_tiles_intersect_region() {
        // Hypotenuse along x + y = 618km: of the 16 tiles in the bounding box, only those
        // with a lower-left corner below the line touch the triangle
        let triangle = Polygon::new(
            LineString::from(vec![
                (501_000., 101_000.),
                (517_000., 101_000.),
                (501_000., 117_000.),
            ]),
            vec![],
        );
        let region = Region::new("triangle", MultiPolygon::new(vec![triangle]));
        let catalog = SurveyCatalog::new(TEST_URL);
        let tiles = catalog.list_tiles(&region, &dtm_1m()).await.unwrap();

        assert_eq!(tiles.items.len(), 10);
        for item in tiles.items.iter() {
            let bbox = TileInfo::from_item(item).unwrap().bbox.unwrap();
            assert!(region.geometry.intersects(&bbox), "{}", item.id);
        }
    }

    #[tokio::test]
    async fn test_tiles_inside_a_hole_are_left_out() {
        // 19km square over 16 tiles with a 12km hole: the four tiles wholly inside the hole go
        let square = |x: f64, y: f64, size: f64| {
            LineString::from(vec![
                (x, y),
                (x + size, y),
                (x + size, y + size),
                (x, y + size),
                (x, y),
            ])
        };
        let outer = square(500_500., 100_500., 19_000.);
        let hole = square(504_000., 104_000., 12_000.);
        let region = Region::new("ring", MultiPolygon::new(vec![Polygon::new(outer, vec![hole])]));

        let catalog = SurveyCatalog::new(TEST_URL);
        let tiles = catalog.list_tiles(&region, &dtm_1m()).await.unwrap();
        assert_eq!(tiles.items.len(), 12);

        let hidden = bng::tile_name(505_000., 105_000.).unwrap();
        assert!(!ids(&tiles).contains(&hidden.as_str()), "{hidden}");
        let edge = bng::tile_name(500_000., 100_000.).unwrap();
        assert!(ids(&tiles).contains(&edge.as_str()), "{edge}");
    }

    #[tokio::test]
    async fn test_region_off_the_grid() {
        let catalog = SurveyCatalog::new(TEST_URL);
        let region = rect_region(-50_000., -50_000., -10_000., -10_000.);
        let tiles = catalog.list_tiles(&region, &dtm_1m()).await.unwrap();
        assert!(tiles.items.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_resolution() {
        let catalog = SurveyCatalog::new(TEST_URL);
        let region = rect_region(528_000., 178_000., 536_000., 183_000.);
        let selection = Selection::new(Dataset::Composite, Product::FirstReturnDsm, 2.0);
        let err = catalog.list_tiles(&region, &selection).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FetchError>(),
            Some(FetchError::UnsupportedResolution { .. })
        ));
    }

    #[tokio::test]
    async fn test_generate_download_plan() {
        let catalog = SurveyCatalog::new(TEST_URL);
        let region = rect_region(531_000., 176_000., 534_000., 179_000.);
        let tiles = catalog.list_tiles(&region, &dtm_1m()).await.unwrap();

        let folder = Path::new("lidar_london");
        let plan = generate_download_plan(&tiles, folder, &dtm_1m(), Some(2022)).unwrap();
        assert_eq!(plan.tasks().len(), 1);
        let task = &plan.tasks()[0];
        assert_eq!(task.tile_id(), "TQ37nw");
        assert!(task.url().ends_with("&product=DTM_1m&year=2022"), "{}", task.url());
        assert_eq!(task.output(), Path::new("lidar_london/TQ37nw"));

        // Tiles listed for another product are left out
        let dsm = Selection::new(Dataset::Composite, Product::Dsm, 1.0);
        let plan = generate_download_plan(&tiles, folder, &dsm, Some(2022)).unwrap();
        assert!(plan.is_empty());

        let plan = generate_download_plan(&tiles, folder, &dtm_1m(), None).unwrap();
        assert!(!plan.tasks()[0].url().contains("year="));
    }

    async fn mount_tile(server: &MockServer, tile: &str, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path("/ds/survey/get"))
            .and(query_param("grid", tile))
            .and(query_param("product", "DTM_1m"))
            .and(query_param("year", "2022"))
            .respond_with(response)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_fetch_tiles() {
        let server = MockServer::start().await;
        let zip = zip_bytes(&[
            ("TQ3075_DTM_1m.tif", TIFF_BYTES),
            ("TQ3076_DTM_1m.tif", TIFF_BYTES),
            ("licence.txt", b"OGL"),
        ]);
        mount_tile(
            &server,
            "TQ37nw",
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/zip")
                .set_body_bytes(zip),
        )
        .await;
        mount_tile(&server, "TQ37ne", ResponseTemplate::new(404)).await;
        mount_tile(
            &server,
            "TQ38sw",
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/tiff")
                .set_body_bytes(TIFF_BYTES),
        )
        .await;
        mount_tile(
            &server,
            "TQ38se",
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string("<html>No survey data for this tile</html>"),
        )
        .await;

        let catalog = SurveyCatalog::new(&format!("{}/ds/survey/get", server.uri()));
        let region = rect_region(530_500., 175_500., 539_500., 184_500.);
        let tiles = catalog.list_tiles(&region, &dtm_1m()).await.unwrap();
        assert_eq!(ids(&tiles), vec!["TQ37nw", "TQ37ne", "TQ38sw", "TQ38se"]);

        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("lidar_london");
        let provider = Provider::with_user_agent("lidar-fetch-test").unwrap();

        let report = fetch_tiles(&provider, &tiles, &folder, &dtm_1m(), Some(2022))
            .await
            .unwrap();
        assert_eq!(report.downloaded, vec!["TQ37nw", "TQ38sw"]);
        assert_eq!(report.unavailable, vec!["TQ37ne", "TQ38se"]);
        assert!(report.skipped.is_empty());

        assert!(folder.join("TQ37nw/TQ3075_DTM_1m.tif").exists());
        assert!(folder.join("TQ37nw/TQ3076_DTM_1m.tif").exists());
        assert!(!folder.join("TQ37nw/licence.txt").exists());
        assert_eq!(fs::read(folder.join("TQ38sw/TQ38sw.tif")).unwrap(), TIFF_BYTES);
        assert!(!folder.join("TQ37ne").exists());
        assert!(!folder.join("TQ38se").exists());

        let entries = |folder: &Path| {
            let mut names = fs::read_dir(folder)
                .unwrap()
                .map(|e| e.unwrap().file_name())
                .collect::<Vec<_>>();
            names.sort();
            names
        };
        let first_run = entries(folder.as_path());

        // Running again leaves the folder as it was
        let report = fetch_tiles(&provider, &tiles, &folder, &dtm_1m(), Some(2022))
            .await
            .unwrap();
        assert!(report.downloaded.is_empty());
        assert_eq!(report.skipped, vec!["TQ37nw", "TQ38sw"]);
        assert_eq!(entries(folder.as_path()), first_run);
        assert_eq!(entries(folder.join("TQ37nw").as_path()).len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_empty_tile_set() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("lidar_london");
        let provider = Provider::with_user_agent("lidar-fetch-test").unwrap();

        let tiles = ItemCollection::from(Vec::<Item>::new());
        let report = fetch_tiles(&provider, &tiles, &folder, &dtm_1m(), Some(2022))
            .await
            .unwrap();
        assert_eq!(report, FetchReport::default());
        assert!(!folder.exists());
    }
}
