//! Tile catalog seam. A catalog answers "which tiles of this product cover this region" with a
//! STAC `ItemCollection`; the download step reads back only what `TileInfo` extracts.
use crate::bng;
use crate::error::FetchError;
use crate::region::Region;
use anyhow::{anyhow, Result};
use geo::{coord, Rect};
use serde_json::Value;
use stac::{Item, ItemCollection};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Asset key holding the download link of each tile.
pub const DATA_ASSET: &str = "data";

pub const DATASET_FIELD: &str = "dataset";
pub const PRODUCT_FIELD: &str = "product";
pub const RESOLUTION_FIELD: &str = "resolution";
pub const EPSG_FIELD: &str = "proj:epsg";
pub const BBOX_FIELD: &str = "proj:bbox";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dataset {
    Composite,
    NationalLidarProgramme,
}

impl Dataset {
    pub fn as_str(self: &Self) -> &'static str {
        match self {
            Self::Composite => "composite",
            Self::NationalLidarProgramme => "national-lidar-programme",
        }
    }
}

impl FromStr for Dataset {
    type Err = FetchError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "composite" => Ok(Self::Composite),
            "national-lidar-programme" | "nlp" => Ok(Self::NationalLidarProgramme),
            _ => Err(FetchError::UnknownDataset(s.to_string())),
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Product {
    /// Digital terrain model, bare ground
    Dtm,
    /// Digital surface model, last return
    Dsm,
    /// First return digital surface model
    FirstReturnDsm,
}

impl Product {
    pub fn as_str(self: &Self) -> &'static str {
        match self {
            Self::Dtm => "DTM",
            Self::Dsm => "DSM",
            Self::FirstReturnDsm => "FZ_DSM",
        }
    }
}

impl FromStr for Product {
    type Err = FetchError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DTM" => Ok(Self::Dtm),
            "DSM" | "LZ_DSM" => Ok(Self::Dsm),
            "FZ_DSM" | "FIRST_RETURN_DSM" => Ok(Self::FirstReturnDsm),
            _ => Err(FetchError::UnknownProduct(s.to_string())),
        }
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to look for: the catalog filter shared by listing and downloading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection {
    pub dataset: Dataset,
    pub product: Product,
    /// Ground sample distance in metres
    pub resolution: f64,
}

impl Selection {
    pub fn new(dataset: Dataset, product: Product, resolution: f64) -> Self {
        Self {
            dataset,
            product,
            resolution,
        }
    }

    /// Resolution as the EA writes it in product codes: `1m`, `2m`, `50cm`.
    pub fn resolution_label(self: &Self) -> String {
        if self.resolution < 1. {
            format!("{}cm", (self.resolution * 100.).round())
        } else {
            format!("{}m", self.resolution)
        }
    }

    /// Product code used by the download service, e.g. `DTM_1m`.
    pub fn product_code(self: &Self) -> String {
        format!("{}_{}", self.product.as_str(), self.resolution_label())
    }

    /// True when the item was listed for this same dataset, product and resolution. Items
    /// without the properties are accepted.
    pub fn matches(self: &Self, info: &TileInfo) -> bool {
        let dataset = info.dataset.as_deref().map_or(true, |d| d == self.dataset.as_str());
        let product = info.product.as_deref().map_or(true, |p| p == self.product.as_str());
        let resolution = info
            .resolution
            .map_or(true, |r| (r - self.resolution).abs() < 1e-9);
        dataset && product && resolution
    }
}

pub trait TileCatalog {
    async fn list_tiles(self: &Self, region: &Region, selection: &Selection)
        -> Result<ItemCollection>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct TileInfo {
    pub id: String,
    pub href: String,
    pub dataset: Option<String>,
    pub product: Option<String>,
    pub resolution: Option<f64>,
    pub bbox: Option<Rect<f64>>,
}

impl TileInfo {
    pub fn from_item(item: &Item) -> Result<Self> {
        let asset = item
            .assets
            .get(DATA_ASSET)
            .ok_or_else(|| FetchError::MissingAsset {
                tile: item.id.clone(),
                asset: DATA_ASSET.to_string(),
            })?;
        let fields = &item.properties.additional_fields;
        Ok(Self {
            id: item.id.to_owned(),
            href: asset.href.to_owned(),
            dataset: fields.get(DATASET_FIELD).and_then(Value::as_str).map(str::to_owned),
            product: fields.get(PRODUCT_FIELD).and_then(Value::as_str).map(str::to_owned),
            resolution: fields.get(RESOLUTION_FIELD).and_then(Value::as_f64),
            bbox: Self::extract_bbox(item),
        })
    }

    /// Prefers the recorded projected bbox, falling back to decoding the tile name.
    fn extract_bbox(item: &Item) -> Option<Rect<f64>> {
        let recorded = item
            .properties
            .additional_fields
            .get(BBOX_FIELD)
            .and_then(Value::as_array)
            .and_then(|values| {
                let v = values.iter().map(Value::as_f64).collect::<Option<Vec<_>>>()?;
                match v.as_slice() {
                    [min_x, min_y, max_x, max_y] => Some(Rect::new(
                        coord! { x: *min_x, y: *min_y },
                        coord! { x: *max_x, y: *max_y },
                    )),
                    _ => None,
                }
            });
        recorded.or_else(|| bng::tile_bounds(&item.id).ok())
    }
}

/// `[min_x, min_y, max_x, max_y]`, the layout of `proj:bbox`.
pub fn bbox_array(rect: &Rect<f64>) -> [f64; 4] {
    [rect.min().x, rect.min().y, rect.max().x, rect.max().y]
}

pub fn write_tile_set<P: AsRef<Path>>(path: P, tiles: &ItemCollection) -> Result<()> {
    let content = serde_json::to_string_pretty(tiles)?;
    fs::write(path, content)?;
    Ok(())
}

pub fn read_tile_set<P: AsRef<Path>>(path: P) -> Result<ItemCollection> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .map_err(|e| anyhow!("Unable to read tile set {}: {e}", path.display()))?;
    let tiles: ItemCollection = serde_json::from_str(&content)?;
    Ok(tiles)
}
