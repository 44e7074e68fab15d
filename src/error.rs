use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("No place found matching '{0}'")]
    RegionNotFound(String),
    #[error("Unsupported geometry type '{0}' returned for region")]
    UnsupportedGeometry(String),
    #[error("Unknown dataset: {0}")]
    UnknownDataset(String),
    #[error("Unknown product: {0}")]
    UnknownProduct(String),
    #[error("{product} is not offered at {resolution}m in the {dataset} dataset")]
    UnsupportedResolution {
        dataset: String,
        product: String,
        resolution: f64,
    },
    #[error("Coordinate ({0:.1}, {1:.1}) lies outside the National Grid")]
    OutsideNationalGrid(f64, f64),
    #[error("Invalid tile name: {0}")]
    InvalidTileName(String),
    #[error("Asset '{asset}' not found on tile {tile}")]
    MissingAsset { tile: String, asset: String },
}
