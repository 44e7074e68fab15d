mod nominatim;
pub use nominatim::{Nominatim, DEFAULT_URL as NOMINATIM_URL};

use crate::bng;
use anyhow::Result;
use geo::{BoundingRect, MultiPolygon, Rect};

/// A named area resolved to National Grid geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub name: String,
    pub epsg: u32,
    pub geometry: MultiPolygon<f64>,
}

impl Region {
    pub fn new(name: &str, geometry: MultiPolygon<f64>) -> Self {
        Self {
            name: name.to_string(),
            epsg: bng::EPSG,
            geometry,
        }
    }

    pub fn bbox(self: &Self) -> Option<Rect<f64>> {
        self.geometry.bounding_rect()
    }
}

pub trait RegionResolver {
    async fn resolve_region(self: &Self, name: &str) -> Result<Region>;
}
