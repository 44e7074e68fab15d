use super::{Region, RegionResolver};
use crate::bng;
use crate::error::FetchError;
use crate::http;
use anyhow::{anyhow, Result};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

pub const DEFAULT_URL: &str = "https://nominatim.openstreetmap.org";

/// Place-name lookup against an OpenStreetMap Nominatim instance, returning the boundary
/// polygon reprojected to the National Grid.
pub struct Nominatim {
    client: Client,
    base_url: String,
}

impl Nominatim {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn with_user_agent(base_url: &str, user_agent: &str) -> Result<Self> {
        let client = http::client(user_agent)?;
        Ok(Self::new(client, base_url))
    }

    fn search_url(self: &Self, name: &str) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/search", self.base_url))?;
        url.query_pairs_mut()
            .append_pair("q", name)
            .append_pair("format", "geojson")
            .append_pair("polygon_geojson", "1")
            .append_pair("limit", "1");
        Ok(url)
    }
}

impl RegionResolver for Nominatim {
    async fn resolve_region(self: &Self, name: &str) -> Result<Region> {
        let url = self.search_url(name)?;
        debug!(%url, "Geocoding region");
        let collection: FeatureCollection = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let region = region_from_features(name, collection)?;
        info!(
            region = %region.name,
            polygons = region.geometry.0.len(),
            "Resolved region"
        );
        Ok(region)
    }
}

#[derive(Deserialize, Debug)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Deserialize, Debug)]
struct Feature {
    #[serde(default)]
    bbox: Option<[f64; 4]>,
    geometry: RawGeometry,
}

#[derive(Deserialize, Debug)]
struct RawGeometry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    coordinates: Value,
}

type Position = Vec<f64>;

fn region_from_features(name: &str, collection: FeatureCollection) -> Result<Region> {
    let feature = collection
        .features
        .into_iter()
        .next()
        .ok_or_else(|| FetchError::RegionNotFound(name.to_string()))?;

    let geometry = match feature.geometry.kind.as_str() {
        "Polygon" => {
            let rings: Vec<Vec<Position>> = serde_json::from_value(feature.geometry.coordinates)?;
            MultiPolygon::new(vec![project_polygon(&rings)?])
        }
        "MultiPolygon" => {
            let polygons: Vec<Vec<Vec<Position>>> =
                serde_json::from_value(feature.geometry.coordinates)?;
            let polygons = polygons
                .iter()
                .map(|rings| project_polygon(rings))
                .collect::<Result<Vec<_>>>()?;
            MultiPolygon::new(polygons)
        }
        // Points and lines carry no area; fall back to the feature's extent.
        other => {
            let [west, south, east, north] = feature
                .bbox
                .ok_or_else(|| FetchError::UnsupportedGeometry(other.to_string()))?;
            let corners = [[west, south], [east, south], [east, north], [west, north]];
            let ring: Vec<Coord<f64>> = corners
                .iter()
                .map(|[lon, lat]| bng::wgs84_to_bng(*lon, *lat))
                .collect();
            MultiPolygon::new(vec![Polygon::new(LineString::from(ring), vec![])])
        }
    };

    if geometry.iter().all(|p| p.exterior().0.is_empty()) {
        return Err(FetchError::RegionNotFound(name.to_string()).into());
    }
    Ok(Region::new(name, geometry))
}

fn project_polygon(rings: &[Vec<Position>]) -> Result<Polygon<f64>> {
    let mut rings = rings.iter().map(|ring| project_ring(ring));
    let exterior = rings
        .next()
        .ok_or_else(|| anyhow!("Polygon without an exterior ring"))??;
    let interiors = rings.collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn project_ring(ring: &[Position]) -> Result<LineString<f64>> {
    ring.iter()
        .map(|position| match position.as_slice() {
            [lon, lat, ..] => Ok(bng::wgs84_to_bng(*lon, *lat)),
            _ => Err(anyhow!("Malformed position: {position:?}")),
        })
        .collect::<Result<Vec<Coord<f64>>>>()
        .map(LineString::from)
}
