use crate::catalog::{Dataset, Product, Selection};
use crate::environment_agency::survey;
use crate::region::NOMINATIM_URL;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use toml;

/// Everything needed to fetch one region's tiles, read from TOML.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct FetchRequest {
    pub region: String,
    pub dataset: String,
    pub product: String,
    pub resolution: f64,
    /// Survey year; the most recent data when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u16>,
    pub folder: PathBuf,
    #[serde(default = "default_geocoder_url")]
    pub geocoder_url: String,
    #[serde(default = "default_download_url")]
    pub download_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_geocoder_url() -> String {
    NOMINATIM_URL.to_string()
}

fn default_download_url() -> String {
    survey::DEFAULT_DOWNLOAD_URL.to_string()
}

fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

impl FetchRequest {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let request: Self = toml::from_str(&content)?;
        Ok(request)
    }

    pub fn write<P: AsRef<Path>>(self: &Self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn from_template(table: &toml::Table) -> Result<Self> {
        let request: Self = toml::from_str(&table.to_string())?;
        Ok(request)
    }

    pub fn dataset(self: &Self) -> Result<Dataset> {
        Ok(self.dataset.parse()?)
    }

    pub fn product(self: &Self) -> Result<Product> {
        Ok(self.product.parse()?)
    }

    pub fn selection(self: &Self) -> Result<Selection> {
        Ok(Selection::new(
            self.dataset()?,
            self.product()?,
            self.resolution,
        ))
    }
}
