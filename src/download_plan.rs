use crate::http::HttpObjOps;
use anyhow::Result;
use futures_util::StreamExt;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::ZipArchive;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct DownloadTask {
    tile_id: String,
    url: String,
    archive: PathBuf,
    output: PathBuf,
}

impl DownloadTask {
    /// The archive lands next to the tile's output directory: `<folder>/<tile>.zip` unpacks to
    /// `<folder>/<tile>/`.
    pub fn new(tile_id: &str, url: &str, folder: &Path) -> Self {
        DownloadTask {
            tile_id: tile_id.to_string(),
            url: url.to_string(),
            archive: folder.join(format!("{tile_id}.zip")),
            output: folder.join(tile_id),
        }
    }

    pub fn tile_id(self: &Self) -> &str {
        &self.tile_id
    }

    pub fn url(self: &Self) -> &str {
        &self.url
    }

    pub fn output(self: &Self) -> &Path {
        &self.output
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Downloaded,
    /// Output was already on disk
    Skipped,
    /// The service had nothing for this tile
    Unavailable,
}

#[derive(Serialize, Debug, Default, PartialEq)]
pub struct FetchReport {
    pub downloaded: Vec<String>,
    pub skipped: Vec<String>,
    pub unavailable: Vec<String>,
}

impl FetchReport {
    fn record(self: &mut Self, tile_id: &str, outcome: Outcome) {
        let list = match outcome {
            Outcome::Downloaded => &mut self.downloaded,
            Outcome::Skipped => &mut self.skipped,
            Outcome::Unavailable => &mut self.unavailable,
        };
        list.push(tile_id.to_string());
    }
}

#[derive(Deserialize, Serialize, Debug, Default)]
pub struct DownloadPlan {
    tasks: Vec<DownloadTask>,
}

impl DownloadPlan {
    pub fn new(tasks: Vec<DownloadTask>) -> Self {
        Self { tasks }
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let plan: Self = serde_json::from_str(&content)?;
        Ok(plan)
    }

    pub fn write<P: AsRef<Path>>(self: &Self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn tasks(self: &Self) -> &[DownloadTask] {
        &self.tasks
    }

    pub fn is_empty(self: &Self) -> bool {
        self.tasks.is_empty()
    }

    pub async fn execute(self: &Self, provider: &impl HttpObjOps) -> Result<FetchReport> {
        let mut report = FetchReport::default();
        for (i, task) in self.tasks.iter().enumerate() {
            info!(
                tile = %task.tile_id,
                "Current task {}/{}",
                i + 1,
                self.tasks.len()
            );
            let outcome = try_download(provider, task).await?;
            report.record(&task.tile_id, outcome);
        }
        Ok(report)
    }
}

pub async fn try_download(provider: &impl HttpObjOps, task: &DownloadTask) -> Result<Outcome> {
    // Check if the output already exists; return early if so
    if task.output.exists() {
        info!(tile = %task.tile_id, "Output already exists");
        return Ok(Outcome::Skipped);
    }

    // Make parent directories as necessary
    if let Some(parent_dir) = task.archive.parent() {
        if !parent_dir.exists() {
            fs::create_dir_all(parent_dir)?;
        }
    }

    // A finished archive from an interrupted run only needs unpacking
    if !task.archive.exists() && !fetch_archive(provider, task).await? {
        warn!(tile = %task.tile_id, "No data available for tile");
        return Ok(Outcome::Unavailable);
    }

    let rasters = match unpack(task) {
        Ok(rasters) => rasters,
        Err(e) => {
            // Left in place, a corrupt archive would be reused by every later run
            if task.archive.exists() {
                fs::remove_file(&task.archive)?;
            }
            return Err(e);
        }
    };
    if task.archive.exists() {
        fs::remove_file(&task.archive)?;
    }

    if rasters == 0 {
        warn!(tile = %task.tile_id, "Response held no raster data");
        return Ok(Outcome::Unavailable);
    }
    info!(tile = %task.tile_id, rasters, "Download complete");
    Ok(Outcome::Downloaded)
}

/// Streams the tile into `<archive>.partial`, resuming when possible, and renames it into
/// place. Returns false when the service has no data for the tile.
async fn fetch_archive(provider: &impl HttpObjOps, task: &DownloadTask) -> Result<bool> {
    // Check if partial file exists and get its size
    let partial = partial_path(&task.archive);
    let mut partial_file = OpenOptions::new()
        .read(true)
        .create(true)
        .append(true)
        .open(&partial)?;
    let mut byte_count = partial_file.metadata()?.len();

    let total_size = provider.head_object(&task.url).await?;

    if matches!(total_size, Some(total) if byte_count > total) {
        warn!(tile = %task.tile_id, "Partial download is larger than the remote object, restarting");
        partial_file.set_len(0)?;
        byte_count = 0;
    }

    let response = match total_size {
        Some(total) if byte_count == total => None,
        Some(total) if byte_count > 0 => {
            let progress = (byte_count as f64 / total as f64) * 100.;
            info!(tile = %task.tile_id, "Resuming download from {:.2}% completion", progress);
            Some(
                provider
                    .get_object_range(&task.url, byte_count, total - 1)
                    .await?,
            )
        }
        _ => Some(provider.get_object(&task.url).await?),
    };

    if let Some(response) = response {
        let status = response.status();
        if matches!(
            status,
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT | StatusCode::GONE
        ) {
            drop(partial_file);
            fs::remove_file(&partial)?;
            return Ok(false);
        }
        let response = response.error_for_status()?;

        // The server ignored the range and sent everything
        if status != StatusCode::PARTIAL_CONTENT && byte_count > 0 {
            partial_file.set_len(0)?;
            byte_count = 0;
        }

        info!(tile = %task.tile_id, "Downloading...");
        let mut body = response.bytes_stream();
        while let Some(bytes) = body.next().await {
            let bytes = bytes?;
            partial_file.write_all(&bytes)?;
            byte_count += bytes.len() as u64;
        }
    }
    debug!(tile = %task.tile_id, bytes = byte_count, "Archive stored");

    drop(partial_file);
    // Rename the file to remove .partial suffix
    fs::rename(&partial, &task.archive)?;
    Ok(true)
}

#[derive(Debug, PartialEq, Eq)]
enum Payload {
    Zip,
    Tiff,
    Other,
}

fn unpack(task: &DownloadTask) -> Result<usize> {
    let rasters = match sniff(&task.archive)? {
        Payload::Zip => extract_rasters(&task.archive, &task.output)?,
        Payload::Tiff => store_raster(&task.archive, &task.output, &task.tile_id)?,
        Payload::Other => 0,
    };
    Ok(rasters)
}

fn sniff(path: &Path) -> Result<Payload> {
    let mut magic = Vec::with_capacity(4);
    File::open(path)?.take(4).read_to_end(&mut magic)?;
    let payload = match magic.as_slice() {
        b"PK\x03\x04" => Payload::Zip,
        // Classic and BigTIFF, both byte orders
        b"II*\0" | b"MM\0*" | b"II+\0" | b"MM\0+" => Payload::Tiff,
        _ => Payload::Other,
    };
    Ok(payload)
}

fn is_raster(name: &OsStr) -> bool {
    Path::new(name)
        .extension()
        .and_then(OsStr::to_str)
        .map(|ext| ext.eq_ignore_ascii_case("tif") || ext.eq_ignore_ascii_case("tiff"))
        .unwrap_or(false)
}

/// Unpacks the GeoTIFFs of a zip into `output`, flattening any folders inside the archive.
/// Only the first of several entries sharing a file name is kept.
fn extract_rasters(archive: &Path, output: &Path) -> Result<usize> {
    let staging = partial_path(output);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    let mut zip = ZipArchive::new(File::open(archive)?)?;
    let mut written = HashSet::new();
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = match entry
            .enclosed_name()
            .and_then(|p| p.file_name().map(OsStr::to_os_string))
        {
            Some(name) if is_raster(&name) => name,
            _ => continue,
        };
        if written.contains(&name) {
            warn!(entry = %entry.name(), "Skipping raster with a duplicate file name");
            continue;
        }
        let mut file = File::create(staging.join(&name))?;
        io::copy(&mut entry, &mut file)?;
        written.insert(name);
    }

    let count = written.len();
    if count == 0 {
        fs::remove_dir_all(&staging)?;
        return Ok(0);
    }
    fs::rename(&staging, output)?;
    Ok(count)
}

fn store_raster(raster: &Path, output: &Path, tile_id: &str) -> Result<usize> {
    let staging = partial_path(output);
    fs::create_dir_all(&staging)?;
    fs::rename(raster, staging.join(format!("{tile_id}.tif")))?;
    fs::rename(&staging, output)?;
    Ok(1)
}

fn partial_path(path: &Path) -> PathBuf {
    let mut partial = path.as_os_str().to_owned();
    partial.push(".partial");
    PathBuf::from(partial)
}
