//! Pass-product file naming and selection by tile and time window.

use crate::types::{satellite_key, SnowError, SnowResult};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use regex::Regex;
use std::path::{Path, PathBuf};

/// Operational tiles, in processing order
pub const DEFAULT_TILES: [&str; 8] = ["ns", "nr", "at", "gr", "gn", "gf", "gm", "gs"];

const TIME_FORMAT: &str = "%Y%m%d%H%M";

/// File name of a pass product: `<prefix>_<tile>_<satellite>_<YYYYMMDDhhmm>.tif`,
/// with the satellite written as its `satellite_key`
pub fn pass_file_name(prefix: &str, tile: &str, satellite: &str, time: &DateTime<Utc>) -> String {
    format!("{}_{}_{}_{}.tif", prefix, tile, satellite_key(satellite), time.format(TIME_FORMAT))
}

/// File name of a composite or one of its images.
///
/// `variant` is appended to the prefix (`-cl` class image, `-sp`
/// probability image). An empty satellite list is written as `allsats`.
pub fn composite_file_name(
    prefix: &str,
    variant: &str,
    tile: &str,
    period: &IntegrationPeriod,
    satellites: &[String],
) -> String {
    let sats = if satellites.is_empty() {
        "allsats".to_string()
    } else {
        satellites.join("_")
    };
    format!(
        "{}{}_{}_{}-{}hours_{}.tif",
        prefix,
        variant,
        tile,
        period.end.format("%Y%m%d"),
        period.hours,
        sats
    )
}

/// Closed time window `[end - hours, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegrationPeriod {
    pub end: DateTime<Utc>,
    pub hours: u32,
}

impl IntegrationPeriod {
    pub fn new(end: DateTime<Utc>, hours: u32) -> Self {
        Self { end, hours }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.end - Duration::hours(self.hours as i64)
    }

    pub fn contains(&self, time: &DateTime<Utc>) -> bool {
        *time >= self.start() && *time <= self.end
    }
}

/// A pass product found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassFile {
    pub path: PathBuf,
    pub tile: String,
    /// Satellite key from the file name
    pub satellite: String,
    pub time: DateTime<Utc>,
}

/// Finds the pass products of an integration period
#[derive(Debug, Clone)]
pub struct PassSelector {
    pattern: Regex,
    tiles: Vec<String>,
    satellites: Vec<String>,
}

impl PassSelector {
    /// Selector for products named with `prefix`, restricted to `tiles`
    pub fn new(prefix: &str, tiles: &[String]) -> SnowResult<Self> {
        let pattern = Regex::new(&format!(
            r"^{}_(?P<tile>[A-Za-z0-9]+)_(?P<sat>[a-z0-9]+)_(?P<time>\d{{12}})\.tif$",
            regex::escape(prefix)
        ))
        .map_err(|e| SnowError::Config(format!("file name pattern for prefix '{}': {}", prefix, e)))?;
        let tiles = if tiles.is_empty() {
            DEFAULT_TILES.iter().map(|t| t.to_string()).collect()
        } else {
            tiles.to_vec()
        };
        Ok(Self {
            pattern,
            tiles,
            satellites: Vec::new(),
        })
    }

    /// Keep only products whose source names one of `satellites`
    pub fn with_satellites(mut self, satellites: &[String]) -> Self {
        self.satellites = satellites.to_vec();
        self
    }

    pub fn tiles(&self) -> &[String] {
        &self.tiles
    }

    /// Tile, satellite key and time encoded in a file name
    pub fn parse_name(&self, name: &str) -> Option<(String, String, DateTime<Utc>)> {
        let captures = self.pattern.captures(name)?;
        let time = NaiveDateTime::parse_from_str(&captures["time"], TIME_FORMAT).ok()?;
        Some((captures["tile"].to_string(), captures["sat"].to_string(), time.and_utc()))
    }

    /// Whether a product header source passes the satellite filter.
    /// Names are compared by `satellite_key`, so "NOAA-1" does not admit NOAA-18.
    pub fn accepts_source(&self, source: &str) -> bool {
        let source = satellite_key(source);
        self.satellites.is_empty() || self.satellites.iter().any(|s| satellite_key(s) == source)
    }

    /// Products in `dir` inside `period`, grouped by tile in tile order and
    /// sorted by time. Tiles without products are returned with an empty list.
    pub fn select<P: AsRef<Path>>(&self, dir: P, period: &IntegrationPeriod) -> SnowResult<Vec<(String, Vec<PassFile>)>> {
        let dir = dir.as_ref();
        log::info!(
            "Selecting passes in {} from {} to {}",
            dir.display(),
            period.start(),
            period.end
        );

        let mut found = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some((tile, satellite, time)) = self.parse_name(name) else { continue };
            if period.contains(&time) && self.tiles.contains(&tile) {
                found.push(PassFile { path: entry.path(), tile, satellite, time });
            }
        }

        let groups: Vec<(String, Vec<PassFile>)> = self
            .tiles
            .iter()
            .map(|tile| {
                let mut files: Vec<PassFile> = found.iter().filter(|f| &f.tile == tile).cloned().collect();
                files.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.path.cmp(&b.path)));
                (tile.clone(), files)
            })
            .collect();

        for (tile, files) in &groups {
            log::debug!("Tile {}: {} passes", tile, files.len());
        }
        Ok(groups)
    }
}
