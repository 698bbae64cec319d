//! Processing configuration loaded from JSON.

use crate::core::classifier::ClassifierParams;
use crate::core::compositor::CompositorParams;
use crate::core::wet_snow::WetSnowParams;
use crate::io::selection::DEFAULT_TILES;
use crate::types::{SnowError, SnowResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directories, naming and algorithm parameters of a processing run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub scene_dir: PathBuf,
    pub land_mask_dir: PathBuf,
    pub product_dir: PathBuf,
    pub composite_dir: PathBuf,
    pub coefficient_file: PathBuf,
    /// Optional NWP surface temperature fields, one per tile and hour
    pub nwp_dir: Option<PathBuf>,
    /// Optional wet-snow probability layers, one per tile and day
    pub wet_snow_dir: Option<PathBuf>,
    pub product_prefix: String,
    pub tiles: Vec<String>,
    /// Satellite filter for compositing; empty accepts all
    pub satellites: Vec<String>,
    pub period_hours: u32,
    pub classifier: ClassifierParams,
    pub compositor: CompositorParams,
    pub wet_snow: WetSnowParams,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            scene_dir: PathBuf::from("scenes"),
            land_mask_dir: PathBuf::from("landmasks"),
            product_dir: PathBuf::from("products"),
            composite_dir: PathBuf::from("composites"),
            coefficient_file: PathBuf::from("coefficients.txt"),
            nwp_dir: None,
            wet_snow_dir: None,
            product_prefix: "snowcover".to_string(),
            tiles: DEFAULT_TILES.iter().map(|t| t.to_string()).collect(),
            satellites: Vec::new(),
            period_hours: 24, // hours per composite
            classifier: ClassifierParams::default(),
            compositor: CompositorParams::default(),
            wet_snow: WetSnowParams::default(),
        }
    }
}

impl ProcessingConfig {
    /// Load and validate a configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> SnowResult<Self> {
        let path = path.as_ref();
        log::info!("Loading configuration {}", path.display());
        let text = std::fs::read_to_string(path)?;
        let config: ProcessingConfig = serde_json::from_str(&text)?;
        config.validate()?;
        log::debug!("Configuration: {:?}", config);
        Ok(config)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> SnowResult<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> SnowResult<()> {
        if self.product_prefix.is_empty() {
            return Err(SnowError::Config("product prefix is empty".to_string()));
        }
        if self.period_hours == 0 {
            return Err(SnowError::Config("integration period must be at least one hour".to_string()));
        }
        if self.tiles.is_empty() {
            return Err(SnowError::Config("no tiles configured".to_string()));
        }
        if let Some(tile) = self
            .tiles
            .iter()
            .find(|t| t.is_empty() || !t.chars().all(|c| c.is_ascii_alphanumeric()))
        {
            return Err(SnowError::Config(format!("invalid tile code '{}'", tile)));
        }
        for scale in [&self.classifier.scale, &self.compositor.scale, &self.wet_snow.scale] {
            if scale.buckets() == 0 {
                return Err(SnowError::Config("probability scale needs at least one bucket".to_string()));
            }
        }
        if self.classifier.use_nwp && self.nwp_dir.is_none() {
            return Err(SnowError::Config("NWP input enabled without an NWP directory".to_string()));
        }
        Ok(())
    }

    /// Land mask of a tile: `landmask_<tile>.tif`
    pub fn land_mask_path(&self, tile: &str) -> PathBuf {
        self.land_mask_dir.join(format!("landmask_{}.tif", tile))
    }

    /// NWP surface temperature of a tile at the hour of `time`
    pub fn nwp_path(&self, tile: &str, time: &DateTime<Utc>) -> Option<PathBuf> {
        self.nwp_dir
            .as_ref()
            .map(|dir| dir.join(format!("nwp_{}_{}.tif", tile, time.format("%Y%m%d%H"))))
    }

    /// Wet-snow layer of a tile on the day of `time`
    pub fn wet_snow_path(&self, tile: &str, time: &DateTime<Utc>) -> Option<PathBuf> {
        self.wet_snow_dir
            .as_ref()
            .map(|dir| dir.join(format!("wetsnow_{}_{}.tif", tile, time.format("%Y%m%d"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "tiles": ["nr", "gr"], "compositor": { "cloud_threshold": 0.3 }, "classifier": { "use_land_mask": false } }"#,
        )
        .unwrap();

        let config = ProcessingConfig::from_file(&path).unwrap();
        assert_eq!(config.tiles, vec!["nr", "gr"]);
        assert_eq!(config.compositor.cloud_threshold, 0.3);
        assert!(!config.classifier.use_land_mask);
        assert_eq!(config.classifier.twilight_zenith, 85.0);
        assert_eq!(config.period_hours, 24);
        assert_eq!(config.product_prefix, "snowcover");
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = ProcessingConfig::default();
        config.satellites = vec!["NOAA-18".to_string()];
        config.to_file(&path).unwrap();
        let back = ProcessingConfig::from_file(&path).unwrap();
        assert_eq!(back.satellites, config.satellites);
        assert_eq!(back.tiles.len(), 8);
    }

    #[test]
    fn test_validation() {
        let mut config = ProcessingConfig::default();
        config.period_hours = 0;
        assert!(matches!(config.validate(), Err(SnowError::Config(_))));

        let mut config = ProcessingConfig::default();
        config.tiles = vec!["n_r".to_string()];
        assert!(config.validate().is_err());

        let mut config = ProcessingConfig::default();
        config.classifier.use_nwp = true;
        assert!(config.validate().is_err());
        config.nwp_dir = Some(PathBuf::from("nwp"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_auxiliary_paths() {
        let mut config = ProcessingConfig::default();
        let time = Utc.with_ymd_and_hms(2009, 3, 1, 7, 45, 0).unwrap();
        assert_eq!(config.land_mask_path("gs"), PathBuf::from("landmasks/landmask_gs.tif"));
        assert_eq!(config.nwp_path("gs", &time), None);
        config.nwp_dir = Some(PathBuf::from("nwp"));
        config.wet_snow_dir = Some(PathBuf::from("sar"));
        assert_eq!(config.nwp_path("gs", &time), Some(PathBuf::from("nwp/nwp_gs_2009030107.tif")));
        assert_eq!(config.wet_snow_path("gs", &time), Some(PathBuf::from("sar/wetsnow_gs_20090301.tif")));
    }
}
