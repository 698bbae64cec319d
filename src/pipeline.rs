//! Batch driver: classify scene files and composite integration periods.
//!
//! Classification runs scene by scene and compositing tile by tile. A scene
//! or tile that fails is logged and recorded in the [`SceneReport`] or
//! [`BatchReport`]; the rest are still processed.

use crate::config::ProcessingConfig;
use crate::core::classifier::PassClassifier;
use crate::core::coefficients::CoefficientTable;
use crate::core::compositor::TemporalCompositor;
use crate::core::wet_snow::WetSnowBlender;
use crate::io::palette::{write_class_image, write_probability_image, write_update_image};
use crate::io::product::{
    read_grid_layer, read_land_mask, read_pass_product, read_scene, write_composite, write_pass_product,
};
use crate::io::selection::{composite_file_name, pass_file_name, IntegrationPeriod, PassFile, PassSelector};
use crate::types::{CompositeProduct, PassProduct, SnowError, SnowResult};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Result of classifying the scene directory
#[derive(Debug, Default)]
pub struct SceneReport {
    /// Pass products written, in scene file order
    pub written: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, SnowError)>,
}

impl SceneReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn exit_code(&self) -> i32 {
        self.failed.first().map(|(_, e)| e.exit_code()).unwrap_or(0)
    }
}

/// Files written for one composited tile
#[derive(Debug, Clone, PartialEq)]
pub struct TileOutcome {
    pub tile: String,
    pub passes: usize,
    /// Selected files that could not be read or were filtered out
    pub skipped_files: usize,
    pub product: PathBuf,
    pub class_image: PathBuf,
    pub probability_image: PathBuf,
    pub update_image: Option<PathBuf>,
}

/// Result of compositing one integration period
#[derive(Debug, Default)]
pub struct BatchReport {
    pub completed: Vec<TileOutcome>,
    pub failed: Vec<(String, SnowError)>,
    /// Tiles without any usable pass
    pub skipped: Vec<String>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// 0 when every tile succeeded, otherwise the code of the first failure
    pub fn exit_code(&self) -> i32 {
        self.failed.first().map(|(_, e)| e.exit_code()).unwrap_or(0)
    }
}

/// Configured classifier, compositor and blender
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: ProcessingConfig,
    classifier: PassClassifier,
    compositor: TemporalCompositor,
    blender: WetSnowBlender,
}

impl Pipeline {
    /// Build from a configuration, reading its coefficient table
    pub fn new(config: ProcessingConfig) -> SnowResult<Self> {
        let table = CoefficientTable::from_file(&config.coefficient_file)?;
        Self::with_table(config, table)
    }

    /// Build from a configuration and an already loaded coefficient table
    pub fn with_table(config: ProcessingConfig, table: CoefficientTable) -> SnowResult<Self> {
        config.validate()?;
        let classifier = PassClassifier::with_params(table, config.classifier.clone())?;
        let compositor = TemporalCompositor::with_params(config.compositor.clone())?;
        let blender = WetSnowBlender::with_params(config.wet_snow.clone())?;
        Ok(Self {
            config,
            classifier,
            compositor,
            blender,
        })
    }

    pub fn from_config_file<P: AsRef<Path>>(path: P) -> SnowResult<Self> {
        Self::new(ProcessingConfig::from_file(path)?)
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    /// Classify one scene file and write its pass product into the product
    /// directory. Returns the written path.
    pub fn classify_scene_file<P: AsRef<Path>>(&self, path: P) -> SnowResult<PathBuf> {
        let scene = read_scene(path)?;
        let header = &scene.header;
        let params = self.classifier.params();

        let land_mask = if params.use_land_mask {
            let mask_path = self.config.land_mask_path(&header.area);
            if mask_path.exists() {
                Some(read_land_mask(&mask_path)?)
            } else {
                log::debug!("No land mask at {}", mask_path.display());
                None
            }
        } else {
            None
        };

        let nwp = match self.config.nwp_path(&header.area, &header.time) {
            Some(nwp_path) if params.use_nwp => {
                let (grid, field) = read_grid_layer(&nwp_path)?;
                if !grid.matches_within_tenth_km(&header.grid) {
                    return Err(SnowError::GridMismatch(format!(
                        "NWP grid {} does not match scene grid {}",
                        grid, header.grid
                    )));
                }
                Some(field)
            }
            _ => None,
        };

        #[cfg(feature = "parallel")]
        let pass = self
            .classifier
            .classify_parallel(&scene, land_mask.as_ref(), nwp.as_ref())?;
        #[cfg(not(feature = "parallel"))]
        let pass = self.classifier.classify(&scene, land_mask.as_ref(), nwp.as_ref())?;

        std::fs::create_dir_all(&self.config.product_dir)?;
        let out = self.config.product_dir.join(pass_file_name(
            &self.config.product_prefix,
            &header.area,
            &header.satellite,
            &header.time,
        ));
        if out.exists() {
            log::warn!("Replacing existing pass product {}", out.display());
        }
        write_pass_product(&pass, &out)?;
        Ok(out)
    }

    /// Classify every `.tif` scene in the scene directory, in file name order.
    /// A scene that fails is recorded and the rest are still classified.
    pub fn classify_scenes(&self) -> SnowResult<SceneReport> {
        let mut scenes = Vec::new();
        for entry in std::fs::read_dir(&self.config.scene_dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("tif")) {
                scenes.push(path);
            }
        }
        scenes.sort();
        log::info!("Classifying {} scenes from {}", scenes.len(), self.config.scene_dir.display());

        let mut report = SceneReport::default();
        for scene in scenes {
            match self.classify_scene_file(&scene) {
                Ok(out) => report.written.push(out),
                Err(e) => {
                    log::error!("Scene {} failed: {}", scene.display(), e);
                    report.failed.push((scene, e));
                }
            }
        }
        Ok(report)
    }

    /// Composite every configured tile over the configured number of hours
    /// ending at `end`
    pub fn composite_period(&self, end: DateTime<Utc>) -> SnowResult<BatchReport> {
        self.composite_window(&IntegrationPeriod::new(end, self.config.period_hours))
    }

    fn composite_window(&self, period: &IntegrationPeriod) -> SnowResult<BatchReport> {
        let selector = PassSelector::new(&self.config.product_prefix, &self.config.tiles)?
            .with_satellites(&self.config.satellites);
        let groups = selector.select(&self.config.product_dir, period)?;
        std::fs::create_dir_all(&self.config.composite_dir)?;

        let mut report = BatchReport::default();
        for (tile, files) in groups {
            let (passes, skipped_files) = self.read_passes(&selector, &files);
            if passes.is_empty() {
                log::warn!("No usable passes for tile {}", tile);
                report.skipped.push(tile);
                continue;
            }
            match self.composite_tile(&tile, &passes, period) {
                Ok(mut outcome) => {
                    outcome.skipped_files = skipped_files;
                    report.completed.push(outcome);
                }
                Err(e) => {
                    log::error!("Tile {} failed: {}", tile, e);
                    report.failed.push((tile, e));
                }
            }
        }

        log::info!(
            "Period ending {}: {} tiles done, {} failed, {} without passes",
            period.end,
            report.completed.len(),
            report.failed.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    fn read_passes(&self, selector: &PassSelector, files: &[PassFile]) -> (Vec<PassProduct>, usize) {
        let mut passes = Vec::with_capacity(files.len());
        let mut skipped = 0;
        for file in files {
            match read_pass_product(&file.path, &self.config.compositor.scale) {
                Ok(pass) if selector.accepts_source(&pass.header.source) => passes.push(pass),
                Ok(pass) => {
                    log::debug!("Skipping {} from {}", file.path.display(), pass.header.source);
                    skipped += 1;
                }
                Err(e) => {
                    log::warn!("Skipping unreadable pass {}: {}", file.path.display(), e);
                    skipped += 1;
                }
            }
        }
        (passes, skipped)
    }

    fn composite_tile(&self, tile: &str, passes: &[PassProduct], period: &IntegrationPeriod) -> SnowResult<TileOutcome> {
        #[cfg(feature = "parallel")]
        let composite = self.compositor.composite_parallel(passes, period.end)?;
        #[cfg(not(feature = "parallel"))]
        let composite = self.compositor.composite(passes, period.end)?;

        let name = |variant: &str| {
            self.config.composite_dir.join(composite_file_name(
                &self.config.product_prefix,
                variant,
                tile,
                period,
                &self.config.satellites,
            ))
        };

        let (composite, update_image) = match self.blend_wet_snow(tile, composite, period)? {
            (blended, Some(updated)) => {
                let path = name("-up");
                write_update_image(&path, &blended.header, &updated)?;
                (blended, Some(path))
            }
            (composite, None) => (composite, None),
        };

        let product = name("");
        let class_image = name("-cl");
        let probability_image = name("-sp");
        write_composite(&composite, &product)?;
        write_class_image(&class_image, &composite)?;
        write_probability_image(&probability_image, &composite, &self.config.compositor.scale)?;

        Ok(TileOutcome {
            tile: tile.to_string(),
            passes: passes.len(),
            skipped_files: 0,
            product,
            class_image,
            probability_image,
            update_image,
        })
    }

    fn blend_wet_snow(
        &self,
        tile: &str,
        composite: CompositeProduct,
        period: &IntegrationPeriod,
    ) -> SnowResult<(CompositeProduct, Option<ndarray::Array2<u8>>)> {
        let Some(path) = self.config.wet_snow_path(tile, &period.end) else {
            return Ok((composite, None));
        };
        if !path.exists() {
            log::debug!("No wet snow layer at {}", path.display());
            return Ok((composite, None));
        }
        let (grid, layer) = read_grid_layer(&path)?;
        let blend = self.blender.blend(&composite, &layer, &grid)?;
        Ok((blend.composite, Some(blend.updated)))
    }
}
