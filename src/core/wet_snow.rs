//! Wet-snow blending applied to a finished composite.
//!
//! An auxiliary wet-snow probability layer (typically from SAR) counts as
//! one extra cloud-free observation wherever it is confident enough.

use crate::core::bucket::ProbabilityScale;
use crate::types::{CompositeClass, CompositeProduct, GridDefinition, ProbabilityImage, SnowError, SnowResult};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Legend of the update mask
pub const WET_SNOW_LEGEND: [&str; 2] = ["0: no SAR update", "1: SAR update"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WetSnowParams {
    /// Wet-snow probabilities above this are blended in
    pub threshold: f32,
    pub scale: ProbabilityScale,
}

impl Default for WetSnowParams {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            scale: ProbabilityScale::default(),
        }
    }
}

/// Blended composite and the mask of updated pixels (1 updated, 0 not)
#[derive(Debug, Clone)]
pub struct WetSnowBlend {
    pub composite: CompositeProduct,
    pub updated: Array2<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct WetSnowBlender {
    params: WetSnowParams,
}

impl WetSnowBlender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: WetSnowParams) -> SnowResult<Self> {
        if !(0.0..1.0).contains(&params.threshold) {
            return Err(SnowError::Config(format!(
                "wet snow threshold {} outside [0, 1)",
                params.threshold
            )));
        }
        Ok(Self { params })
    }

    /// Blend `wet_snow` (on `wet_snow_grid`) into a copy of `composite`
    pub fn blend(
        &self,
        composite: &CompositeProduct,
        wet_snow: &ProbabilityImage,
        wet_snow_grid: &GridDefinition,
    ) -> SnowResult<WetSnowBlend> {
        let grid = &composite.header.grid;
        if !wet_snow_grid.matches_exactly(grid) {
            return Err(SnowError::GridMismatch(format!(
                "wet snow grid {} does not match composite grid {}",
                wet_snow_grid, grid
            )));
        }
        grid.check_dim("wet snow layer", wet_snow.dim())?;

        let threshold = self.params.threshold;
        let scale = &self.params.scale;
        let mut blended = composite.clone();
        let mut updated = Array2::<u8>::zeros(grid.dim());

        for ((row, col), &w) in wet_snow.indexed_iter() {
            if !(0.0..=1.0).contains(&w) || w <= threshold {
                continue;
            }
            let n = blended.cloudfree_count[[row, col]];
            let (ice, clear) = if n > 0 {
                let n = n as f32;
                (
                    (blended.p_ice[[row, col]] * n + w) / (n + 1.0),
                    (blended.p_clear[[row, col]] * n + (1.0 - w)) / (n + 1.0),
                )
            } else {
                (w, 1.0 - w)
            };

            blended.p_ice[[row, col]] = ice;
            blended.p_clear[[row, col]] = clear;
            blended.cloudfree_count[[row, col]] = n + 1;
            blended.class[[row, col]] = if ice > clear {
                CompositeClass::IceSnow
            } else if clear > ice {
                CompositeClass::Clear
            } else {
                CompositeClass::Unclassified
            };
            blended.bucket[[row, col]] = scale.bucket(ice);
            updated[[row, col]] = 1;
        }

        let count = updated.iter().filter(|&&u| u == 1).count();
        log::info!("Wet snow blending updated {} of {} pixels", count, updated.len());
        Ok(WetSnowBlend { composite: blended, updated })
    }
}
