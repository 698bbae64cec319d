//! Multi-pass temporal compositing with cloud filtering.
//!
//! Every pass adds to per-pixel counters (cloud-free, cloud, undefined,
//! total) and to the sums of the cloud-free ice and clear ratios. The
//! reduction turns the counters into one composite class and probability
//! bucket per pixel. Accumulators merge, so passes can be folded in any
//! order and in parallel.

use crate::core::bucket::ProbabilityScale;
use crate::types::{
    CompositeClass, CompositeProduct, GridDefinition, PassProduct, ProductHeader, SnowError,
    SnowResult, MISSING_PROBABILITY,
};
use chrono::{DateTime, Utc};
use ndarray::Array2;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

/// Product tag written into composite headers
pub const COMPOSITE_PRODUCT_TAG: &str = "snowcover-composite";

/// Compositor parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorParams {
    /// Observations with P(cloud) at or above this are clouded
    pub cloud_threshold: f32,
    /// Quantizer of the composite bucket layer
    pub scale: ProbabilityScale,
}

impl Default for CompositorParams {
    fn default() -> Self {
        Self {
            cloud_threshold: 0.2,                // P(cloud) marking a clouded observation
            scale: ProbabilityScale::default(),  // 20 buckets of 0.05
        }
    }
}

/// Zero-filled array with a fallible allocation
fn try_zeros<T: Clone + Zero>(dim: (usize, usize)) -> SnowResult<Array2<T>> {
    let len = dim.0 * dim.1;
    let mut data = Vec::new();
    data.try_reserve_exact(len).map_err(|e| {
        SnowError::Allocation(format!("{}x{} accumulator layer: {}", dim.0, dim.1, e))
    })?;
    data.resize(len, T::zero());
    Array2::from_shape_vec(dim, data)
        .map_err(|e| SnowError::Processing(format!("accumulator shape: {}", e)))
}

/// Per-pixel running counters of one tile
#[derive(Debug, Clone)]
pub struct Accumulator {
    grid: GridDefinition,
    cloudfree: Array2<u32>,
    cloud: Array2<u32>,
    undefined: Array2<u32>,
    total: Array2<u32>,
    ice_sum: Array2<f64>,
    clear_sum: Array2<f64>,
    passes: usize,
    integrity_warnings: usize,
}

impl Accumulator {
    /// Empty accumulator for a grid
    pub fn new(grid: &GridDefinition) -> SnowResult<Self> {
        let dim = grid.dim();
        Ok(Self {
            grid: grid.clone(),
            cloudfree: try_zeros(dim)?,
            cloud: try_zeros(dim)?,
            undefined: try_zeros(dim)?,
            total: try_zeros(dim)?,
            ice_sum: try_zeros(dim)?,
            clear_sum: try_zeros(dim)?,
            passes: 0,
            integrity_warnings: 0,
        })
    }

    pub fn grid(&self) -> &GridDefinition {
        &self.grid
    }

    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Pixels skipped because their sentinel triple was inconsistent
    pub fn integrity_warnings(&self) -> usize {
        self.integrity_warnings
    }

    /// (cloud-free, cloud, undefined, total) counts of one pixel
    pub fn counts(&self, row: usize, col: usize) -> (u32, u32, u32, u32) {
        (
            self.cloudfree[[row, col]],
            self.cloud[[row, col]],
            self.undefined[[row, col]],
            self.total[[row, col]],
        )
    }

    /// Add one pass
    pub fn accumulate(&mut self, pass: &PassProduct, cloud_threshold: f32) -> SnowResult<()> {
        if !pass.header.grid.matches_exactly(&self.grid) {
            return Err(SnowError::GridMismatch(format!(
                "pass {} {} has grid {}, composite grid is {}",
                pass.header.source, pass.header.time, pass.header.grid, self.grid
            )));
        }
        check_layers(pass)?;

        let mut partial_sentinels = 0usize;
        for ((row, col), status) in pass.status.indexed_iter() {
            let ice = pass.p_ice[[row, col]];
            let clear = pass.p_free[[row, col]];
            let cloud = pass.p_cloud[[row, col]];

            match status.sentinel() {
                None => {
                    let in_range = |v: f32| (0.0..=1.0).contains(&v);
                    let sum = ice as f64 + clear as f64 + cloud as f64;
                    if !(in_range(ice) && in_range(clear) && in_range(cloud)) || !(0.95..=1.05).contains(&sum) {
                        continue;
                    }
                    if cloud >= cloud_threshold {
                        self.cloud[[row, col]] += 1;
                    } else {
                        let denominator = ice as f64 + clear as f64;
                        if denominator <= 0.0 {
                            return Err(SnowError::Processing(format!(
                                "zero ice + clear probability in cloud-free pixel ({}, {}) of {} {}",
                                row, col, pass.header.source, pass.header.time
                            )));
                        }
                        self.cloudfree[[row, col]] += 1;
                        self.ice_sum[[row, col]] += ice as f64 / denominator;
                        self.clear_sum[[row, col]] += clear as f64 / denominator;
                    }
                    self.total[[row, col]] += 1;
                }
                Some(sentinel) => {
                    if ice == sentinel && clear == sentinel && cloud == sentinel {
                        self.undefined[[row, col]] += 1;
                        self.total[[row, col]] += 1;
                    } else {
                        if partial_sentinels == 0 {
                            log::debug!(
                                "Inconsistent {:?} triple ({}, {}, {}) at ({}, {})",
                                status, ice, clear, cloud, row, col
                            );
                        }
                        partial_sentinels += 1;
                    }
                }
            }
        }

        if partial_sentinels > 0 {
            log::warn!(
                "Skipped {} pixels of {} {} with inconsistent undefined values",
                partial_sentinels,
                pass.header.source,
                pass.header.time
            );
        }
        self.integrity_warnings += partial_sentinels;
        self.passes += 1;
        Ok(())
    }

    /// Fold another accumulator of the same grid into this one
    pub fn merge(&mut self, other: &Accumulator) -> SnowResult<()> {
        if !other.grid.matches_exactly(&self.grid) {
            return Err(SnowError::GridMismatch(format!(
                "cannot merge accumulators of grids {} and {}",
                other.grid, self.grid
            )));
        }
        self.cloudfree += &other.cloudfree;
        self.cloud += &other.cloud;
        self.undefined += &other.undefined;
        self.total += &other.total;
        self.ice_sum += &other.ice_sum;
        self.clear_sum += &other.clear_sum;
        self.passes += other.passes;
        self.integrity_warnings += other.integrity_warnings;
        Ok(())
    }

    /// Reduce the counters to a composite
    pub fn finalize(&self, header: ProductHeader, scale: &ProbabilityScale) -> SnowResult<CompositeProduct> {
        let dim = self.grid.dim();
        let mut class = Array2::from_elem(dim, CompositeClass::Undefined);
        let mut bucket: Array2<u8> = try_zeros(dim)?;
        let mut p_ice = Array2::from_elem(dim, MISSING_PROBABILITY);
        let mut p_clear = Array2::from_elem(dim, MISSING_PROBABILITY);

        for ((row, col), &total) in self.total.indexed_iter() {
            let (cloudfree, cloud, undef, _) = self.counts(row, col);
            if cloudfree + cloud + undef != total {
                return Err(SnowError::InvariantViolation { row, col, cloudfree, cloud, undef, total });
            }

            if cloudfree > 0 {
                let ice = (self.ice_sum[[row, col]] / cloudfree as f64) as f32;
                let clear = (self.clear_sum[[row, col]] / cloudfree as f64) as f32;
                class[[row, col]] = if ice > clear {
                    CompositeClass::IceSnow
                } else if clear > ice {
                    CompositeClass::Clear
                } else {
                    CompositeClass::Unclassified
                };
                p_ice[[row, col]] = ice;
                p_clear[[row, col]] = clear;
            } else if cloud > 0 {
                class[[row, col]] = CompositeClass::Clouded;
            } else {
                // Only undefined observations, or none at all
                class[[row, col]] = CompositeClass::Unclassified;
            }
            bucket[[row, col]] = scale.bucket(p_ice[[row, col]]);
        }

        let count = |c: CompositeClass| class.iter().filter(|v| **v == c).count();
        log::info!(
            "Composite of {} passes: {} ice/snow, {} clear, {} clouded, {} unclassified",
            self.passes,
            count(CompositeClass::IceSnow),
            count(CompositeClass::Clear),
            count(CompositeClass::Clouded),
            count(CompositeClass::Unclassified)
        );

        Ok(CompositeProduct {
            header,
            class,
            bucket,
            p_ice,
            p_clear,
            cloudfree_count: self.cloudfree.clone(),
        })
    }
}

fn check_layers(pass: &PassProduct) -> SnowResult<()> {
    let grid = &pass.header.grid;
    grid.check_dim("P(ice) layer", pass.p_ice.dim())?;
    grid.check_dim("P(free) layer", pass.p_free.dim())?;
    grid.check_dim("P(cloud) layer", pass.p_cloud.dim())?;
    grid.check_dim("status layer", pass.status.dim())
}

/// Temporal compositor for the passes of one tile
#[derive(Debug, Clone)]
pub struct TemporalCompositor {
    params: CompositorParams,
}

impl Default for TemporalCompositor {
    fn default() -> Self {
        Self::new()
    }
}

impl TemporalCompositor {
    /// Create a compositor with default parameters
    pub fn new() -> Self {
        Self {
            params: CompositorParams::default(),
        }
    }

    /// Create a compositor with custom parameters
    pub fn with_params(params: CompositorParams) -> SnowResult<Self> {
        if !(params.cloud_threshold > 0.0 && params.cloud_threshold <= 1.0) {
            return Err(SnowError::Config(format!(
                "cloud threshold {} outside (0, 1]",
                params.cloud_threshold
            )));
        }
        Ok(Self { params })
    }

    pub fn params(&self) -> &CompositorParams {
        &self.params
    }

    /// Common grid of all passes; any difference fails before accumulation
    pub fn check_grids(passes: &[PassProduct]) -> SnowResult<GridDefinition> {
        let first = passes
            .first()
            .ok_or_else(|| SnowError::Processing("no passes to composite".to_string()))?;
        let grid = &first.header.grid;
        for pass in passes {
            if !pass.header.grid.matches_exactly(grid) {
                return Err(SnowError::GridMismatch(format!(
                    "{} {} has grid {}, expected {}",
                    pass.header.source, pass.header.time, pass.header.grid, grid
                )));
            }
            check_layers(pass)?;
        }
        Ok(grid.clone())
    }

    fn header(passes: &[PassProduct], grid: GridDefinition, time: DateTime<Utc>) -> ProductHeader {
        let mut sources: Vec<&str> = Vec::new();
        for pass in passes {
            if !sources.contains(&pass.header.source.as_str()) {
                sources.push(&pass.header.source);
            }
        }
        let first = &passes[0].header;
        ProductHeader {
            area: first.area.clone(),
            source: sources.join(","),
            product: COMPOSITE_PRODUCT_TAG.to_string(),
            time,
            grid,
            projection: first.projection.clone(),
        }
    }

    /// Composite the passes of one tile, stamped with `time`
    pub fn composite(&self, passes: &[PassProduct], time: DateTime<Utc>) -> SnowResult<CompositeProduct> {
        let grid = Self::check_grids(passes)?;
        log::info!("Compositing {} passes over {}", passes.len(), grid);
        log::debug!("Compositor parameters: {:?}", self.params);

        let mut accumulator = Accumulator::new(&grid)?;
        for pass in passes {
            accumulator.accumulate(pass, self.params.cloud_threshold)?;
        }
        accumulator.finalize(Self::header(passes, grid, time), &self.params.scale)
    }

    /// Composite with passes folded into per-thread accumulators
    #[cfg(feature = "parallel")]
    pub fn composite_parallel(&self, passes: &[PassProduct], time: DateTime<Utc>) -> SnowResult<CompositeProduct> {
        use rayon::prelude::*;

        let grid = Self::check_grids(passes)?;
        log::info!("Compositing {} passes over {} in parallel", passes.len(), grid);

        let threads = rayon::current_num_threads().max(1);
        let chunk = ((passes.len() + threads - 1) / threads).max(1);
        let threshold = self.params.cloud_threshold;

        let accumulator = passes
            .par_chunks(chunk)
            .map(|group| -> SnowResult<Accumulator> {
                let mut accumulator = Accumulator::new(&grid)?;
                for pass in group {
                    accumulator.accumulate(pass, threshold)?;
                }
                Ok(accumulator)
            })
            .try_reduce_with(|mut a, b| {
                a.merge(&b)?;
                Ok(a)
            })
            .unwrap_or_else(|| Err(SnowError::Processing("no passes to composite".to_string())))?;

        accumulator.finalize(Self::header(passes, grid, time), &self.params.scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PassCategory, PixelStatus, TILE_PROJECTION};
    use approx::assert_abs_diff_eq;
    use chrono::TimeZone;
    use ndarray::Array2;

    fn grid() -> GridDefinition {
        GridDefinition { width: 2, height: 2, ax: 1.0, ay: 1.0, bx: -100.0, by: 100.0 }
    }

    fn time(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2009, 3, 1, hour, 0, 0).unwrap()
    }

    fn uniform_pass(ice: f32, free: f32, cloud: f32, hour: u32) -> PassProduct {
        let header = ProductHeader {
            area: "nr".into(),
            source: "NOAA-18".into(),
            product: "snowcover".into(),
            time: time(hour),
            grid: grid(),
            projection: TILE_PROJECTION.into(),
        };
        PassProduct::from_probabilities(
            header,
            Array2::from_elem((2, 2), ice),
            Array2::from_elem((2, 2), free),
            Array2::from_elem((2, 2), cloud),
            &ProbabilityScale::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_single_clear_pass() {
        let composite = TemporalCompositor::new()
            .composite(&[uniform_pass(0.9, 0.05, 0.05, 10)], time(12))
            .unwrap();
        assert_eq!(composite.class[[0, 0]], CompositeClass::IceSnow);
        assert_abs_diff_eq!(composite.p_ice[[0, 0]], 0.947_368, epsilon = 1e-5);
        assert_eq!(composite.bucket[[0, 0]], 19);
        assert_eq!(composite.cloudfree_count[[0, 0]], 1);
        assert_eq!(composite.header.product, COMPOSITE_PRODUCT_TAG);
    }

    #[test]
    fn test_cloud_threshold_filtering() {
        let passes = [
            uniform_pass(0.3, 0.2, 0.5, 8),
            uniform_pass(0.6, 0.3, 0.1, 10),
            uniform_pass(0.4, 0.3, 0.3, 12),
        ];
        let mut acc = Accumulator::new(&grid()).unwrap();
        for pass in &passes {
            acc.accumulate(pass, 0.2).unwrap();
        }
        assert_eq!(acc.counts(1, 1), (1, 2, 0, 3));

        let composite = acc.finalize(passes[0].header.clone(), &ProbabilityScale::default()).unwrap();
        assert_abs_diff_eq!(composite.p_ice[[1, 1]], 0.6f32 / 0.9, epsilon = 1e-6);
        assert_eq!(composite.class[[1, 1]], CompositeClass::IceSnow);
    }

    #[test]
    fn test_night_only_is_unclassified() {
        let passes: Vec<_> = (0..3).map(|h| uniform_pass(-990.0, -990.0, -990.0, h)).collect();
        let composite = TemporalCompositor::new().composite(&passes, time(12)).unwrap();
        assert_eq!(composite.class[[0, 1]], CompositeClass::Unclassified);
        assert_eq!(composite.bucket[[0, 1]], 0);
        assert_eq!(composite.p_ice[[0, 1]], MISSING_PROBABILITY);
    }

    #[test]
    fn test_unobserved_pixels_are_unclassified() {
        let acc = Accumulator::new(&grid()).unwrap();
        let header = uniform_pass(0.5, 0.5, 0.0, 0).header;
        let composite = acc.finalize(header, &ProbabilityScale::default()).unwrap();
        assert!(composite.class.iter().all(|c| *c == CompositeClass::Unclassified));
    }

    #[test]
    fn test_clouded_pixels() {
        let composite = TemporalCompositor::new()
            .composite(&[uniform_pass(0.1, 0.1, 0.8, 1), uniform_pass(-991.0, -991.0, -991.0, 2)], time(3))
            .unwrap();
        assert_eq!(composite.class[[0, 0]], CompositeClass::Clouded);
        assert_eq!(composite.cloudfree_count[[0, 0]], 0);
    }

    #[test]
    fn test_single_cloudless_pass_is_reproduced() {
        let pass = uniform_pass(0.3, 0.7, 0.0, 6);
        let composite = TemporalCompositor::new().composite(&[pass.clone()], time(12)).unwrap();
        assert_abs_diff_eq!(composite.p_ice[[0, 0]], pass.p_ice[[0, 0]], epsilon = 1e-6);
        assert_abs_diff_eq!(composite.p_clear[[0, 0]], pass.p_free[[0, 0]], epsilon = 1e-6);
        assert_eq!(composite.bucket[[0, 0]], pass.bucket[[0, 0]]);
        assert_eq!(composite.class[[0, 0]], CompositeClass::Clear);
        assert_eq!(pass.category[[0, 0]], PassCategory::Clear);
    }

    #[test]
    fn test_tie_is_unclassified() {
        let composite = TemporalCompositor::new()
            .composite(&[uniform_pass(0.45, 0.45, 0.1, 6)], time(12))
            .unwrap();
        assert_eq!(composite.class[[0, 0]], CompositeClass::Unclassified);
    }

    #[test]
    fn test_invalid_observations_are_skipped() {
        let mut pass = uniform_pass(0.5, 0.4, 0.1, 6);
        pass.p_ice[[0, 0]] = 0.9; // sum 1.3
        pass.p_cloud[[1, 0]] = -990.0; // partial sentinel
        pass.status[[1, 0]] = PixelStatus::Night;

        let mut acc = Accumulator::new(&grid()).unwrap();
        acc.accumulate(&pass, 0.2).unwrap();
        assert_eq!(acc.counts(0, 0), (0, 0, 0, 0));
        assert_eq!(acc.counts(1, 0), (0, 0, 0, 0));
        assert_eq!(acc.counts(1, 1), (1, 0, 0, 1));
        assert_eq!(acc.integrity_warnings(), 1);
    }

    #[test]
    fn test_invariant_violation_is_fatal() {
        let mut acc = Accumulator::new(&grid()).unwrap();
        acc.accumulate(&uniform_pass(0.5, 0.4, 0.1, 6), 0.2).unwrap();
        acc.total[[0, 1]] += 1;
        let err = acc
            .finalize(uniform_pass(0.5, 0.4, 0.1, 6).header, &ProbabilityScale::default())
            .unwrap_err();
        assert!(matches!(err, SnowError::InvariantViolation { row: 0, col: 1, total: 2, .. }));
    }

    #[test]
    fn test_grid_mismatch_is_fatal() {
        let mut other = uniform_pass(0.5, 0.4, 0.1, 8);
        other.header.grid.bx += 1.0;
        let result = TemporalCompositor::new().composite(&[uniform_pass(0.5, 0.4, 0.1, 6), other], time(12));
        assert!(matches!(result, Err(SnowError::GridMismatch(_))));
        assert!(TemporalCompositor::new().composite(&[], time(12)).is_err());
    }

    #[test]
    fn test_threshold_validation() {
        for threshold in [0.0f32, -0.1, 1.5, f32::NAN] {
            let params = CompositorParams { cloud_threshold: threshold, ..CompositorParams::default() };
            assert!(TemporalCompositor::with_params(params).is_err());
        }
    }

    #[test]
    fn test_merge_matches_sequential_fold() {
        let passes = [
            uniform_pass(0.7, 0.2, 0.1, 1),
            uniform_pass(0.2, 0.3, 0.5, 2),
            uniform_pass(-990.0, -990.0, -990.0, 3),
            uniform_pass(0.1, 0.8, 0.1, 4),
        ];
        let mut all = Accumulator::new(&grid()).unwrap();
        for pass in &passes {
            all.accumulate(pass, 0.2).unwrap();
        }
        let mut left = Accumulator::new(&grid()).unwrap();
        let mut right = Accumulator::new(&grid()).unwrap();
        for pass in &passes[..2] {
            left.accumulate(pass, 0.2).unwrap();
        }
        for pass in &passes[2..] {
            right.accumulate(pass, 0.2).unwrap();
        }
        right.merge(&left).unwrap();

        assert_eq!(right.counts(0, 0), all.counts(0, 0));
        assert_eq!(right.passes(), 4);
        assert_abs_diff_eq!(right.ice_sum[[0, 0]], all.ice_sum[[0, 0]], epsilon = 1e-12);
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_parallel_composite_matches_sequential() {
        let passes: Vec<_> = (0..9)
            .map(|h| {
                let ice = 0.1 * (h % 5) as f32;
                let cloud = 0.15 * (h % 3) as f32;
                uniform_pass(ice, 1.0 - ice - cloud, cloud, h)
            })
            .collect();
        let compositor = TemporalCompositor::new();
        let seq = compositor.composite(&passes, time(23)).unwrap();
        let par = compositor.composite_parallel(&passes, time(23)).unwrap();
        assert_eq!(seq.class, par.class);
        assert_eq!(seq.cloudfree_count, par.cloudfree_count);
        for (a, b) in seq.p_ice.iter().zip(par.p_ice.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        }
    }
}
