//! Per-pixel Bayesian surface classification of one overpass.
//!
//! Each pixel is resolved once into a `PixelVariant` (sea, land or coastal
//! regime crossed with the 3A or 3B illumination path). The variant picks
//! the feature set and the surface classes that feed the three posterior
//! buckets: ice-like, free (open water or bare land) and cloud.

use crate::core::bucket::ProbabilityScale;
use crate::core::coefficients::CoefficientTable;
use crate::core::geometry::{ch3b_reflectance, solar_zenith_field};
use crate::types::{
    satellite_key, Channel, Feature, LandMask, PassCategory, PassProduct, PixelStatus, ProductHeader,
    RadiometerScene, SnowError, SnowResult, SurfaceClass, TILE_PROJECTION,
};
use chrono::Datelike;
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Product tag written into pass headers
pub const PASS_PRODUCT_TAG: &str = "snowcover";

/// Prior probabilities of the three posterior buckets
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Priors {
    pub ice_like: f64,
    pub free: f64,
    pub cloud: f64,
}

impl Default for Priors {
    fn default() -> Self {
        Self {
            ice_like: 0.5,
            free: 0.5,
            cloud: 0.5,
        }
    }
}

/// Whether snow contributes to the ice-like bucket over coastal pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoastalSnow {
    Never,
    Always,
    /// Only where the land fraction reaches this mask value
    FromMask(u8),
}

impl CoastalSnow {
    fn admits(self, mask: u8) -> bool {
        match self {
            CoastalSnow::Never => false,
            CoastalSnow::Always => true,
            CoastalSnow::FromMask(min) => mask >= min,
        }
    }
}

/// Classifier parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierParams {
    /// Solar zenith (degrees) at or beyond which a pixel is night
    pub twilight_zenith: f32,
    /// Raw Ch4 count above which a missing Ch3A reading means saturation
    pub saturation_ch4_count: u8,
    /// Largest land mask value still treated as open sea
    pub sea_mask_max: u8,
    /// Smallest land mask value treated as land; values between are coastal
    pub land_mask_min: u8,
    /// Split pixels into sea, land and coastal regimes when a mask is present
    pub use_land_mask: bool,
    /// Add the NWP surface temperature minus T4 feature
    pub use_nwp: bool,
    /// Snow contribution to the ice-like bucket over coastal pixels
    pub coastal_snow: CoastalSnow,
    /// Prior weights of the ice-like, free and cloud buckets
    pub priors: Priors,
    /// Largest accepted deviation of the posterior sum from one
    pub posterior_tolerance: f64,
    /// Satellites refused by the classifier, compared by `satellite_key`
    pub excluded_satellites: Vec<String>,
    /// Quantizer of the pass bucket layer
    pub scale: ProbabilityScale,
}

impl Default for ClassifierParams {
    fn default() -> Self {
        Self {
            twilight_zenith: 85.0,      // degrees, night at or beyond
            saturation_ch4_count: 50,   // raw Ch4 count for the 3A dropout rule
            sea_mask_max: 0,            // land mask value still counted as sea
            land_mask_min: 191,         // land mask value counted as land
            use_land_mask: true,        // falls back to all sea without a mask
            use_nwp: false,             // no NWP field by default
            coastal_snow: CoastalSnow::Always, // ice and snow averaged on coasts
            priors: Priors::default(),  // equal weights
            posterior_tolerance: 0.05,  // allowed deviation of the posterior sum
            excluded_satellites: vec!["NOAA-15".to_string(), "NOAA-16".to_string()], // refused platforms
            scale: ProbabilityScale::default(), // 20 buckets of 0.05
        }
    }
}

/// Surface partition of a pixel from the land mask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime {
    Sea,
    Land,
    Coastal { mask: u8 },
}

/// Which near-infrared ratio is available
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IlluminationPath {
    /// 1.6 um channel active
    Visible3A,
    /// 3.7 um channel active, reflective part derived
    Reflective3B,
}

impl IlluminationPath {
    pub fn ratio_feature(self) -> Feature {
        match self {
            IlluminationPath::Visible3A => Feature::R3a1,
            IlluminationPath::Reflective3B => Feature::R3b1,
        }
    }
}

/// Regime and illumination path of one pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelVariant {
    pub regime: Regime,
    pub path: IlluminationPath,
}

/// Observation of one pixel, calibrated
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelObservation {
    pub raw_ch3a: u8,
    pub raw_ch3b: u8,
    pub raw_ch4: u8,
    pub raw_ch5: u8,
    pub a1: Option<f32>, // percent, None without channel 1
    pub a2: Option<f32>, // percent, None without channel 2
    pub a3: f32,         // percent
    pub t3: f32,         // kelvin
    pub t4: f32,         // kelvin
    pub solar_zenith: f32,
    pub land_mask: Option<u8>,
    pub nwp_temperature: Option<f32>,
}

/// Feature values of one pixel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector {
    pub a1: f64,
    pub r21: f64,
    pub ratio: f64,
    pub ratio_feature: Feature,
    pub dt: Option<f64>,
}

/// Class likelihoods mapped to the three posterior buckets
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketLikelihoods {
    pub ice_like: f64,
    pub free: f64,
    pub cloud: f64,
}

/// Posterior probabilities of the three buckets
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Posterior {
    pub ice_like: f64,
    pub free: f64,
    pub cloud: f64,
}

impl Posterior {
    pub fn sum(&self) -> f64 {
        self.ice_like + self.free + self.cloud
    }

    pub fn category(&self) -> PassCategory {
        PassCategory::arg_max(self.ice_like, self.free, self.cloud)
    }
}

/// Result for one pixel; `posterior` is set only for `PixelStatus::Ok`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelOutcome {
    pub status: PixelStatus,
    pub posterior: Option<Posterior>,
}

impl PixelOutcome {
    fn flagged(status: PixelStatus) -> Self {
        Self { status, posterior: None }
    }

    fn layer_values(&self) -> (f32, f32, f32) {
        match (self.posterior, self.status.sentinel()) {
            (Some(p), _) => (p.ice_like as f32, p.free as f32, p.cloud as f32),
            (None, Some(s)) => (s, s, s),
            (None, None) => (f32::NAN, f32::NAN, f32::NAN),
        }
    }
}

/// Densities outside their domain count as zero likelihood
#[inline]
fn likelihood_factor(density: f64) -> f64 {
    if density < 0.0 {
        0.0
    } else {
        density
    }
}

/// Product of the feature densities of one surface class
fn class_likelihood(table: &CoefficientTable, surface: SurfaceClass, features: &FeatureVector) -> f64 {
    let mut l = likelihood_factor(table.density(surface, Feature::A1, features.a1))
        * likelihood_factor(table.density(surface, Feature::R21, features.r21))
        * likelihood_factor(table.density(surface, features.ratio_feature, features.ratio));
    if let Some(dt) = features.dt {
        l *= likelihood_factor(table.density(surface, Feature::Dt, dt));
    }
    l
}

fn sea_likelihoods(table: &CoefficientTable, features: &FeatureVector) -> BucketLikelihoods {
    BucketLikelihoods {
        ice_like: class_likelihood(table, SurfaceClass::Ice, features),
        free: class_likelihood(table, SurfaceClass::Water, features),
        cloud: class_likelihood(table, SurfaceClass::Cloud, features),
    }
}

fn land_likelihoods(table: &CoefficientTable, features: &FeatureVector) -> BucketLikelihoods {
    BucketLikelihoods {
        ice_like: class_likelihood(table, SurfaceClass::Snow, features),
        free: class_likelihood(table, SurfaceClass::Land, features),
        cloud: class_likelihood(table, SurfaceClass::Cloud, features),
    }
}

fn coastal_likelihoods(table: &CoefficientTable, features: &FeatureVector, with_snow: bool) -> BucketLikelihoods {
    let ice = class_likelihood(table, SurfaceClass::Ice, features);
    let ice_like = if with_snow {
        0.5 * (ice + class_likelihood(table, SurfaceClass::Snow, features))
    } else {
        ice
    };
    BucketLikelihoods {
        ice_like,
        free: 0.5
            * (class_likelihood(table, SurfaceClass::Water, features)
                + class_likelihood(table, SurfaceClass::Land, features)),
        cloud: class_likelihood(table, SurfaceClass::Cloud, features),
    }
}

/// Bayes combination with normalization over the three buckets
pub fn bayes_posterior(likelihoods: &BucketLikelihoods, priors: &Priors) -> Posterior {
    let ice_like = priors.ice_like * likelihoods.ice_like;
    let free = priors.free * likelihoods.free;
    let cloud = priors.cloud * likelihoods.cloud;
    let evidence = ice_like + free + cloud;
    Posterior {
        ice_like: ice_like / evidence,
        free: free / evidence,
        cloud: cloud / evidence,
    }
}

/// Per-pass classifier holding a validated coefficient table
#[derive(Debug, Clone)]
pub struct PassClassifier {
    table: CoefficientTable,
    params: ClassifierParams,
}

/// Inputs resolved once per pass
struct PassContext<'a> {
    scene: &'a RadiometerScene,
    land_mask: Option<&'a Array2<u8>>,
    nwp: Option<&'a Array2<f32>>,
    solar_zenith: std::borrow::Cow<'a, Array2<f32>>,
    day_of_year: u32,
}

impl PassClassifier {
    /// Build a classifier with default parameters
    pub fn new(table: CoefficientTable) -> SnowResult<Self> {
        Self::with_params(table, ClassifierParams::default())
    }

    /// Build a classifier, validating the coefficient table for every
    /// (class, feature) pair the parameters can reach
    pub fn with_params(table: CoefficientTable, params: ClassifierParams) -> SnowResult<Self> {
        let priors = [params.priors.ice_like, params.priors.free, params.priors.cloud];
        if priors.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(SnowError::Config(format!("priors must be positive, got {:?}", params.priors)));
        }
        if params.sea_mask_max >= params.land_mask_min {
            return Err(SnowError::Config(format!(
                "sea mask maximum {} must lie below land mask minimum {}",
                params.sea_mask_max, params.land_mask_min
            )));
        }
        if !(params.posterior_tolerance > 0.0 && params.posterior_tolerance < 1.0) {
            return Err(SnowError::Config(format!(
                "posterior tolerance {} outside (0, 1)",
                params.posterior_tolerance
            )));
        }

        table.validate(&Self::required_pairs(&params))?;
        log::debug!("Classifier parameters: {:?}", params);
        Ok(Self { table, params })
    }

    /// Every (class, feature) pair evaluated under `params`
    pub fn required_pairs(params: &ClassifierParams) -> Vec<(SurfaceClass, Feature)> {
        let mut classes = vec![SurfaceClass::Ice, SurfaceClass::Water, SurfaceClass::Cloud];
        if params.use_land_mask {
            classes.extend([SurfaceClass::Snow, SurfaceClass::Land]);
        }
        let mut features = vec![Feature::A1, Feature::R21, Feature::R3a1, Feature::R3b1];
        if params.use_nwp {
            features.push(Feature::Dt);
        }
        classes
            .iter()
            .flat_map(|&c| features.iter().map(move |&f| (c, f)))
            .collect()
    }

    pub fn params(&self) -> &ClassifierParams {
        &self.params
    }

    pub fn table(&self) -> &CoefficientTable {
        &self.table
    }

    fn regime(&self, land_mask: Option<u8>) -> Regime {
        match land_mask {
            None => Regime::Sea,
            Some(v) if v <= self.params.sea_mask_max => Regime::Sea,
            Some(v) if v >= self.params.land_mask_min => Regime::Land,
            Some(v) => Regime::Coastal { mask: v },
        }
    }

    fn features(&self, obs: &PixelObservation, path: IlluminationPath, a1: f32, a2: f32, day_of_year: u32) -> FeatureVector {
        let a1 = a1 as f64;
        let cos_zenith = (obs.solar_zenith as f64).to_radians().cos();
        let reflectance_3 = match path {
            IlluminationPath::Visible3A => obs.a3 as f64,
            IlluminationPath::Reflective3B => {
                ch3b_reflectance(obs.t3, obs.t4, obs.solar_zenith, day_of_year) as f64
            }
        };
        FeatureVector {
            a1: a1 / cos_zenith,
            r21: a2 as f64 / a1,
            ratio: reflectance_3 / a1,
            ratio_feature: path.ratio_feature(),
            dt: if self.params.use_nwp {
                obs.nwp_temperature.map(|t| t as f64 - obs.t4 as f64)
            } else {
                None
            },
        }
    }

    /// Likelihoods of the three buckets for a resolved variant
    pub fn likelihoods(&self, variant: &PixelVariant, features: &FeatureVector) -> BucketLikelihoods {
        match variant.regime {
            Regime::Sea => sea_likelihoods(&self.table, features),
            Regime::Land => land_likelihoods(&self.table, features),
            Regime::Coastal { mask } => {
                coastal_likelihoods(&self.table, features, self.params.coastal_snow.admits(mask))
            }
        }
    }

    /// Classify one pixel. Never fails: problems become a status.
    pub fn classify_pixel(&self, obs: &PixelObservation, day_of_year: u32) -> PixelOutcome {
        if obs.solar_zenith >= self.params.twilight_zenith {
            return PixelOutcome::flagged(PixelStatus::Night);
        }
        if obs.raw_ch4 == 0 && obs.raw_ch5 == 0 {
            return PixelOutcome::flagged(PixelStatus::NoCoverage);
        }

        let path = if obs.raw_ch3b > 0 && obs.raw_ch3a == 0 {
            IlluminationPath::Reflective3B
        } else {
            IlluminationPath::Visible3A
        };
        if path == IlluminationPath::Visible3A
            && obs.raw_ch3a == 0
            && obs.raw_ch4 > self.params.saturation_ch4_count
        {
            return PixelOutcome::flagged(PixelStatus::Saturated);
        }
        let (a1, a2) = match (obs.a1, obs.a2) {
            (Some(a1), Some(a2)) => (a1, a2),
            _ => return PixelOutcome::flagged(PixelStatus::ChannelUnavailable),
        };

        let variant = PixelVariant {
            regime: self.regime(obs.land_mask),
            path,
        };
        let features = self.features(obs, path, a1, a2, day_of_year);
        let posterior = bayes_posterior(&self.likelihoods(&variant, &features), &self.params.priors);

        let sum = posterior.sum();
        if sum.is_nan() || (sum - 1.0).abs() > self.params.posterior_tolerance {
            return PixelOutcome::flagged(PixelStatus::Rejected);
        }
        PixelOutcome {
            status: PixelStatus::Ok,
            posterior: Some(posterior),
        }
    }

    fn observe(ctx: &PassContext<'_>, row: usize, col: usize, solar_zenith: f32) -> PixelObservation {
        let scene = ctx.scene;
        PixelObservation {
            raw_ch3a: scene.count(Channel::Ch3A, row, col),
            raw_ch3b: scene.count(Channel::Ch3B, row, col),
            raw_ch4: scene.count(Channel::Ch4, row, col),
            raw_ch5: scene.count(Channel::Ch5, row, col),
            a1: scene.physical(Channel::Ch1, row, col),
            a2: scene.physical(Channel::Ch2, row, col),
            a3: scene.physical(Channel::Ch3A, row, col).unwrap_or(0.0),
            t3: scene.physical(Channel::Ch3B, row, col).unwrap_or(0.0),
            t4: scene.physical(Channel::Ch4, row, col).unwrap_or(0.0),
            solar_zenith,
            land_mask: ctx.land_mask.map(|m| m[[row, col]]),
            nwp_temperature: ctx.nwp.map(|n| n[[row, col]]),
        }
    }

    fn prepare<'a>(
        &self,
        scene: &'a RadiometerScene,
        land_mask: Option<&'a LandMask>,
        nwp: Option<&'a Array2<f32>>,
    ) -> SnowResult<PassContext<'a>> {
        let header = &scene.header;
        let sat = satellite_key(&header.satellite);
        if self.params.excluded_satellites.iter().any(|s| satellite_key(s) == sat) {
            return Err(SnowError::UnsupportedSatellite(header.satellite.clone()));
        }
        scene.check_dims()?;

        let land_mask = match (self.params.use_land_mask, land_mask) {
            (true, Some(mask)) => {
                if !mask.grid.matches_within_tenth_km(&header.grid) {
                    return Err(SnowError::GridMismatch(format!(
                        "land mask grid {} does not match scene grid {}",
                        mask.grid, header.grid
                    )));
                }
                header.grid.check_dim("land mask", mask.values.dim())?;
                Some(&mask.values)
            }
            (true, None) => {
                log::warn!(
                    "Land mask unavailable for tile {}; sea, ice and cloud coefficients used throughout",
                    header.area
                );
                None
            }
            (false, Some(_)) => {
                log::warn!("Land mask supplied but disabled; classifying every pixel as sea");
                None
            }
            (false, None) => None,
        };

        let nwp = match (self.params.use_nwp, nwp) {
            (true, Some(field)) => {
                header.grid.check_dim("NWP field", field.dim())?;
                Some(field)
            }
            (true, None) => {
                return Err(SnowError::Config(format!(
                    "NWP surface temperature required for tile {}",
                    header.area
                )))
            }
            (false, _) => None,
        };

        let solar_zenith = match &scene.solar_zenith {
            Some(field) => std::borrow::Cow::Borrowed(field),
            None => std::borrow::Cow::Owned(solar_zenith_field(&header.grid, &header.time)),
        };

        Ok(PassContext {
            scene,
            land_mask,
            nwp,
            solar_zenith,
            day_of_year: header.time.ordinal(),
        })
    }

    /// Classify a whole pass
    pub fn classify(
        &self,
        scene: &RadiometerScene,
        land_mask: Option<&LandMask>,
        nwp: Option<&Array2<f32>>,
    ) -> SnowResult<PassProduct> {
        log::info!(
            "Classifying {} pass over {} at {} ({}x{})",
            scene.header.satellite,
            scene.header.area,
            scene.header.time,
            scene.header.grid.height,
            scene.header.grid.width
        );
        let ctx = self.prepare(scene, land_mask, nwp)?;
        let outcomes = Zip::indexed(&*ctx.solar_zenith).map_collect(|(row, col), &soz| {
            self.classify_pixel(&Self::observe(&ctx, row, col, soz), ctx.day_of_year)
        });
        Ok(self.assemble(scene, outcomes))
    }

    /// Classify a whole pass with rows distributed over the rayon pool
    #[cfg(feature = "parallel")]
    pub fn classify_parallel(
        &self,
        scene: &RadiometerScene,
        land_mask: Option<&LandMask>,
        nwp: Option<&Array2<f32>>,
    ) -> SnowResult<PassProduct> {
        log::info!(
            "Classifying {} pass over {} at {} in parallel",
            scene.header.satellite,
            scene.header.area,
            scene.header.time
        );
        let ctx = self.prepare(scene, land_mask, nwp)?;
        let outcomes = Zip::indexed(&*ctx.solar_zenith).par_map_collect(|(row, col), &soz| {
            self.classify_pixel(&Self::observe(&ctx, row, col, soz), ctx.day_of_year)
        });
        Ok(self.assemble(scene, outcomes))
    }

    fn assemble(&self, scene: &RadiometerScene, outcomes: Array2<PixelOutcome>) -> PassProduct {
        let scale = &self.params.scale;
        let values = outcomes.map(|o| o.layer_values());

        let product = PassProduct {
            header: ProductHeader {
                area: scene.header.area.clone(),
                source: scene.header.satellite.clone(),
                product: PASS_PRODUCT_TAG.to_string(),
                time: scene.header.time,
                grid: scene.header.grid.clone(),
                projection: TILE_PROJECTION.to_string(),
            },
            p_ice: values.map(|v| v.0),
            p_free: values.map(|v| v.1),
            p_cloud: values.map(|v| v.2),
            status: outcomes.map(|o| o.status),
            bucket: outcomes.map(|o| o.posterior.map_or(0, |p| scale.bucket(p.ice_like))),
            category: outcomes.map(|o| o.posterior.map_or(PassCategory::Undefined, |p| p.category())),
        };

        let classified = product.status.iter().filter(|s| **s == PixelStatus::Ok).count();
        let night = product.status.iter().filter(|s| **s == PixelStatus::Night).count();
        let rejected = product.status.iter().filter(|s| **s == PixelStatus::Rejected).count();
        log::info!(
            "Pass classified: {} of {} pixels, {} night, {} rejected",
            classified,
            product.status.len(),
            night,
            rejected
        );
        product
    }
}
