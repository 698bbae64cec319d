use crate::core::bucket::ProbabilityScale;
use chrono::{DateTime, Utc};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-pixel probability layer
pub type ProbabilityImage = Array2<f32>;

/// Raw 8-bit radiometer counts
pub type CountImage = Array2<u8>;

/// Probability written where no cloud-free observation exists
pub const MISSING_PROBABILITY: f32 = -199.0;

/// AVHRR channel identities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    Ch1,  // 0.6 um reflectance
    Ch2,  // 0.8 um reflectance
    Ch3A, // 1.6 um reflectance
    Ch3B, // 3.7 um brightness temperature
    Ch4,  // 11 um brightness temperature
    Ch5,  // 12 um brightness temperature
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Ch1 => write!(f, "1"),
            Channel::Ch2 => write!(f, "2"),
            Channel::Ch3A => write!(f, "3A"),
            Channel::Ch3B => write!(f, "3B"),
            Channel::Ch4 => write!(f, "4"),
            Channel::Ch5 => write!(f, "5"),
        }
    }
}

/// Linear count-to-physical conversion of one channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelCalibration {
    pub gain: f32,
    pub intercept: f32,
}

impl ChannelCalibration {
    pub fn new(gain: f32, intercept: f32) -> Self {
        Self { gain, intercept }
    }

    /// Physical value (percent or kelvin) of a raw count
    #[inline]
    pub fn apply(&self, count: u8) -> f32 {
        self.gain * count as f32 + self.intercept
    }
}

/// Tile grid on the polar stereographic plane (sphere R=6371 km,
/// true latitude 60N, central meridian 0E)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridDefinition {
    pub width: usize,
    pub height: usize,
    pub ax: f64, // pixel size along x in km
    pub ay: f64, // pixel size along y in km
    pub bx: f64, // upper left x in km
    pub by: f64, // upper left y in km
}

impl GridDefinition {
    /// Array shape (rows, cols)
    pub fn dim(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Projection-plane coordinates (km) of a cell
    pub fn cell_xy(&self, row: usize, col: usize) -> (f64, f64) {
        (self.bx + col as f64 * self.ax, self.by - row as f64 * self.ay)
    }

    /// Bit-exact comparison of dimensions, pixel size and corner
    pub fn matches_exactly(&self, other: &GridDefinition) -> bool {
        self == other
    }

    /// Same dimensions, and pixel size and corner agree to 0.1 km
    pub fn matches_within_tenth_km(&self, other: &GridDefinition) -> bool {
        let tenth = |v: f64| (v * 10.0).floor();
        self.width == other.width
            && self.height == other.height
            && tenth(self.ax) == tenth(other.ax)
            && tenth(self.ay) == tenth(other.ay)
            && tenth(self.bx) == tenth(other.bx)
            && tenth(self.by) == tenth(other.by)
    }

    /// Fail with `GridMismatch` unless `array_dim` is the grid shape
    pub fn check_dim(&self, what: &str, array_dim: (usize, usize)) -> SnowResult<()> {
        if array_dim != self.dim() {
            return Err(SnowError::GridMismatch(format!(
                "{} is {}x{}, grid is {}x{}",
                what, array_dim.0, array_dim.1, self.height, self.width
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for GridDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{} Ax={} Ay={} Bx={} By={}",
            self.width, self.height, self.ax, self.ay, self.bx, self.by
        )
    }
}

/// Surface classes with fitted densities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SurfaceClass {
    Ice,
    Snow,
    Cloud,
    Water,
    Land,
}

impl SurfaceClass {
    pub const ALL: [SurfaceClass; 5] = [
        SurfaceClass::Ice,
        SurfaceClass::Snow,
        SurfaceClass::Cloud,
        SurfaceClass::Water,
        SurfaceClass::Land,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ice" => Some(SurfaceClass::Ice),
            "snow" => Some(SurfaceClass::Snow),
            "cloud" => Some(SurfaceClass::Cloud),
            "water" => Some(SurfaceClass::Water),
            "land" => Some(SurfaceClass::Land),
            _ => None,
        }
    }
}

impl std::fmt::Display for SurfaceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SurfaceClass::Ice => write!(f, "ice"),
            SurfaceClass::Snow => write!(f, "snow"),
            SurfaceClass::Cloud => write!(f, "cloud"),
            SurfaceClass::Water => write!(f, "water"),
            SurfaceClass::Land => write!(f, "land"),
        }
    }
}

/// Classification features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Feature {
    A1,   // Ch1 reflectance over cos(solar zenith)
    R21,  // A2/A1
    R3a1, // A3/A1, 3A path
    R3b1, // A3b/A1, 3B path
    Dt,   // NWP surface temperature minus T4
    /// Deprecated T3 - T4 difference; parsed, never evaluated
    D34,
}

impl Feature {
    pub const ALL: [Feature; 6] = [
        Feature::A1,
        Feature::R21,
        Feature::R3a1,
        Feature::R3b1,
        Feature::Dt,
        Feature::D34,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "a1" => Some(Feature::A1),
            "r21" => Some(Feature::R21),
            "r3a1" => Some(Feature::R3a1),
            "r3b1" => Some(Feature::R3b1),
            "dt" => Some(Feature::Dt),
            "d34" => Some(Feature::D34),
            _ => None,
        }
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Feature::A1 => write!(f, "a1"),
            Feature::R21 => write!(f, "r21"),
            Feature::R3a1 => write!(f, "r3a1"),
            Feature::R3b1 => write!(f, "r3b1"),
            Feature::Dt => write!(f, "dt"),
            Feature::D34 => write!(f, "d34"),
        }
    }
}

/// Outcome of classifying one pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelStatus {
    Ok,
    NoCoverage,
    Night,
    ChannelUnavailable,
    Saturated,
    /// Posterior failed the normalization check
    Rejected,
}

impl PixelStatus {
    pub fn code(self) -> u8 {
        match self {
            PixelStatus::Ok => 0,
            PixelStatus::NoCoverage => 1,
            PixelStatus::Night => 2,
            PixelStatus::ChannelUnavailable => 3,
            PixelStatus::Saturated => 4,
            PixelStatus::Rejected => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(PixelStatus::Ok),
            1 => Some(PixelStatus::NoCoverage),
            2 => Some(PixelStatus::Night),
            3 => Some(PixelStatus::ChannelUnavailable),
            4 => Some(PixelStatus::Saturated),
            5 => Some(PixelStatus::Rejected),
            _ => None,
        }
    }

    /// Float written into all three probability layers, `None` for `Ok`
    pub fn sentinel(self) -> Option<f32> {
        match self {
            PixelStatus::Ok => None,
            PixelStatus::NoCoverage | PixelStatus::Rejected => Some(-991.0),
            PixelStatus::Night => Some(-990.0),
            PixelStatus::ChannelUnavailable | PixelStatus::Saturated => Some(-993.0),
        }
    }

    /// Status encoded by a sentinel triple, for layers stored without status
    pub fn from_sentinel_triple(ice: f32, free: f32, cloud: f32) -> Option<Self> {
        if ice != free || ice != cloud {
            return None;
        }
        if ice == -991.0 {
            Some(PixelStatus::NoCoverage)
        } else if ice == -990.0 {
            Some(PixelStatus::Night)
        } else if ice == -993.0 {
            Some(PixelStatus::ChannelUnavailable)
        } else {
            None
        }
    }

    pub fn is_undefined(self) -> bool {
        self != PixelStatus::Ok
    }
}

/// Arg-max category of a single pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassCategory {
    IceSnow = 1,
    Clear = 2,
    Cloud = 3,
    Unclassified = 4,
    Undefined = 5,
}

impl PassCategory {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(PassCategory::IceSnow),
            2 => Some(PassCategory::Clear),
            3 => Some(PassCategory::Cloud),
            4 => Some(PassCategory::Unclassified),
            5 => Some(PassCategory::Undefined),
            _ => None,
        }
    }

    /// Strictly largest probability wins, ties are unclassified
    pub fn arg_max(ice: f64, free: f64, cloud: f64) -> Self {
        if ice > free && ice > cloud {
            PassCategory::IceSnow
        } else if free > ice && free > cloud {
            PassCategory::Clear
        } else if cloud > ice && cloud > free {
            PassCategory::Cloud
        } else {
            PassCategory::Unclassified
        }
    }
}

/// Class of a temporal composite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompositeClass {
    IceSnow = 1,
    Clear = 2,
    Unclassified = 3,
    Clouded = 4,
    Undefined = 5,
}

impl CompositeClass {
    pub const LEGEND: [&'static str; 5] = [
        "1: Ice/snow",
        "2: Clear",
        "3: Unclass",
        "4: Clouded",
        "5: Undef",
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(CompositeClass::IceSnow),
            2 => Some(CompositeClass::Clear),
            3 => Some(CompositeClass::Unclassified),
            4 => Some(CompositeClass::Clouded),
            5 => Some(CompositeClass::Undefined),
            _ => None,
        }
    }
}

/// Product identification shared by pass and composite products
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductHeader {
    pub area: String,     // tile code
    pub source: String,   // satellite id(s)
    pub product: String,  // product tag
    pub time: DateTime<Utc>,
    pub grid: GridDefinition,
    pub projection: String,
}

/// Calibrated counts of one channel
#[derive(Debug, Clone)]
pub struct ChannelData {
    pub counts: CountImage,
    pub calibration: ChannelCalibration,
}

/// Scene identification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneHeader {
    pub satellite: String,
    pub area: String, // tile code
    pub time: DateTime<Utc>,
    pub grid: GridDefinition,
}

/// Comparison key of a satellite name: ASCII alphanumerics, lowercase.
/// "NOAA-18", "noaa 18" and "noaa18" share the key "noaa18".
pub fn satellite_key(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

/// One overpass of raw radiometer counts on a tile grid
#[derive(Debug, Clone)]
pub struct RadiometerScene {
    pub header: SceneHeader,
    pub channels: BTreeMap<Channel, ChannelData>,
    /// Precomputed solar zenith in degrees, derived from grid and time if absent
    pub solar_zenith: Option<Array2<f32>>,
}

impl RadiometerScene {
    pub fn new(header: SceneHeader) -> Self {
        Self {
            header,
            channels: BTreeMap::new(),
            solar_zenith: None,
        }
    }

    pub fn with_channel(mut self, channel: Channel, counts: CountImage, calibration: ChannelCalibration) -> Self {
        self.channels.insert(channel, ChannelData { counts, calibration });
        self
    }

    pub fn with_solar_zenith(mut self, solar_zenith: Array2<f32>) -> Self {
        self.solar_zenith = Some(solar_zenith);
        self
    }

    pub fn has_channel(&self, channel: Channel) -> bool {
        self.channels.contains_key(&channel)
    }

    /// Raw count, 0 when the channel is absent
    #[inline]
    pub fn count(&self, channel: Channel, row: usize, col: usize) -> u8 {
        self.channels.get(&channel).map_or(0, |c| c.counts[[row, col]])
    }

    /// Calibrated value, `None` when the channel is absent
    #[inline]
    pub fn physical(&self, channel: Channel, row: usize, col: usize) -> Option<f32> {
        self.channels
            .get(&channel)
            .map(|c| c.calibration.apply(c.counts[[row, col]]))
    }

    /// Check every layer against the header grid
    pub fn check_dims(&self) -> SnowResult<()> {
        for (channel, data) in &self.channels {
            self.header.grid.check_dim(&format!("channel {}", channel), data.counts.dim())?;
        }
        if let Some(soz) = &self.solar_zenith {
            self.header.grid.check_dim("solar zenith field", soz.dim())?;
        }
        Ok(())
    }
}

/// Land fraction mask: 0 sea, up to 255 land
#[derive(Debug, Clone)]
pub struct LandMask {
    pub grid: GridDefinition,
    pub values: Array2<u8>,
}

/// Classified single overpass
#[derive(Debug, Clone)]
pub struct PassProduct {
    pub header: ProductHeader,
    pub p_ice: ProbabilityImage,
    pub p_free: ProbabilityImage,
    pub p_cloud: ProbabilityImage,
    pub status: Array2<PixelStatus>,
    pub bucket: Array2<u8>,
    pub category: Array2<PassCategory>,
}

impl PassProduct {
    /// Product from bare probability layers; status is recovered from the
    /// sentinel triples and any other out-of-range pixel is `Rejected`
    pub fn from_probabilities(
        header: ProductHeader,
        p_ice: ProbabilityImage,
        p_free: ProbabilityImage,
        p_cloud: ProbabilityImage,
        scale: &ProbabilityScale,
    ) -> SnowResult<Self> {
        header.grid.check_dim("P(ice)", p_ice.dim())?;
        header.grid.check_dim("P(free)", p_free.dim())?;
        header.grid.check_dim("P(cloud)", p_cloud.dim())?;

        let valid = |v: f32| (0.0..=1.0).contains(&v);
        let status = Zip::from(&p_ice).and(&p_free).and(&p_cloud).map_collect(|&i, &f, &c| {
            if valid(i) && valid(f) && valid(c) {
                PixelStatus::Ok
            } else {
                PixelStatus::from_sentinel_triple(i, f, c).unwrap_or(PixelStatus::Rejected)
            }
        });
        let bucket = Zip::from(&p_ice).and(&status).map_collect(|&i, s| {
            if s.is_undefined() { 0 } else { scale.bucket(i) }
        });
        let category = Zip::from(&p_ice).and(&p_free).and(&p_cloud).and(&status).map_collect(|&i, &f, &c, s| {
            if s.is_undefined() {
                PassCategory::Undefined
            } else {
                PassCategory::arg_max(i as f64, f as f64, c as f64)
            }
        });

        Ok(Self { header, p_ice, p_free, p_cloud, status, bucket, category })
    }
}

/// Cloud-filtered temporal composite of one tile
#[derive(Debug, Clone)]
pub struct CompositeProduct {
    pub header: ProductHeader,
    pub class: Array2<CompositeClass>,
    pub bucket: Array2<u8>,
    pub p_ice: ProbabilityImage,   // MISSING_PROBABILITY without cloud-free passes
    pub p_clear: ProbabilityImage, // MISSING_PROBABILITY without cloud-free passes
    pub cloudfree_count: Array2<u32>,
}

/// Proj string of the tile projection
pub const TILE_PROJECTION: &str =
    "+proj=stere +a=6371000 +b=6371000 +lat_0=90 +lat_ts=60 +lon_0=0 +units=km";

/// Which failure category an error belongs to at the process boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Io,
    Memory,
    Other,
}

impl FailureKind {
    pub fn exit_code(self) -> i32 {
        match self {
            FailureKind::Io => 2,
            FailureKind::Memory => 3,
            FailureKind::Other => 10,
        }
    }
}

/// Error types for snow and ice processing
#[derive(Debug, thiserror::Error)]
pub enum SnowError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No coefficients for {surface}/{feature}")]
    MissingCoefficient {
        surface: SurfaceClass,
        feature: Feature,
    },

    #[error("Coefficients for {surface}/{feature} defined {count} times")]
    DuplicateCoefficient {
        surface: SurfaceClass,
        feature: Feature,
        count: u32,
    },

    #[error("Grid mismatch: {0}")]
    GridMismatch(String),

    #[error(
        "Accumulator invariant violated at ({row}, {col}): \
         cloudfree {cloudfree} + cloud {cloud} + undef {undef} != total {total}"
    )]
    InvariantViolation {
        row: usize,
        col: usize,
        cloudfree: u32,
        cloud: u32,
        undef: u32,
        total: u32,
    },

    #[error("Allocation failed: {0}")]
    Allocation(String),

    #[error("Unsupported satellite: {0}")]
    UnsupportedSatellite(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

impl SnowError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            SnowError::Io(_) | SnowError::Tiff(_) | SnowError::Json(_) => FailureKind::Io,
            SnowError::InvalidFormat(_) => FailureKind::Io,
            SnowError::Allocation(_) => FailureKind::Memory,
            _ => FailureKind::Other,
        }
    }

    /// Process exit code for a driver that stops on this error
    pub fn exit_code(&self) -> i32 {
        self.failure_kind().exit_code()
    }
}

/// Result type for snow and ice operations
pub type SnowResult<T> = Result<T, SnowError>;
