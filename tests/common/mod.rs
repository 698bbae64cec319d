#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use ndarray::Array2;
use snowcover::core::bucket::ProbabilityScale;
use snowcover::types::{
    Channel, ChannelCalibration, GridDefinition, PassProduct, ProductHeader, RadiometerScene, SceneHeader,
    TILE_PROJECTION,
};

pub const COEFFICIENTS: &str = "\
# surface feature key p1 p2 p3
ice   a1   n 80.0 10.0 0
ice   r21  n 0.90 0.05 0
ice   r3a1 n 0.10 0.05 0
ice   r3b1 g 2.0  0.05 0
snow  a1   n 85.0 10.0 0
snow  r21  n 0.92 0.05 0
snow  r3a1 n 0.08 0.05 0
snow  r3b1 g 2.0  0.04 0
cloud a1   n 70.0 20.0 0
cloud r21  n 0.95 0.10 0
cloud r3a1 n 0.60 0.20 0
cloud r3b1 g 4.0  0.10 0
water a1   n 10.0 5.0  0
water r21  n 0.50 0.10 0
water r3a1 n 0.50 0.20 0
water r3b1 g 3.0  0.10 0
land  a1   n 20.0 8.0  0
land  r21  n 1.30 0.20 0
land  r3a1 n 1.20 0.30 0
land  r3b1 g 5.0  0.10 0
";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn time(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2009, 3, day, hour, 0, 0).unwrap()
}

pub fn grid(width: usize, height: usize) -> GridDefinition {
    GridDefinition { width, height, ax: 1.5, ay: 1.5, bx: -500.0, by: -1200.0 }
}

/// Raw counts of one pixel: (ch1, ch2, ch3a) with unit calibration, and
/// the solar zenith angle
#[derive(Debug, Clone, Copy)]
pub struct PixelCounts {
    pub ch1: u8,
    pub ch2: u8,
    pub ch3a: u8,
    pub solar_zenith: f32,
}

/// Sunlit sea ice: a1 = 80, r21 = 0.9, r3a1 = 0.1 at 60 degrees zenith
pub const ICE: PixelCounts = PixelCounts { ch1: 40, ch2: 36, ch3a: 4, solar_zenith: 60.0 };
/// Bright cloud with a high 1.6 micron ratio
pub const CLOUD: PixelCounts = PixelCounts { ch1: 35, ch2: 33, ch3a: 21, solar_zenith: 60.0 };
pub const NIGHT: PixelCounts = PixelCounts { ch1: 1, ch2: 1, ch3a: 1, solar_zenith: 95.0 };

/// A one-row scene, one column per pixel
pub fn scene(satellite: &str, tile: &str, time: DateTime<Utc>, pixels: &[PixelCounts]) -> RadiometerScene {
    let dim = (1, pixels.len());
    let layer = |f: fn(&PixelCounts) -> u8| Array2::from_shape_fn(dim, |(_, c)| f(&pixels[c]));
    let unit = ChannelCalibration::new(1.0, 0.0);
    RadiometerScene::new(SceneHeader {
        satellite: satellite.to_string(),
        area: tile.to_string(),
        time,
        grid: grid(pixels.len(), 1),
    })
    .with_channel(Channel::Ch1, layer(|p| p.ch1), unit)
    .with_channel(Channel::Ch2, layer(|p| p.ch2), unit)
    .with_channel(Channel::Ch3A, layer(|p| p.ch3a), unit)
    .with_channel(Channel::Ch4, Array2::from_elem(dim, 120), ChannelCalibration::new(0.5, 200.0))
    .with_channel(Channel::Ch5, Array2::from_elem(dim, 118), ChannelCalibration::new(0.5, 200.0))
    .with_solar_zenith(Array2::from_shape_fn(dim, |(_, c)| pixels[c].solar_zenith))
}

pub fn header(source: &str, time: DateTime<Utc>, grid: GridDefinition) -> ProductHeader {
    ProductHeader {
        area: "nr".to_string(),
        source: source.to_string(),
        product: "snowcover".to_string(),
        time,
        grid,
        projection: TILE_PROJECTION.to_string(),
    }
}

/// A pass with the same probability triple in every pixel
pub fn uniform_pass(grid: GridDefinition, time: DateTime<Utc>, triple: (f32, f32, f32)) -> PassProduct {
    let dim = grid.dim();
    PassProduct::from_probabilities(
        header("NOAA-18", time, grid),
        Array2::from_elem(dim, triple.0),
        Array2::from_elem(dim, triple.1),
        Array2::from_elem(dim, triple.2),
        &ProbabilityScale::default(),
    )
    .unwrap()
}
