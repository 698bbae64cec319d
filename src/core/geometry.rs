//! Illumination geometry for tile pixels.
//!
//! Tiles live on a polar stereographic plane (sphere R = 6371 km, true
//! latitude 60N, central meridian 0E); coordinates are in km.

use crate::types::GridDefinition;
use chrono::{DateTime, Datelike, Timelike, Utc};
use ndarray::Array2;

/// Earth radius of the tile projection in km
pub const EARTH_RADIUS_KM: f64 = 6371.0;
/// Latitude of true scale
pub const TRUE_LATITUDE_DEG: f64 = 60.0;

// Radiation constants for radiance in mW/(m2 sr cm-1)
const C1: f64 = 1.191_042_7e-5;
const C2: f64 = 1.438_775_2;

/// Central wavenumber (cm-1) of AVHRR channel 3B
pub const CH3B_WAVENUMBER: f64 = 2670.0;
/// Solar irradiance at 1 AU in channel 3B, mW/(m2 cm-1)
pub const CH3B_SOLAR_IRRADIANCE: f64 = 15.0;

fn projection_scale() -> f64 {
    EARTH_RADIUS_KM * (1.0 + TRUE_LATITUDE_DEG.to_radians().sin())
}

/// Latitude/longitude (degrees) of a point on the projection plane
pub fn plane_to_latlon(x: f64, y: f64) -> (f64, f64) {
    let rho = (x * x + y * y).sqrt();
    let lat = 90.0 - 2.0 * (rho / projection_scale()).atan().to_degrees();
    let lon = if rho == 0.0 { 0.0 } else { x.atan2(-y).to_degrees() };
    (lat, lon)
}

/// Projection-plane coordinates (km) of a latitude/longitude
pub fn latlon_to_plane(lat: f64, lon: f64) -> (f64, f64) {
    let rho = projection_scale() * (std::f64::consts::FRAC_PI_4 - lat.to_radians() / 2.0).tan();
    let lon = lon.to_radians();
    (rho * lon.sin(), -rho * lon.cos())
}

/// Solar zenith angle in degrees at a location and UTC time.
///
/// Uses the Fourier-series solar declination and equation of time, which
/// is accurate to a fraction of a degree.
pub fn solar_zenith(time: &DateTime<Utc>, lat: f64, lon: f64) -> f64 {
    let hours = time.hour() as f64 + time.minute() as f64 / 60.0 + time.second() as f64 / 3600.0;
    let gamma = 2.0 * std::f64::consts::PI / 365.0 * (time.ordinal() as f64 - 1.0 + (hours - 12.0) / 24.0);

    let eqtime = 229.18
        * (0.000075 + 0.001868 * gamma.cos() - 0.032077 * gamma.sin()
            - 0.014615 * (2.0 * gamma).cos()
            - 0.040849 * (2.0 * gamma).sin());
    let decl = 0.006918 - 0.399912 * gamma.cos() + 0.070257 * gamma.sin()
        - 0.006758 * (2.0 * gamma).cos()
        + 0.000907 * (2.0 * gamma).sin()
        - 0.002697 * (3.0 * gamma).cos()
        + 0.00148 * (3.0 * gamma).sin();

    let true_solar_minutes = hours * 60.0 + eqtime + 4.0 * lon;
    let hour_angle = (true_solar_minutes / 4.0 - 180.0).to_radians();
    let lat = lat.to_radians();

    let cos_zenith = lat.sin() * decl.sin() + lat.cos() * decl.cos() * hour_angle.cos();
    cos_zenith.clamp(-1.0, 1.0).acos().to_degrees()
}

/// Solar zenith angle of every cell of a grid
pub fn solar_zenith_field(grid: &GridDefinition, time: &DateTime<Utc>) -> Array2<f32> {
    log::debug!("Computing solar zenith field for {} at {}", grid, time);
    Array2::from_shape_fn(grid.dim(), |(row, col)| {
        let (x, y) = grid.cell_xy(row, col);
        let (lat, lon) = plane_to_latlon(x, y);
        solar_zenith(time, lat, lon) as f32
    })
}

/// Planck radiance at wavenumber `nu` (cm-1) and temperature `t` (K)
fn planck_radiance(nu: f64, t: f64) -> f64 {
    C1 * nu.powi(3) / ((C2 * nu / t).exp() - 1.0)
}

/// Reflective part of channel 3B in percent.
///
/// The thermal emission of the scene is estimated from the 11 um
/// temperature and removed from the 3.7 um radiance; the remainder is
/// normalised by the incoming solar radiance in the band.
pub fn ch3b_reflectance(t3: f32, t4: f32, solar_zenith_deg: f32, day_of_year: u32) -> f32 {
    let mu0 = (solar_zenith_deg as f64).to_radians().cos();
    if mu0 <= 0.0 || t3 <= 0.0 || t4 <= 0.0 {
        return 0.0;
    }
    let total = planck_radiance(CH3B_WAVENUMBER, t3 as f64);
    let emitted = planck_radiance(CH3B_WAVENUMBER, t4 as f64);

    // Earth-sun distance correction
    let distance_factor =
        1.0 + 0.0334 * (2.0 * std::f64::consts::PI * (day_of_year as f64 - 3.0) / 365.25).cos();
    let incoming = CH3B_SOLAR_IRRADIANCE * distance_factor * mu0 / std::f64::consts::PI;

    (100.0 * (total - emitted) / (incoming - emitted)) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::TimeZone;

    #[test]
    fn test_pole_and_round_trip() {
        let (lat, _) = plane_to_latlon(0.0, 0.0);
        assert_abs_diff_eq!(lat, 90.0, epsilon = 1e-12);

        let (x, y) = latlon_to_plane(70.0, 25.0);
        let (lat, lon) = plane_to_latlon(x, y);
        assert_abs_diff_eq!(lat, 70.0, epsilon = 1e-9);
        assert_abs_diff_eq!(lon, 25.0, epsilon = 1e-9);
    }

    #[test]
    fn test_true_scale_latitude() {
        // Distance along the meridian near 60N matches the sphere
        let (_, y1) = latlon_to_plane(60.05, 0.0);
        let (_, y2) = latlon_to_plane(59.95, 0.0);
        let sphere = EARTH_RADIUS_KM * 0.1f64.to_radians();
        assert_abs_diff_eq!((y1 - y2).abs(), sphere, epsilon = 1e-3);
    }

    #[test]
    fn test_solar_zenith() {
        let solstice = Utc.with_ymd_and_hms(2009, 6, 21, 12, 0, 0).unwrap();
        assert_abs_diff_eq!(solar_zenith(&solstice, 0.0, 0.0), 23.4, epsilon = 0.5);
        assert_abs_diff_eq!(solar_zenith(&solstice, 90.0, 0.0), 66.6, epsilon = 0.5);

        let winter = Utc.with_ymd_and_hms(2009, 12, 21, 12, 0, 0).unwrap();
        assert!(solar_zenith(&winter, 80.0, 15.0) > 90.0);
    }

    #[test]
    fn test_solar_zenith_field_shape() {
        let grid = GridDefinition { width: 4, height: 3, ax: 10.0, ay: 10.0, bx: -20.0, by: -2000.0 };
        let time = Utc.with_ymd_and_hms(2009, 4, 1, 11, 0, 0).unwrap();
        let field = solar_zenith_field(&grid, &time);
        assert_eq!(field.dim(), (3, 4));
        assert!(field.iter().all(|z| (0.0..90.0).contains(z)));
    }

    #[test]
    fn test_ch3b_reflectance() {
        assert_abs_diff_eq!(ch3b_reflectance(270.0, 270.0, 50.0, 100), 0.0, epsilon = 1e-6);
        let bright = ch3b_reflectance(300.0, 270.0, 50.0, 100);
        assert!(bright > 0.0 && bright < 100.0);
        assert_eq!(ch3b_reflectance(300.0, 270.0, 95.0, 100), 0.0);
    }
}
