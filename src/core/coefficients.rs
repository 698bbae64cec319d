//! Fitted density coefficients per surface class and feature.
//!
//! The table is read once, validated once against the feature set the
//! classifier will evaluate, and then shared read-only by the pixel loop.

use crate::core::pdf::{gamma_pdf, normal_pdf, shifted_gamma_pdf};
use crate::types::{Feature, SnowError, SnowResult, SurfaceClass};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Distribution family of one coefficient entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PdfKind {
    /// `n`: mean, standard deviation
    Normal,
    /// `g`: shape, scale
    Gamma,
    /// `t`: shape, scale, shift (deprecated)
    ShiftedGamma,
}

impl PdfKind {
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "n" => Some(PdfKind::Normal),
            "g" => Some(PdfKind::Gamma),
            "t" => Some(PdfKind::ShiftedGamma),
            _ => None,
        }
    }
}

/// Density parameters of one (surface class, feature) pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureCoefficients {
    pub surface: SurfaceClass,
    pub feature: Feature,
    pub kind: PdfKind,
    pub params: [f64; 3],
    /// How many times the pair was defined
    pub count: u32,
}

impl FeatureCoefficients {
    fn undefined(surface: SurfaceClass, feature: Feature) -> Self {
        Self {
            surface,
            feature,
            kind: PdfKind::Normal,
            params: [0.0; 3],
            count: 0,
        }
    }

    /// Density at `x` without checking the definition count
    #[inline]
    pub fn density(&self, x: f64) -> f64 {
        let [p1, p2, p3] = self.params;
        match self.kind {
            PdfKind::Normal => normal_pdf(p1, p2, x),
            PdfKind::Gamma => gamma_pdf(p1, p2, x),
            PdfKind::ShiftedGamma => shifted_gamma_pdf(p1, p2, p3, x),
        }
    }

    fn check_defined_once(&self) -> SnowResult<()> {
        match self.count {
            1 => Ok(()),
            0 => Err(SnowError::MissingCoefficient {
                surface: self.surface,
                feature: self.feature,
            }),
            count => Err(SnowError::DuplicateCoefficient {
                surface: self.surface,
                feature: self.feature,
                count,
            }),
        }
    }
}

/// Density of `x` under `coefficients`, failing unless the pair was
/// defined exactly once
pub fn find_probability(coefficients: &FeatureCoefficients, x: f64) -> SnowResult<f64> {
    coefficients.check_defined_once()?;
    Ok(coefficients.density(x))
}

/// Coefficients for every surface class and feature
#[derive(Debug, Clone, PartialEq)]
pub struct CoefficientTable {
    entries: Vec<FeatureCoefficients>,
}

impl Default for CoefficientTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CoefficientTable {
    /// Table with every pair undefined
    pub fn new() -> Self {
        let entries = SurfaceClass::ALL
            .iter()
            .flat_map(|&s| Feature::ALL.iter().map(move |&f| FeatureCoefficients::undefined(s, f)))
            .collect();
        Self { entries }
    }

    fn slot(surface: SurfaceClass, feature: Feature) -> usize {
        surface.index() * Feature::ALL.len() + feature.index()
    }

    pub fn get(&self, surface: SurfaceClass, feature: Feature) -> &FeatureCoefficients {
        &self.entries[Self::slot(surface, feature)]
    }

    /// Record one definition of a pair; a repeated definition overwrites the
    /// parameters and is reported by `validate`
    pub fn define(&mut self, surface: SurfaceClass, feature: Feature, kind: PdfKind, params: [f64; 3]) {
        let entry = &mut self.entries[Self::slot(surface, feature)];
        entry.kind = kind;
        entry.params = params;
        entry.count += 1;
    }

    /// Fail on the first required pair not defined exactly once
    pub fn validate(&self, required: &[(SurfaceClass, Feature)]) -> SnowResult<()> {
        for &(surface, feature) in required {
            self.get(surface, feature).check_defined_once()?;
        }
        Ok(())
    }

    /// Density lookup for the pixel loop; call `validate` first
    #[inline]
    pub fn density(&self, surface: SurfaceClass, feature: Feature, x: f64) -> f64 {
        self.get(surface, feature).density(x)
    }

    /// Parse `surface feature key p1 p2 p3` lines
    pub fn parse(text: &str) -> SnowResult<Self> {
        let mut table = Self::new();
        let mut defined = 0usize;

        for (number, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 6 {
                return Err(SnowError::InvalidFormat(format!(
                    "coefficient line {}: expected 6 fields, found {}",
                    number + 1,
                    fields.len()
                )));
            }

            let surface = SurfaceClass::from_name(fields[0]).ok_or_else(|| {
                SnowError::InvalidFormat(format!("coefficient line {}: unknown surface '{}'", number + 1, fields[0]))
            })?;
            let feature = Feature::from_name(fields[1]).ok_or_else(|| {
                SnowError::InvalidFormat(format!("coefficient line {}: unknown feature '{}'", number + 1, fields[1]))
            })?;
            let kind = PdfKind::from_key(fields[2]).ok_or_else(|| {
                SnowError::InvalidFormat(format!("coefficient line {}: unknown key '{}'", number + 1, fields[2]))
            })?;

            let mut params = [0.0f64; 3];
            for (param, field) in params.iter_mut().zip(&fields[3..]) {
                *param = field.parse().map_err(|_| {
                    SnowError::InvalidFormat(format!("coefficient line {}: bad number '{}'", number + 1, field))
                })?;
            }

            table.define(surface, feature, kind, params);
            defined += 1;
        }

        log::debug!("Parsed {} coefficient definitions", defined);
        Ok(table)
    }

    /// Read and parse a coefficient file
    pub fn from_file<P: AsRef<Path>>(path: P) -> SnowResult<Self> {
        let path = path.as_ref();
        log::info!("Reading coefficients from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }
}

#[cfg(test)]
pub(crate) const TEST_COEFFICIENTS: &str = "\
# surface feature key p1 p2 p3
ice   a1   n 80.0 10.0 0
ice   r21  n 0.90 0.05 0
ice   r3a1 n 0.10 0.05 0
ice   r3b1 g 2.0  0.05 0
ice   dt   n 2.0  3.0  0
snow  a1   n 85.0 10.0 0
snow  r21  n 0.92 0.05 0
snow  r3a1 n 0.08 0.05 0
snow  r3b1 g 2.0  0.04 0
snow  dt   n 1.0  3.0  0
cloud a1   n 70.0 20.0 0
cloud r21  n 0.95 0.10 0
cloud r3a1 n 0.60 0.20 0
cloud r3b1 g 4.0  0.10 0
cloud dt   n 10.0 6.0  0
water a1   n 10.0 5.0  0
water r21  n 0.50 0.10 0
water r3a1 n 0.50 0.20 0
water r3b1 g 3.0  0.10 0
water dt   n 0.0  2.0  0
land  a1   n 20.0 8.0  0
land  r21  n 1.30 0.20 0
land  r3a1 n 1.20 0.30 0
land  r3b1 g 5.0  0.10 0
land  dt   n 0.0  3.0  0
";

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_parse_full_table() {
        let table = CoefficientTable::parse(TEST_COEFFICIENTS).unwrap();
        let ice_a1 = table.get(SurfaceClass::Ice, Feature::A1);
        assert_eq!(ice_a1.kind, PdfKind::Normal);
        assert_eq!(ice_a1.params, [80.0, 10.0, 0.0]);
        assert_eq!(ice_a1.count, 1);
        assert_eq!(table.get(SurfaceClass::Land, Feature::R3b1).kind, PdfKind::Gamma);
        assert_eq!(table.get(SurfaceClass::Land, Feature::D34).count, 0);

        let all: Vec<_> = SurfaceClass::ALL
            .iter()
            .flat_map(|&s| [Feature::A1, Feature::R21, Feature::R3a1, Feature::R3b1, Feature::Dt].map(|f| (s, f)))
            .collect();
        assert!(table.validate(&all).is_ok());
    }

    #[test]
    fn test_find_probability_dispatch() {
        let table = CoefficientTable::parse(TEST_COEFFICIENTS).unwrap();
        let p = find_probability(table.get(SurfaceClass::Ice, Feature::A1), 80.0).unwrap();
        assert_abs_diff_eq!(p, normal_pdf(80.0, 10.0, 80.0), epsilon = 1e-15);

        let g = find_probability(table.get(SurfaceClass::Cloud, Feature::R3b1), 0.3).unwrap();
        assert_abs_diff_eq!(g, gamma_pdf(4.0, 0.1, 0.3), epsilon = 1e-15);
    }

    #[test]
    fn test_missing_pair_is_fatal() {
        let text: String = TEST_COEFFICIENTS
            .lines()
            .filter(|l| !l.starts_with("ice   a1"))
            .map(|l| format!("{}\n", l))
            .collect();
        let table = CoefficientTable::parse(&text).unwrap();

        let err = table.validate(&[(SurfaceClass::Ice, Feature::A1)]).unwrap_err();
        assert!(matches!(
            err,
            SnowError::MissingCoefficient { surface: SurfaceClass::Ice, feature: Feature::A1 }
        ));
        assert!(find_probability(table.get(SurfaceClass::Ice, Feature::A1), 1.0).is_err());
    }

    #[test]
    fn test_duplicate_pair_is_fatal() {
        let text = format!("{}  water dt n 1.0 1.0 0\n", TEST_COEFFICIENTS);
        let table = CoefficientTable::parse(&text).unwrap();
        let err = table.validate(&[(SurfaceClass::Water, Feature::Dt)]).unwrap_err();
        assert!(matches!(err, SnowError::DuplicateCoefficient { count: 2, .. }));
    }

    #[test]
    fn test_parse_errors_name_the_line() {
        for bad in ["rock a1 n 1 2 0", "ice a9 n 1 2 0", "ice a1 q 1 2 0", "ice a1 n 1 2", "ice a1 n x 2 0"] {
            let err = CoefficientTable::parse(&format!("# header\n{}\n", bad)).unwrap_err();
            match err {
                SnowError::InvalidFormat(msg) => assert!(msg.contains("line 2"), "{}", msg),
                other => panic!("unexpected error {:?}", other),
            }
        }
    }

    #[test]
    fn test_shifted_gamma_key() {
        let table = CoefficientTable::parse("ice d34 t 2.0 1.0 3.0\n").unwrap();
        let entry = table.get(SurfaceClass::Ice, Feature::D34);
        assert_eq!(entry.kind, PdfKind::ShiftedGamma);
        assert_abs_diff_eq!(entry.density(4.5), gamma_pdf(2.0, 1.0, 1.5), epsilon = 1e-15);
    }
}
