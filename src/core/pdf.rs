//! Probability densities used by the surface classifier.
//!
//! Densities never fail: the gamma variants report domain errors through
//! negative sentinels, which the Bayes combiner reads as zero likelihood.

use statrs::function::gamma::ln_gamma;

/// Gamma density evaluated outside its support (x <= 0)
pub const GAMMA_DOMAIN_SENTINEL: f64 = -1.0;
/// Gamma shape parameter beyond the representable range
pub const GAMMA_OVERFLOW_SENTINEL: f64 = -2.0;
/// Largest shape parameter whose gamma function fits an f64
pub const MAX_GAMMA_SHAPE: f64 = 170.0;

/// Gaussian density with mean `mean` and standard deviation `sdev`
#[inline]
pub fn normal_pdf(mean: f64, sdev: f64, x: f64) -> f64 {
    let z = (x - mean) / sdev;
    (-0.5 * z * z).exp() / (sdev * (2.0 * std::f64::consts::PI).sqrt())
}

/// Two-parameter gamma density, shape `alpha` and scale `beta`
#[inline]
pub fn gamma_pdf(alpha: f64, beta: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return GAMMA_DOMAIN_SENTINEL;
    }
    if alpha > MAX_GAMMA_SHAPE {
        return GAMMA_OVERFLOW_SENTINEL;
    }
    ((alpha - 1.0) * x.ln() - x / beta - alpha * beta.ln() - ln_gamma(alpha)).exp()
}

/// Three-parameter gamma density shifted by `shift`.
///
/// Kept for coefficient tables that still carry the `t` key.
#[inline]
pub fn shifted_gamma_pdf(alpha: f64, beta: f64, shift: f64, x: f64) -> f64 {
    gamma_pdf(alpha, beta, x - shift)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn integrate<F: Fn(f64) -> f64>(f: F, from: f64, to: f64, steps: usize) -> f64 {
        let h = (to - from) / steps as f64;
        let mut sum = 0.5 * (f(from) + f(to));
        for i in 1..steps {
            sum += f(from + i as f64 * h);
        }
        sum * h
    }

    #[test]
    fn test_normal_pdf_integrates_to_one() {
        for &(mean, sdev) in &[(0.0, 1.0), (80.0, 10.0), (0.9, 0.05)] {
            let total = integrate(|x| normal_pdf(mean, sdev, x), mean - 12.0 * sdev, mean + 12.0 * sdev, 20_000);
            assert_abs_diff_eq!(total, 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_normal_pdf_non_negative() {
        for i in -100..100 {
            let x = i as f64 * 3.7;
            assert!(normal_pdf(5.0, 2.0, x) >= 0.0);
        }
        assert_abs_diff_eq!(normal_pdf(0.0, 1.0, 0.0), 0.398_942_280_401_432_7, epsilon = 1e-12);
    }

    #[test]
    fn test_gamma_pdf_sentinels() {
        assert_eq!(gamma_pdf(2.0, 1.0, 0.0), GAMMA_DOMAIN_SENTINEL);
        assert_eq!(gamma_pdf(2.0, 1.0, -3.0), GAMMA_DOMAIN_SENTINEL);
        assert_eq!(gamma_pdf(171.0, 1.0, 3.0), GAMMA_OVERFLOW_SENTINEL);
        assert_eq!(shifted_gamma_pdf(2.0, 1.0, 5.0, 4.0), GAMMA_DOMAIN_SENTINEL);
    }

    #[test]
    fn test_gamma_pdf_in_domain() {
        // Exponential distribution for alpha = 1
        assert_abs_diff_eq!(gamma_pdf(1.0, 2.0, 1.0), 0.5 * (-0.5f64).exp(), epsilon = 1e-12);

        for i in 1..200 {
            assert!(gamma_pdf(3.5, 0.4, i as f64 * 0.05) >= 0.0);
        }
        let total = integrate(|x| gamma_pdf(3.0, 1.5, x), 1e-9, 80.0, 80_000);
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_shifted_gamma_matches_translated_gamma() {
        assert_abs_diff_eq!(shifted_gamma_pdf(2.0, 1.0, 3.0, 4.5), gamma_pdf(2.0, 1.0, 1.5), epsilon = 1e-15);
    }
}
