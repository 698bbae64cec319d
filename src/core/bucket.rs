//! Probability quantization shared by the classifier and the compositor.
//!
//! Bucket 0 marks an invalid value, buckets 1..=n cover [0, 1] in closed-open
//! steps of 1/n, with 1.0 itself in bucket n.

use num_traits::Float;
use serde::{Deserialize, Serialize};

/// Number of probability buckets in operational products
pub const DEFAULT_BUCKETS: u8 = 20;

/// Uniform probability scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbabilityScale {
    buckets: u8,
}

impl Default for ProbabilityScale {
    fn default() -> Self {
        Self { buckets: DEFAULT_BUCKETS }
    }
}

impl ProbabilityScale {
    /// Scale with `buckets` valid buckets, clamped to at least one
    pub fn new(buckets: u8) -> Self {
        Self { buckets: buckets.max(1) }
    }

    pub fn buckets(&self) -> u8 {
        self.buckets
    }

    /// Width of one bucket
    pub fn width(&self) -> f64 {
        1.0 / self.buckets as f64
    }

    /// Lower edge of the zero-based bucket `k`.
    ///
    /// Computed as a division so that the edge is the nearest double to the
    /// decimal boundary (3/20 == 0.15, whereas 3.0 * 0.05 is not).
    fn edge(&self, k: usize) -> f64 {
        k as f64 / self.buckets as f64
    }

    /// Bucket of `p`: 0 for NaN or values outside [0, 1], else 1..=n
    pub fn bucket<T: Float>(&self, p: T) -> u8 {
        let p = match p.to_f64() {
            Some(v) if (0.0..=1.0).contains(&v) => v,
            _ => return 0,
        };
        let n = self.buckets as usize;
        let mut k = ((p * n as f64).floor() as usize).min(n);
        while k < n && p >= self.edge(k + 1) {
            k += 1;
        }
        while k > 0 && p < self.edge(k) {
            k -= 1;
        }
        (k + 1).min(n) as u8
    }

    /// Legend labels, one per valid bucket in bucket order
    pub fn legend(&self) -> Vec<String> {
        let n = self.buckets as usize;
        (0..n)
            .map(|k| {
                let close = if k + 1 == n { ']' } else { '>' };
                format!("[{:.2} - {:>5.2}{}", self.edge(k), self.edge(k + 1), close)
            })
            .collect()
    }

    /// Legend label of a bucket value, `None` for bucket 0
    pub fn label(&self, bucket: u8) -> Option<String> {
        if bucket == 0 || bucket > self.buckets {
            return None;
        }
        self.legend().into_iter().nth(bucket as usize - 1)
    }
}
