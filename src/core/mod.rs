//! Core classification and compositing modules

pub mod bucket;
pub mod classifier;
pub mod coefficients;
pub mod compositor;
pub mod geometry;
pub mod pdf;
pub mod wet_snow;

// Re-export main types
pub use bucket::ProbabilityScale;
pub use classifier::{ClassifierParams, CoastalSnow, PassClassifier, Priors};
pub use coefficients::{CoefficientTable, FeatureCoefficients, PdfKind};
pub use compositor::{Accumulator, CompositorParams, TemporalCompositor};
pub use wet_snow::{WetSnowBlend, WetSnowBlender, WetSnowParams};
