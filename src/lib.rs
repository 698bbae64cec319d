//! snowcover: Bayesian sea ice and snow classification for AVHRR passes
//!
//! Each pass is classified per pixel into ice-like, free (water or bare
//! land) and cloud probabilities. The passes of an integration period are
//! then composited into one cloud-filtered class and probability bucket per
//! pixel of a polar-stereographic tile.

pub mod config;
pub mod core;
pub mod io;
pub mod pipeline;
pub mod types;

// Re-export main types and functions for easier access
pub use types::{
    Channel, CompositeClass, CompositeProduct, GridDefinition, LandMask, PassCategory, PassProduct,
    PixelStatus, RadiometerScene, SnowError, SnowResult,
};

pub use crate::config::ProcessingConfig;
pub use crate::core::{CoefficientTable, PassClassifier, ProbabilityScale, TemporalCompositor};
pub use crate::pipeline::{BatchReport, Pipeline};
