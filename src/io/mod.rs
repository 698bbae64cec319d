//! Raster persistence, false-colour export and pass selection

pub mod palette;
pub mod product;
pub mod raster_stack;
pub mod selection;

pub use raster_stack::{LayerData, RasterStack};
pub use selection::{IntegrationPeriod, PassFile, PassSelector};
