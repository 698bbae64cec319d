//! False-colour export of composites with an embedded legend.
//!
//! Images are 8-bit RGB TIFFs. The ImageDescription follows the MITIFF
//! text layout: satellite, time, grid and projection lines, then a
//! `COLOR INFO` block with the legend count and one line per entry.

use crate::core::bucket::ProbabilityScale;
use crate::core::wet_snow::WET_SNOW_LEGEND;
use crate::types::{CompositeClass, CompositeProduct, ProductHeader, SnowResult};
use chrono::{Datelike, Timelike};
use ndarray::Array2;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

/// Index-to-colour lookup; indices without an entry are black
#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    colors: Vec<[u8; 3]>,
}

impl Palette {
    /// Composite class colours, indexed by class code
    pub fn classes() -> Self {
        let mut colors = vec![[0u8; 3]; 6];
        colors[CompositeClass::IceSnow.code() as usize] = [255, 255, 255];
        colors[CompositeClass::Clear.code() as usize] = [0, 151, 255];
        colors[CompositeClass::Unclassified.code() as usize] = [151, 151, 151];
        colors[CompositeClass::Clouded.code() as usize] = [99, 86, 82];
        colors[CompositeClass::Undefined.code() as usize] = [0, 0, 0];
        Self { colors }
    }

    /// Heat map over the probability buckets; bucket 0 is black
    pub fn probability(scale: &ProbabilityScale) -> Self {
        let n = scale.buckets() as usize;
        let mut colors = vec![[0u8; 3]];
        for k in 0..n {
            let t = if n > 1 { k as f64 / (n - 1) as f64 } else { 1.0 };
            // blue through green to red
            let r = (255.0 * (2.0 * t - 1.0).clamp(0.0, 1.0)).round() as u8;
            let g = (255.0 * (1.0 - (2.0 * t - 1.0).abs())).round() as u8;
            let b = (255.0 * (1.0 - 2.0 * t).clamp(0.0, 1.0)).round() as u8;
            colors.push([r, g, b]);
        }
        Self { colors }
    }

    /// Wet-snow update mask: grey for unchanged, cyan for updated
    pub fn update_mask() -> Self {
        Self {
            colors: vec![[80, 80, 80], [0, 255, 255]],
        }
    }

    pub fn color(&self, index: u8) -> [u8; 3] {
        self.colors.get(index as usize).copied().unwrap_or([0, 0, 0])
    }
}

/// Legend lines of an exported image
#[derive(Debug, Clone, PartialEq)]
pub struct Legend {
    pub title: String,
    pub entries: Vec<String>,
}

impl Legend {
    pub fn classes() -> Self {
        Self {
            title: "PIXEL CLASSIFICATION".to_string(),
            entries: CompositeClass::LEGEND.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn probability(scale: &ProbabilityScale) -> Self {
        Self {
            title: "PIXEL CLASSIFICATION".to_string(),
            entries: scale.legend(),
        }
    }

    pub fn update_mask() -> Self {
        Self {
            title: "PIXEL CLASSIFICATION".to_string(),
            entries: WET_SNOW_LEGEND.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// MITIFF-style description text of an exported image
pub fn image_description(header: &ProductHeader, legend: &Legend) -> String {
    let t = &header.time;
    let grid = &header.grid;
    let mut text = format!(
        " Satellite: {}\n Date and Time: {:02}:{:02} {:02}/{:02}-{:04}\n SatDir: 0\n Channels: 1 In this file: C\n \
         Xsize: {}\n Ysize: {}\n Map projection: Polar Stereographic\n TrueLat: 60 N\n GridRot: 0\n \
         Xunit: 1000 m Yunit: 1000 m\n NPX: 0.000000 NPY: 0.000000\n Ax: {:.6} Ay: {:.6} Bx: {:.6} By: {:.6}\n",
        header.source,
        t.hour(),
        t.minute(),
        t.day(),
        t.month(),
        t.year(),
        grid.width,
        grid.height,
        grid.ax,
        grid.ay,
        grid.bx,
        grid.by
    );
    text.push_str(&format!("\n COLOR INFO:\n {}\n {}\n", legend.title, legend.entries.len()));
    for entry in &legend.entries {
        text.push_str(&format!(" {}\n", entry));
    }
    text
}

/// Render `indices` through `palette` into an RGB TIFF
pub fn write_false_color<P: AsRef<Path>>(
    path: P,
    header: &ProductHeader,
    indices: &Array2<u8>,
    palette: &Palette,
    legend: &Legend,
) -> SnowResult<()> {
    let path = path.as_ref();
    header.grid.check_dim("palette image", indices.dim())?;
    log::info!("Writing false-colour image {}", path.display());

    let (height, width) = indices.dim();
    let mut rgb = Vec::with_capacity(indices.len() * 3);
    for &index in indices.iter() {
        rgb.extend_from_slice(&palette.color(index));
    }

    let mut encoder = TiffEncoder::new(BufWriter::new(File::create(path)?))?;
    let mut image = encoder.new_image::<colortype::RGB8>(width as u32, height as u32)?;
    image
        .encoder()
        .write_tag(Tag::ImageDescription, image_description(header, legend).as_str())?;
    image.write_data(&rgb)?;
    Ok(())
}

/// Class image of a composite
pub fn write_class_image<P: AsRef<Path>>(path: P, composite: &CompositeProduct) -> SnowResult<()> {
    let codes = composite.class.map(|c| c.code());
    write_false_color(path, &composite.header, &codes, &Palette::classes(), &Legend::classes())
}

/// Probability bucket image of a composite
pub fn write_probability_image<P: AsRef<Path>>(
    path: P,
    composite: &CompositeProduct,
    scale: &ProbabilityScale,
) -> SnowResult<()> {
    write_false_color(
        path,
        &composite.header,
        &composite.bucket,
        &Palette::probability(scale),
        &Legend::probability(scale),
    )
}

/// Wet-snow update mask image
pub fn write_update_image<P: AsRef<Path>>(path: P, header: &ProductHeader, updated: &Array2<u8>) -> SnowResult<()> {
    write_false_color(path, header, updated, &Palette::update_mask(), &Legend::update_mask())
}
