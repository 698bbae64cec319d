//! Multi-directory TIFF container for named raster layers.
//!
//! One TIFF directory per layer. The first directory carries a JSON
//! document in its ImageDescription tag: the caller's metadata and the
//! layer names in directory order.

use crate::types::{SnowError, SnowResult};
use ndarray::Array2;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

/// Pixel data of one layer
#[derive(Debug, Clone, PartialEq)]
pub enum LayerData {
    F32(Array2<f32>),
    U8(Array2<u8>),
    U32(Array2<u32>),
}

impl LayerData {
    pub fn dim(&self) -> (usize, usize) {
        match self {
            LayerData::F32(a) => a.dim(),
            LayerData::U8(a) => a.dim(),
            LayerData::U32(a) => a.dim(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StackDocument {
    metadata: serde_json::Value,
    layers: Vec<String>,
}

/// Named layers plus a JSON metadata document
#[derive(Debug, Clone)]
pub struct RasterStack {
    pub metadata: serde_json::Value,
    pub layers: Vec<(String, LayerData)>,
}

impl RasterStack {
    pub fn new<M: Serialize>(metadata: &M) -> SnowResult<Self> {
        Ok(Self {
            metadata: serde_json::to_value(metadata)?,
            layers: Vec::new(),
        })
    }

    pub fn push(&mut self, name: &str, data: LayerData) {
        self.layers.push((name.to_string(), data));
    }

    /// Metadata document decoded into `M`
    pub fn metadata<M: DeserializeOwned>(&self) -> SnowResult<M> {
        Ok(serde_json::from_value(self.metadata.clone())?)
    }

    /// Remove and return a layer by name
    pub fn take(&mut self, name: &str) -> Option<LayerData> {
        let position = self.layers.iter().position(|(n, _)| n == name)?;
        Some(self.layers.remove(position).1)
    }

    pub fn take_f32(&mut self, name: &str) -> SnowResult<Array2<f32>> {
        match self.take(name) {
            Some(LayerData::F32(a)) => Ok(a),
            Some(_) => Err(SnowError::InvalidFormat(format!("layer '{}' is not 32-bit float", name))),
            None => Err(SnowError::InvalidFormat(format!("missing layer '{}'", name))),
        }
    }

    pub fn take_u8(&mut self, name: &str) -> SnowResult<Array2<u8>> {
        match self.take(name) {
            Some(LayerData::U8(a)) => Ok(a),
            Some(_) => Err(SnowError::InvalidFormat(format!("layer '{}' is not 8-bit", name))),
            None => Err(SnowError::InvalidFormat(format!("missing layer '{}'", name))),
        }
    }

    pub fn take_u32(&mut self, name: &str) -> SnowResult<Array2<u32>> {
        match self.take(name) {
            Some(LayerData::U32(a)) => Ok(a),
            Some(_) => Err(SnowError::InvalidFormat(format!("layer '{}' is not 32-bit unsigned", name))),
            None => Err(SnowError::InvalidFormat(format!("missing layer '{}'", name))),
        }
    }

    /// Write all layers to `path`
    pub fn write<P: AsRef<Path>>(&self, path: P) -> SnowResult<()> {
        let path = path.as_ref();
        if self.layers.is_empty() {
            return Err(SnowError::Processing(format!("no layers to write to {}", path.display())));
        }
        log::debug!("Writing {} layers to {}", self.layers.len(), path.display());

        let document = serde_json::to_string(&StackDocument {
            metadata: self.metadata.clone(),
            layers: self.layers.iter().map(|(n, _)| n.clone()).collect(),
        })?;

        let mut encoder = TiffEncoder::new(BufWriter::new(File::create(path)?))?;
        for (index, (_, data)) in self.layers.iter().enumerate() {
            let (height, width) = data.dim();
            let description = if index == 0 { Some(document.as_str()) } else { None };
            match data {
                LayerData::F32(a) => {
                    let mut image = encoder.new_image::<colortype::Gray32Float>(width as u32, height as u32)?;
                    if let Some(d) = description {
                        image.encoder().write_tag(Tag::ImageDescription, d)?;
                    }
                    image.write_data(&a.iter().copied().collect::<Vec<_>>())?;
                }
                LayerData::U8(a) => {
                    let mut image = encoder.new_image::<colortype::Gray8>(width as u32, height as u32)?;
                    if let Some(d) = description {
                        image.encoder().write_tag(Tag::ImageDescription, d)?;
                    }
                    image.write_data(&a.iter().copied().collect::<Vec<_>>())?;
                }
                LayerData::U32(a) => {
                    let mut image = encoder.new_image::<colortype::Gray32>(width as u32, height as u32)?;
                    if let Some(d) = description {
                        image.encoder().write_tag(Tag::ImageDescription, d)?;
                    }
                    image.write_data(&a.iter().copied().collect::<Vec<_>>())?;
                }
            }
        }
        Ok(())
    }

    /// Read a stack written by `write`
    pub fn read<P: AsRef<Path>>(path: P) -> SnowResult<Self> {
        let path = path.as_ref();
        log::debug!("Reading raster stack {}", path.display());

        let mut decoder = Decoder::new(BufReader::new(File::open(path)?))?;
        let document: StackDocument =
            serde_json::from_str(&decoder.get_tag_ascii_string(Tag::ImageDescription)?)?;

        let mut layers = Vec::with_capacity(document.layers.len());
        for (index, name) in document.layers.into_iter().enumerate() {
            if index > 0 {
                if !decoder.more_images() {
                    return Err(SnowError::InvalidFormat(format!(
                        "{}: layer '{}' listed but not stored",
                        path.display(),
                        name
                    )));
                }
                decoder.next_image()?;
            }
            let (width, height) = decoder.dimensions()?;
            let dim = (height as usize, width as usize);
            let shape_error =
                |e: ndarray::ShapeError| SnowError::InvalidFormat(format!("{}: layer '{}': {}", path.display(), name, e));
            let data = match decoder.read_image()? {
                DecodingResult::F32(v) => LayerData::F32(Array2::from_shape_vec(dim, v).map_err(shape_error)?),
                DecodingResult::U8(v) => LayerData::U8(Array2::from_shape_vec(dim, v).map_err(shape_error)?),
                DecodingResult::U32(v) => LayerData::U32(Array2::from_shape_vec(dim, v).map_err(shape_error)?),
                _ => {
                    return Err(SnowError::InvalidFormat(format!(
                        "{}: layer '{}' has an unsupported sample type",
                        path.display(),
                        name
                    )))
                }
            };
            layers.push((name, data));
        }

        Ok(Self {
            metadata: document.metadata,
            layers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_layers_survive_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.tif");

        let mut stack = RasterStack::new(&serde_json::json!({ "area": "nr" })).unwrap();
        stack.push("prob", LayerData::F32(array![[0.25f32, -990.0], [1.0, 0.5]]));
        stack.push("class", LayerData::U8(array![[1u8, 2], [3, 4]]));
        stack.push("count", LayerData::U32(array![[0u32, 7], [70_000, 1]]));
        stack.write(&path).unwrap();

        let mut back = RasterStack::read(&path).unwrap();
        assert_eq!(back.metadata["area"], "nr");
        assert_eq!(back.take_u8("class").unwrap(), array![[1u8, 2], [3, 4]]);
        assert_eq!(back.take_f32("prob").unwrap(), array![[0.25f32, -990.0], [1.0, 0.5]]);
        assert_eq!(back.take_u32("count").unwrap()[[1, 0]], 70_000);
        assert!(back.take_f32("prob").is_err());
    }

    #[test]
    fn test_wrong_layer_type() {
        let mut stack = RasterStack::new(&serde_json::json!({})).unwrap();
        stack.push("class", LayerData::U8(array![[1u8]]));
        assert!(matches!(stack.take_f32("class"), Err(SnowError::InvalidFormat(_))));
    }
}
