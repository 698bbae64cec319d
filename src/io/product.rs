//! Persistence of scenes, land masks and classification products.

use crate::core::bucket::ProbabilityScale;
use crate::io::raster_stack::{LayerData, RasterStack};
use crate::types::{
    Channel, ChannelCalibration, CompositeClass, CompositeProduct, GridDefinition, LandMask,
    PassCategory, PassProduct, PixelStatus, ProductHeader, RadiometerScene,
    SceneHeader, SnowError, SnowResult,
};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Serialize, Deserialize)]
struct SceneDocument {
    header: SceneHeader,
    channels: Vec<(Channel, ChannelCalibration)>,
}

fn channel_layer(channel: Channel) -> String {
    format!("ch{}", channel).to_lowercase()
}

/// Write a radiometer scene
pub fn write_scene<P: AsRef<Path>>(scene: &RadiometerScene, path: P) -> SnowResult<()> {
    let document = SceneDocument {
        header: scene.header.clone(),
        channels: scene.channels.iter().map(|(c, d)| (*c, d.calibration)).collect(),
    };
    let mut stack = RasterStack::new(&document)?;
    for (channel, data) in &scene.channels {
        stack.push(&channel_layer(*channel), LayerData::U8(data.counts.clone()));
    }
    if let Some(soz) = &scene.solar_zenith {
        stack.push("solar_zenith", LayerData::F32(soz.clone()));
    }
    stack.write(path)
}

/// Read a radiometer scene
pub fn read_scene<P: AsRef<Path>>(path: P) -> SnowResult<RadiometerScene> {
    let path = path.as_ref();
    log::info!("Reading scene {}", path.display());
    let mut stack = RasterStack::read(path)?;
    let document: SceneDocument = stack.metadata()?;

    let mut scene = RadiometerScene::new(document.header);
    for (channel, calibration) in document.channels {
        let counts = stack.take_u8(&channel_layer(channel))?;
        scene = scene.with_channel(channel, counts, calibration);
    }
    if let Some(LayerData::F32(soz)) = stack.take("solar_zenith") {
        scene = scene.with_solar_zenith(soz);
    }
    scene.check_dims()?;
    log::debug!("Scene {} {} with {} channels", scene.header.satellite, scene.header.time, scene.channels.len());
    Ok(scene)
}

/// Write a land mask
pub fn write_land_mask<P: AsRef<Path>>(mask: &LandMask, path: P) -> SnowResult<()> {
    let mut stack = RasterStack::new(&mask.grid)?;
    stack.push("land_mask", LayerData::U8(mask.values.clone()));
    stack.write(path)
}

/// Read a land mask
pub fn read_land_mask<P: AsRef<Path>>(path: P) -> SnowResult<LandMask> {
    let mut stack = RasterStack::read(path)?;
    let grid: GridDefinition = stack.metadata()?;
    let values = stack.take_u8("land_mask")?;
    grid.check_dim("land mask", values.dim())?;
    Ok(LandMask { grid, values })
}

/// Write a single float layer on a grid (wet-snow probability, NWP
/// surface temperature)
pub fn write_grid_layer<P: AsRef<Path>>(grid: &GridDefinition, layer: &Array2<f32>, path: P) -> SnowResult<()> {
    let mut stack = RasterStack::new(grid)?;
    stack.push("values", LayerData::F32(layer.clone()));
    stack.write(path)
}

/// Read a single float layer and its grid
pub fn read_grid_layer<P: AsRef<Path>>(path: P) -> SnowResult<(GridDefinition, Array2<f32>)> {
    let mut stack = RasterStack::read(path)?;
    let grid: GridDefinition = stack.metadata()?;
    let layer = stack.take_f32("values")?;
    grid.check_dim("grid layer", layer.dim())?;
    Ok((grid, layer))
}

/// Write a single-pass product
pub fn write_pass_product<P: AsRef<Path>>(pass: &PassProduct, path: P) -> SnowResult<()> {
    log::info!("Writing pass product {}", path.as_ref().display());
    let mut stack = RasterStack::new(&pass.header)?;
    stack.push("p_ice", LayerData::F32(pass.p_ice.clone()));
    stack.push("p_free", LayerData::F32(pass.p_free.clone()));
    stack.push("p_cloud", LayerData::F32(pass.p_cloud.clone()));
    stack.push("status", LayerData::U8(pass.status.map(|s| s.code())));
    stack.push("bucket", LayerData::U8(pass.bucket.clone()));
    stack.push("category", LayerData::U8(pass.category.map(|c| c.code())));
    stack.write(path)
}

fn decode_codes<T, F>(codes: &Array2<u8>, what: &str, decode: F) -> SnowResult<Array2<T>>
where
    T: Clone,
    F: Fn(u8) -> Option<T>,
{
    let mut decoded = Vec::with_capacity(codes.len());
    for &code in codes.iter() {
        decoded.push(decode(code).ok_or_else(|| SnowError::InvalidFormat(format!("invalid {} code {}", what, code)))?);
    }
    Array2::from_shape_vec(codes.dim(), decoded)
        .map_err(|e| SnowError::InvalidFormat(format!("{} layer: {}", what, e)))
}

/// Read a single-pass product. Products stored without the status layer
/// get their status from the sentinel values.
pub fn read_pass_product<P: AsRef<Path>>(path: P, scale: &ProbabilityScale) -> SnowResult<PassProduct> {
    let path = path.as_ref();
    log::debug!("Reading pass product {}", path.display());
    let mut stack = RasterStack::read(path)?;
    let header: ProductHeader = stack.metadata()?;
    let p_ice = stack.take_f32("p_ice")?;
    let p_free = stack.take_f32("p_free")?;
    let p_cloud = stack.take_f32("p_cloud")?;

    let status = match stack.take("status") {
        Some(LayerData::U8(codes)) => decode_codes(&codes, "status", PixelStatus::from_code)?,
        Some(_) => return Err(SnowError::InvalidFormat("status layer is not 8-bit".to_string())),
        None => {
            log::debug!("{} has no status layer, using sentinels", path.display());
            return PassProduct::from_probabilities(header, p_ice, p_free, p_cloud, scale);
        }
    };
    let bucket = stack.take_u8("bucket")?;
    let category = decode_codes(&stack.take_u8("category")?, "category", PassCategory::from_code)?;

    let grid = &header.grid;
    for (what, dim) in [
        ("P(ice)", p_ice.dim()),
        ("P(free)", p_free.dim()),
        ("P(cloud)", p_cloud.dim()),
        ("status", status.dim()),
        ("bucket", bucket.dim()),
        ("category", category.dim()),
    ] {
        grid.check_dim(what, dim)?;
    }

    Ok(PassProduct { header, p_ice, p_free, p_cloud, status, bucket, category })
}

/// Write a composite product
pub fn write_composite<P: AsRef<Path>>(composite: &CompositeProduct, path: P) -> SnowResult<()> {
    log::info!("Writing composite {}", path.as_ref().display());
    let mut stack = RasterStack::new(&composite.header)?;
    stack.push("class", LayerData::U8(composite.class.map(|c| c.code())));
    stack.push("bucket", LayerData::U8(composite.bucket.clone()));
    stack.push("p_ice", LayerData::F32(composite.p_ice.clone()));
    stack.push("p_clear", LayerData::F32(composite.p_clear.clone()));
    stack.push("cloudfree_count", LayerData::U32(composite.cloudfree_count.clone()));
    stack.write(path)
}

/// Read a composite product
pub fn read_composite<P: AsRef<Path>>(path: P) -> SnowResult<CompositeProduct> {
    let mut stack = RasterStack::read(path)?;
    let header: ProductHeader = stack.metadata()?;
    let class = decode_codes(&stack.take_u8("class")?, "class", CompositeClass::from_code)?;
    let bucket = stack.take_u8("bucket")?;
    let p_ice = stack.take_f32("p_ice")?;
    let p_clear = stack.take_f32("p_clear")?;
    let cloudfree_count = stack.take_u32("cloudfree_count")?;
    header.grid.check_dim("class", class.dim())?;
    Ok(CompositeProduct { header, class, bucket, p_ice, p_clear, cloudfree_count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TILE_PROJECTION;
    use chrono::{TimeZone, Utc};
    use ndarray::array;

    fn header() -> ProductHeader {
        ProductHeader {
            area: "at".into(),
            source: "NOAA-17".into(),
            product: "snowcover".into(),
            time: Utc.with_ymd_and_hms(2009, 2, 3, 4, 5, 0).unwrap(),
            grid: GridDefinition { width: 2, height: 1, ax: 1.5, ay: 1.5, bx: -300.0, by: -900.0 },
            projection: TILE_PROJECTION.into(),
        }
    }

    #[test]
    fn test_pass_product_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pass.tif");
        let pass = PassProduct::from_probabilities(
            header(),
            array![[0.8f32, -990.0]],
            array![[0.15f32, -990.0]],
            array![[0.05f32, -990.0]],
            &ProbabilityScale::default(),
        )
        .unwrap();
        write_pass_product(&pass, &path).unwrap();

        let back = read_pass_product(&path, &ProbabilityScale::default()).unwrap();
        assert_eq!(back.header, pass.header);
        assert_eq!(back.status, pass.status);
        assert_eq!(back.category, pass.category);
        assert_eq!(back.p_ice, pass.p_ice);
    }

    #[test]
    fn test_pass_without_status_layer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bare.tif");
        let mut stack = RasterStack::new(&header()).unwrap();
        stack.push("p_ice", LayerData::F32(array![[0.7f32, -993.0]]));
        stack.push("p_free", LayerData::F32(array![[0.2f32, -993.0]]));
        stack.push("p_cloud", LayerData::F32(array![[0.1f32, -993.0]]));
        stack.write(&path).unwrap();

        let pass = read_pass_product(&path, &ProbabilityScale::default()).unwrap();
        assert_eq!(pass.status[[0, 0]], PixelStatus::Ok);
        assert_eq!(pass.status[[0, 1]], PixelStatus::ChannelUnavailable);
        assert_eq!(pass.category[[0, 0]], PassCategory::IceSnow);
    }

    #[test]
    fn test_scene_and_mask_files() {
        let dir = tempfile::tempdir().unwrap();
        let grid = header().grid;
        let scene = RadiometerScene::new(SceneHeader {
            satellite: "NOAA-17".into(),
            area: "at".into(),
            time: header().time,
            grid: grid.clone(),
        })
        .with_channel(Channel::Ch1, array![[10u8, 20]], ChannelCalibration::new(0.5, 0.0))
        .with_channel(Channel::Ch3A, array![[3u8, 4]], ChannelCalibration::new(0.25, 1.0));
        let path = dir.path().join("scene.tif");
        write_scene(&scene, &path).unwrap();

        let back = read_scene(&path).unwrap();
        assert_eq!(back.header, scene.header);
        assert_eq!(back.count(Channel::Ch3A, 0, 1), 4);
        assert_eq!(back.physical(Channel::Ch3A, 0, 1), Some(2.0));
        assert!(!back.has_channel(Channel::Ch2));

        let mask = LandMask { grid, values: array![[0u8, 255]] };
        let mask_path = dir.path().join("mask.tif");
        write_land_mask(&mask, &mask_path).unwrap();
        assert_eq!(read_land_mask(&mask_path).unwrap().values, mask.values);

        let layer_path = dir.path().join("nwp.tif");
        write_grid_layer(&mask.grid, &array![[271.5f32, 268.0]], &layer_path).unwrap();
        let (layer_grid, layer) = read_grid_layer(&layer_path).unwrap();
        assert_eq!(layer_grid, mask.grid);
        assert_eq!(layer[[0, 0]], 271.5);
    }

    #[test]
    fn test_invalid_codes_are_rejected() {
        assert!(decode_codes(&array![[1u8, 9]], "class", CompositeClass::from_code).is_err());
    }
}
