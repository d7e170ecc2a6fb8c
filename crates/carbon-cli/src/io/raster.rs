//! GeoTIFF reading (classified LULC) and writing (Float32 density).
//!
//! Only north-up rasters described by ModelPixelScale + ModelTiepoint are
//! understood. The EPSG code comes from the GeoKey directory.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{bail, Context, Result};
use carbon_core::crs::Crs;
use carbon_core::raster::{GridTransform, RasterGrid, NODATA_CLASS};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

const GT_MODEL_TYPE_KEY: u16 = 1024;
const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;
/// GeoTIFF "user-defined" code.
const USER_DEFINED: u16 = 32767;
const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;

/// EPSG code from a GeoKeyDirectory: the projected CS if set, else the geographic one.
fn epsg_from_geokeys(dir: &[u16]) -> Option<u32> {
    let count = *dir.get(3)? as usize;
    let mut projected = None;
    let mut geographic = None;
    for k in 0..count {
        let entry = dir.get(4 + k * 4..8 + k * 4)?;
        // Location 0 means the value is stored inline.
        if entry[1] != 0 || entry[3] == USER_DEFINED {
            continue;
        }
        match entry[0] {
            PROJECTED_CS_TYPE_KEY => projected = Some(entry[3] as u32),
            GEOGRAPHIC_TYPE_KEY => geographic = Some(entry[3] as u32),
            _ => {}
        }
    }
    projected.or(geographic)
}

fn to_classes(img: DecodingResult, nodata: Option<f64>) -> Vec<u32> {
    let convert = |v: f64| -> u32 {
        if !v.is_finite() || v < 0.0 || v > (u32::MAX - 1) as f64 || v.fract() != 0.0 || Some(v) == nodata {
            NODATA_CLASS
        } else {
            v as u32
        }
    };
    match img {
        DecodingResult::U8(v) => v.into_iter().map(|x| convert(x as f64)).collect(),
        DecodingResult::U16(v) => v.into_iter().map(|x| convert(x as f64)).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| convert(x as f64)).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| convert(x as f64)).collect(),
        DecodingResult::I8(v) => v.into_iter().map(|x| convert(x as f64)).collect(),
        DecodingResult::I16(v) => v.into_iter().map(|x| convert(x as f64)).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| convert(x as f64)).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| convert(x as f64)).collect(),
        DecodingResult::F32(v) => v.into_iter().map(|x| convert(x as f64)).collect(),
        DecodingResult::F64(v) => v.into_iter().map(convert).collect(),
    }
}

/// Read a single-band classified GeoTIFF.
pub fn read_lulc(path: &Path) -> Result<RasterGrid<u32>> {
    let file = File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
    let mut decoder =
        Decoder::new(BufReader::new(file)).with_context(|| format!("{} is not a valid TIFF", path.display()))?;
    let (width, height) = decoder.dimensions()?;

    let scale = decoder
        .find_tag(Tag::ModelPixelScaleTag)?
        .map(|v| v.into_f64_vec())
        .transpose()?;
    let tiepoint = decoder
        .find_tag(Tag::ModelTiepointTag)?
        .map(|v| v.into_f64_vec())
        .transpose()?;
    let (Some(scale), Some(tie)) = (scale, tiepoint) else {
        bail!("{}: missing ModelPixelScale/ModelTiepoint georeferencing", path.display());
    };
    if scale.len() < 2 || tie.len() < 6 {
        bail!("{}: malformed georeferencing tags", path.display());
    }
    let transform = GridTransform::new(tie[3] - tie[0] * scale[0], tie[4] + tie[1] * scale[1], scale[0], scale[1]);

    let crs = decoder
        .find_tag(Tag::GeoKeyDirectoryTag)?
        .map(|v| v.into_u16_vec())
        .transpose()?
        .and_then(|dir| epsg_from_geokeys(&dir))
        .map(Crs::from_epsg);
    let nodata = decoder
        .get_tag_ascii_string(Tag::GdalNodata)
        .ok()
        .and_then(|s| s.trim_matches(char::from(0)).trim().parse::<f64>().ok());

    let img = decoder.read_image().with_context(|| format!("Cannot decode {}", path.display()))?;
    let data = to_classes(img, nodata);
    let (width, height) = (width as usize, height as usize);
    if data.len() != width * height {
        bail!("{}: expected one band of {width}×{height} samples, got {}", path.display(), data.len());
    }
    Ok(RasterGrid { data, width, height, transform, crs, nodata: NODATA_CLASS })
}

/// GeoKey directory for a single EPSG code.
fn geokeys_for(crs: Crs) -> Vec<u16> {
    let geographic = crs == Crs::WGS84;
    let (model, key) = if geographic {
        (MODEL_TYPE_GEOGRAPHIC, GEOGRAPHIC_TYPE_KEY)
    } else {
        (MODEL_TYPE_PROJECTED, PROJECTED_CS_TYPE_KEY)
    };
    vec![1, 1, 0, 2, GT_MODEL_TYPE_KEY, 0, 1, model, key, 0, 1, crs.epsg as u16]
}

/// Write a Float32 GeoTIFF with NaN NoData.
pub fn write_density(path: &Path, grid: &RasterGrid<f32>) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Cannot create {}", path.display()))?;
    let mut encoder = TiffEncoder::new(BufWriter::new(file))?;
    let mut image = encoder.new_image::<colortype::Gray32Float>(grid.width as u32, grid.height as u32)?;

    let t = &grid.transform;
    let scale = [t.cell_width, t.cell_height, 0.0];
    let tiepoint = [0.0, 0.0, 0.0, t.origin_x, t.origin_y, 0.0];
    let dir = image.encoder();
    dir.write_tag(Tag::ModelPixelScaleTag, &scale[..])?;
    dir.write_tag(Tag::ModelTiepointTag, &tiepoint[..])?;
    if let Some(crs) = grid.crs {
        dir.write_tag(Tag::GeoKeyDirectoryTag, &geokeys_for(crs)[..])?;
    }
    dir.write_tag(Tag::GdalNodata, "nan")?;

    image
        .write_data(&grid.data)
        .with_context(|| format!("Cannot write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geokeys_prefer_projected_code() {
        let dir = [1, 1, 0, 3, 1024, 0, 1, 1, 2048, 0, 1, 4326, 3072, 0, 1, 6933];
        assert_eq!(epsg_from_geokeys(&dir), Some(6933));
        let geographic = [1, 1, 0, 2, 1024, 0, 1, 2, 2048, 0, 1, 4326];
        assert_eq!(epsg_from_geokeys(&geographic), Some(4326));
        let user = [1, 1, 0, 1, 3072, 0, 1, USER_DEFINED];
        assert_eq!(epsg_from_geokeys(&user), None);
    }

    #[test]
    fn class_conversion_masks_nodata() {
        let img = DecodingResult::I16(vec![1, 0, -9999, 17, 255]);
        assert_eq!(to_classes(img, Some(255.0)), vec![1, 0, NODATA_CLASS, 17, NODATA_CLASS]);
        let img = DecodingResult::F32(vec![2.0, f32::NAN, 2.5]);
        assert_eq!(to_classes(img, None), vec![2, NODATA_CLASS, NODATA_CLASS]);
    }

    #[test]
    fn density_roundtrips_through_geotiff() {
        let dir = std::env::temp_dir().join(format!("polopt-carbon-tiff-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("density.tif");

        let t = GridTransform::new(1000.0, 5000.0, 250.0, 250.0);
        let mut grid = RasterGrid::new(3, 2, t, Some(Crs::EQUAL_AREA), f32::NAN, f32::NAN);
        grid.set(0, 0, 5.0);
        grid.set(1, 2, 4.2);
        write_density(&path, &grid).unwrap();

        let mut decoder = Decoder::new(BufReader::new(File::open(&path).unwrap())).unwrap();
        assert_eq!(decoder.dimensions().unwrap(), (3, 2));
        let keys = decoder.get_tag_u16_vec(Tag::GeoKeyDirectoryTag).unwrap();
        assert_eq!(epsg_from_geokeys(&keys), Some(6933));
        let tie = decoder.get_tag_f64_vec(Tag::ModelTiepointTag).unwrap();
        assert_eq!(&tie[3..5], &[1000.0, 5000.0]);
        match decoder.read_image().unwrap() {
            DecodingResult::F32(v) => {
                assert_eq!(v[0], 5.0);
                assert_eq!(v[5], 4.2);
                assert!(v[1].is_nan());
            }
            other => panic!("unexpected sample type {other:?}"),
        }
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
