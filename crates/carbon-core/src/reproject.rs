//! Re-expression of every input in the equal-area target CRS.
//!
//! Inputs are never mutated; each function returns a new value. A layer that
//! already uses the target CRS is cloned unchanged.

use geo::{coord, Area, Coord, MapCoords, MultiPolygon};
use tracing::debug;

use crate::crs::Crs;
use crate::error::ProjectionError;
use crate::raster::{GridTransform, RasterGrid};
use crate::zones::{BoundaryPolygon, ZoneLayer, ZonePolygon};

pub const LAYER_LULC: &str = "lulc";
pub const LAYER_ZONES: &str = "carbon_zones";
pub const LAYER_BOUNDARY: &str = "boundary";

/// Samples per grid edge when projecting the raster extent.
const EDGE_SAMPLES: usize = 64;

fn source_crs(crs: Option<Crs>, layer: &str) -> Result<Crs, ProjectionError> {
    let crs = crs.ok_or_else(|| ProjectionError::MissingCrs { layer: layer.to_string() })?;
    if !crs.is_supported() {
        return Err(ProjectionError::UnsupportedCrs { layer: layer.to_string(), crs });
    }
    Ok(crs)
}

/// Nearest-neighbour reprojection of a classified grid.
///
/// The target grid keeps the source dimensions and spans the projected
/// bounding box of the source extent.
pub fn reproject_raster(src: &RasterGrid<u32>, target: Crs) -> Result<RasterGrid<u32>, ProjectionError> {
    let from = source_crs(src.crs, LAYER_LULC)?;
    if from == target {
        return Ok(src.clone());
    }
    if src.is_empty() {
        return Err(ProjectionError::DegenerateRaster { reason: "raster has no cells".into() });
    }

    let b = src.bounds();
    let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for i in 0..=EDGE_SAMPLES {
        let t = i as f64 / EDGE_SAMPLES as f64;
        let x = b.min().x + t * b.width();
        let y = b.min().y + t * b.height();
        for (px, py) in [(x, b.min().y), (x, b.max().y), (b.min().x, y), (b.max().x, y)] {
            let (tx, ty) = from.transform(target, px, py)?;
            min_x = min_x.min(tx);
            max_x = max_x.max(tx);
            min_y = min_y.min(ty);
            max_y = max_y.max(ty);
        }
    }

    let cell_w = (max_x - min_x) / src.width as f64;
    let cell_h = (max_y - min_y) / src.height as f64;
    if !(cell_w.is_finite() && cell_h.is_finite() && cell_w > 0.0 && cell_h > 0.0) {
        return Err(ProjectionError::DegenerateRaster {
            reason: format!("target cell size {cell_w} × {cell_h}"),
        });
    }

    let transform = GridTransform::new(min_x, max_y, cell_w, cell_h);
    let mut out = RasterGrid::new(src.width, src.height, transform, Some(target), src.nodata, src.nodata);
    for row in 0..out.height {
        for col in 0..out.width {
            let (x, y) = transform.cell_center(row, col);
            let Ok((sx, sy)) = target.transform(from, x, y) else {
                continue;
            };
            if let Some((r, c)) = src.transform.cell_at(sx, sy, src.width, src.height) {
                out.set(row, col, src.get(r, c));
            }
        }
    }
    debug!(
        from = %from,
        to = %target,
        cell_w,
        cell_h,
        "reprojected {}×{} raster",
        out.width,
        out.height
    );
    Ok(out)
}

fn reproject_geometry(
    geometry: &MultiPolygon<f64>,
    from: Crs,
    to: Crs,
    layer: &str,
    feature: &str,
) -> Result<MultiPolygon<f64>, ProjectionError> {
    let projected = if from == to {
        geometry.clone()
    } else {
        geometry.try_map_coords(move |c: Coord<f64>| {
            let (x, y) = from.transform(to, c.x, c.y)?;
            Ok::<_, ProjectionError>(coord! { x: x, y: y })
        })?
    };
    let area = projected.unsigned_area();
    if !area.is_finite() || area <= 0.0 {
        return Err(ProjectionError::DegenerateGeometry {
            layer: layer.to_string(),
            feature: feature.to_string(),
        });
    }
    Ok(projected)
}

pub fn reproject_zones(layer: &ZoneLayer, target: Crs) -> Result<ZoneLayer, ProjectionError> {
    let from = source_crs(layer.crs, LAYER_ZONES)?;
    let zones = layer
        .zones
        .iter()
        .map(|z| {
            Ok(ZonePolygon {
                id: z.id.clone(),
                geometry: reproject_geometry(&z.geometry, from, target, LAYER_ZONES, &z.id)?,
                attributes: z.attributes.clone(),
            })
        })
        .collect::<Result<Vec<_>, ProjectionError>>()?;
    Ok(ZoneLayer::new(Some(target), zones))
}

pub fn reproject_boundary(boundary: &BoundaryPolygon, target: Crs) -> Result<BoundaryPolygon, ProjectionError> {
    let from = source_crs(boundary.crs, LAYER_BOUNDARY)?;
    let geometry = reproject_geometry(&boundary.geometry, from, target, LAYER_BOUNDARY, LAYER_BOUNDARY)?;
    Ok(BoundaryPolygon::new(Some(target), geometry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::NODATA_CLASS;
    use crate::zones::ZoneAttributes;
    use geo::polygon;

    fn lonlat_square(lon0: f64, lat0: f64, size: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: lon0, y: lat0),
            (x: lon0 + size, y: lat0),
            (x: lon0 + size, y: lat0 + size),
            (x: lon0, y: lat0 + size),
            (x: lon0, y: lat0),
        ]])
    }

    #[test]
    fn missing_crs_is_a_projection_error() {
        let grid = RasterGrid::classified(2, 2, GridTransform::new(0.0, 1.0, 0.5, 0.5), None);
        let err = reproject_raster(&grid, Crs::EQUAL_AREA).unwrap_err();
        assert_eq!(err, ProjectionError::MissingCrs { layer: "lulc".into() });
    }

    #[test]
    fn unsupported_crs_is_rejected() {
        let b = BoundaryPolygon::new(Some(Crs::from_epsg(32636)), lonlat_square(0.0, 0.0, 1.0));
        let err = reproject_boundary(&b, Crs::EQUAL_AREA).unwrap_err();
        assert!(matches!(err, ProjectionError::UnsupportedCrs { ref layer, .. } if layer == "boundary"), "{err:?}");
    }

    #[test]
    fn raster_keeps_classes_and_dimensions() {
        // 4×2 geographic grid of 0.25° cells at the equator.
        let mut g = RasterGrid::classified(4, 2, GridTransform::new(30.0, 0.5, 0.25, 0.25), Some(Crs::WGS84));
        for r in 0..2 {
            for c in 0..4 {
                g.set(r, c, (r * 4 + c) as u32 + 1);
            }
        }
        let out = reproject_raster(&g, Crs::EQUAL_AREA).unwrap();
        assert_eq!((out.width, out.height), (4, 2));
        assert_eq!(out.crs, Some(Crs::EQUAL_AREA));
        assert_eq!(out.data, g.data, "axis-aligned cells map one to one");
        assert!(src_nodata_free(&out));
        // ≈ 24.1 km × 31.9 km per cell near the equator (equal area, not conformal).
        let ha = out.cell_area_ha();
        assert!((ha - 76_900.0).abs() < 1_500.0, "cell area {ha} ha");
    }

    fn src_nodata_free(g: &RasterGrid<u32>) -> bool {
        g.data.iter().all(|&v| v != NODATA_CLASS)
    }

    #[test]
    fn zones_reprojected_and_attributes_kept() {
        let attrs = ZoneAttributes { region: "Africa".into(), gez: "Tropical shrubland".into(), frontier: false, wetland: true };
        let layer = ZoneLayer::new(
            Some(Crs::WGS84),
            vec![ZonePolygon { id: "Z1".into(), geometry: lonlat_square(0.0, 0.0, 1.0), attributes: attrs.clone() }],
        );
        let out = reproject_zones(&layer, Crs::EQUAL_AREA).unwrap();
        assert_eq!(out.crs, Some(Crs::EQUAL_AREA));
        assert_eq!(out.zones[0].attributes, attrs);
        let km2 = out.zones[0].geometry.unsigned_area() / 1e6;
        assert!((km2 - 12_309.0).abs() < 15.0, "area {km2} km²");
        // The input is untouched.
        assert_eq!(layer.crs, Some(Crs::WGS84));
    }

    #[test]
    fn collapsed_polygon_is_degenerate() {
        let sliver = MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 2.0, y: 0.0),
            (x: 0.0, y: 0.0),
        ]]);
        let layer = ZoneLayer::new(
            Some(Crs::WGS84),
            vec![ZonePolygon {
                id: "flat".into(),
                geometry: sliver,
                attributes: ZoneAttributes { region: "Asia".into(), gez: "Polar".into(), frontier: false, wetland: false },
            }],
        );
        let err = reproject_zones(&layer, Crs::EQUAL_AREA).unwrap_err();
        assert_eq!(err, ProjectionError::DegenerateGeometry { layer: "carbon_zones".into(), feature: "flat".into() });
    }
}
