//! Raster × carbon-zone overlay inside the project boundary.
//!
//! Each zone is clipped to the boundary and rasterised onto the LULC grid by
//! cell centre (centres on a polygon edge count as inside). Membership is
//! computed per zone, independently, which is the part that runs on the rayon
//! pool under the `threading` feature. A sequential pass then hands every
//! cell to exactly one zone: the candidate whose identifier sorts first.

use std::collections::{BTreeMap, BTreeSet};

use geo::coordinate_position::{CoordPos, CoordinatePosition};
use geo::{coord, Area, BooleanOps, BoundingRect, Intersects, MultiPolygon};
#[cfg(feature = "threading")]
use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::crosswalk::Crosswalk;
use crate::error::{OverlayError, UnmappedClassError};
use crate::raster::{RasterGrid, M2_PER_HA, NODATA_CLASS};
use crate::zones::{BoundaryPolygon, ZoneLayer};
use crate::ClassCode;

/// Raw cell tally of one zone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneTally {
    pub zone_index: usize,
    pub zone_id: String,
    /// Raw LULC code → number of cells attributed to this zone.
    pub raw_counts: BTreeMap<u32, u64>,
    /// Area of the zone geometry after clipping to the boundary.
    pub clipped_area_ha: f64,
}

impl ZoneTally {
    pub fn cell_count(&self) -> u64 {
        self.raw_counts.values().sum()
    }
}

/// One (zone, standardized class) combination.
///
/// A zone with no cells inside the boundary is represented by a single unit
/// with `class: None` and zero area rather than being omitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpatialUnit {
    pub zone_index: usize,
    pub zone_id: String,
    pub class: Option<ClassCode>,
    /// Raw codes folded into this unit and their cell counts.
    pub raw_classes: BTreeMap<u32, u64>,
    pub cell_count: u64,
    pub area_ha: f64,
    /// Set when wetland overrides are forced and the zone is wetland/hydric.
    pub wetland_override: bool,
}

#[derive(Debug, Clone)]
pub struct OverlayResult {
    /// One tally per zone, in layer order.
    pub tallies: Vec<ZoneTally>,
    /// Zone geometries clipped to the boundary, in layer order.
    pub clipped: Vec<MultiPolygon<f64>>,
    /// Zone index per raster cell; [`NODATA_CLASS`] where no zone applies.
    pub zone_grid: RasterGrid<u32>,
    pub cell_area_ha: f64,
    pub warnings: Vec<OverlayError>,
}

/// Cell indices whose centre lies in `geometry`, NoData cells skipped.
fn member_cells(raster: &RasterGrid<u32>, geometry: &MultiPolygon<f64>) -> Vec<usize> {
    let Some((r0, r1, c0, c1)) = geometry.bounding_rect().and_then(|bb| raster.window_for(bb)) else {
        return Vec::new();
    };
    let mut cells = Vec::new();
    for row in r0..=r1 {
        for col in c0..=c1 {
            if raster.is_nodata(row, col) {
                continue;
            }
            let (x, y) = raster.transform.cell_center(row, col);
            if geometry.coordinate_position(&coord! { x: x, y: y }) != CoordPos::Outside {
                cells.push(row * raster.width + col);
            }
        }
    }
    cells
}

/// Member cells of every clipped zone, in layer order.
fn candidate_cells(raster: &RasterGrid<u32>, clipped: &[MultiPolygon<f64>]) -> Vec<Vec<usize>> {
    #[cfg(feature = "threading")]
    {
        clipped.par_iter().map(|g| member_cells(raster, g)).collect()
    }
    #[cfg(not(feature = "threading"))]
    {
        clipped.iter().map(|g| member_cells(raster, g)).collect()
    }
}

/// Overlay `raster` with `zones` clipped to `boundary`. All three must share
/// one projected CRS.
///
/// Spatial mismatches are returned as warnings next to a (possibly empty)
/// result, never as an error.
pub fn overlay(raster: &RasterGrid<u32>, zones: &ZoneLayer, boundary: &BoundaryPolygon) -> OverlayResult {
    let mut warnings = Vec::new();
    if !boundary.geometry.intersects(&raster.bounds()) {
        warnings.push(OverlayError::RasterOutsideBoundary);
    }

    let clipped: Vec<MultiPolygon<f64>> = zones
        .zones
        .iter()
        .map(|z| z.geometry.intersection(&boundary.geometry))
        .collect();
    let clipped_area_ha: Vec<f64> = clipped.iter().map(|g| g.unsigned_area() / M2_PER_HA).collect();
    if clipped_area_ha.iter().all(|&a| a <= 0.0) {
        warnings.push(OverlayError::DisjointExtents);
    }
    warnings.extend(zones.overlaps());

    let candidates = candidate_cells(raster, &clipped);

    let mut zone_grid = RasterGrid::new(
        raster.width,
        raster.height,
        raster.transform,
        raster.crs,
        NODATA_CLASS,
        NODATA_CLASS,
    );
    let mut tallies: Vec<ZoneTally> = zones
        .zones
        .iter()
        .enumerate()
        .map(|(i, z)| ZoneTally {
            zone_index: i,
            zone_id: z.id.clone(),
            raw_counts: BTreeMap::new(),
            clipped_area_ha: clipped_area_ha[i],
        })
        .collect();

    for zi in zones.id_order() {
        for &cell in &candidates[zi] {
            if zone_grid.data[cell] != NODATA_CLASS {
                continue;
            }
            zone_grid.data[cell] = zi as u32;
            *tallies[zi].raw_counts.entry(raster.data[cell]).or_insert(0) += 1;
        }
        debug!(
            zone = %tallies[zi].zone_id,
            candidates = candidates[zi].len(),
            cells = tallies[zi].cell_count(),
            "zone rasterised"
        );
    }

    OverlayResult {
        tallies,
        clipped,
        zone_grid,
        cell_area_ha: raster.cell_area_ha(),
        warnings,
    }
}

impl OverlayResult {
    /// Raw codes of every cell attributed to some zone.
    pub fn observed_codes(&self) -> BTreeSet<u32> {
        self.tallies.iter().flat_map(|t| t.raw_counts.keys().copied()).collect()
    }

    pub fn total_cells(&self) -> u64 {
        self.tallies.iter().map(ZoneTally::cell_count).sum()
    }

    /// Fold raw tallies into spatial units through the crosswalk.
    ///
    /// Units come out ordered by zone identifier, then class. Only codes that
    /// were actually observed are looked up. Cells of unmapped codes are left
    /// out of the units and every such code is reported alongside them.
    pub fn spatial_units(
        &self,
        zones: &ZoneLayer,
        crosswalk: &Crosswalk,
        force_wetland_overrides: bool,
    ) -> (Vec<SpatialUnit>, Option<UnmappedClassError>) {
        let (mapping, unmapped) = crosswalk.map_observed(&self.observed_codes());
        let mut units = Vec::new();
        for zi in zones.id_order() {
            let tally = &self.tallies[zi];
            let wetland_override = force_wetland_overrides && zones.zones[zi].attributes.wetland;

            let mut by_class: BTreeMap<ClassCode, BTreeMap<u32, u64>> = BTreeMap::new();
            for (&raw, &n) in &tally.raw_counts {
                if let Some(&class) = mapping.get(&raw) {
                    by_class.entry(class).or_default().insert(raw, n);
                }
            }
            if by_class.is_empty() {
                units.push(SpatialUnit {
                    zone_index: zi,
                    zone_id: tally.zone_id.clone(),
                    class: None,
                    raw_classes: BTreeMap::new(),
                    cell_count: 0,
                    area_ha: 0.0,
                    wetland_override,
                });
                continue;
            }
            for (class, raw_classes) in by_class {
                let cell_count: u64 = raw_classes.values().sum();
                units.push(SpatialUnit {
                    zone_index: zi,
                    zone_id: tally.zone_id.clone(),
                    class: Some(class),
                    raw_classes,
                    cell_count,
                    area_ha: cell_count as f64 * self.cell_area_ha,
                    wetland_override,
                });
            }
        }
        (units, unmapped)
    }
}
