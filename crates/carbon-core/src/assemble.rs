//! Shapes aggregated results into the tables, features and density grid the
//! output writers persist. No I/O happens here.

use std::collections::BTreeMap;

use geo::MultiPolygon;
use serde::Serialize;

use crate::aggregate::{AggregatedResult, AggregationMethod, ClassBreakdown};
use crate::coefficients::TableSource;
use crate::crs::Crs;
use crate::overlay::{OverlayResult, SpatialUnit};
use crate::pipeline::{LookupTables, RunOptions, TARGET_CRS};
use crate::raster::{RasterGrid, NODATA_CLASS};
use crate::rules::AppliedRule;
use crate::zones::ZoneLayer;
use crate::ClassCode;

/// One row per zone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub zone_id: String,
    pub region: String,
    pub gez: String,
    pub frontier: bool,
    pub wetland: bool,
    pub method: AggregationMethod,
    /// Mg C/ha; `None` for zones with no area inside the boundary.
    pub coefficient: Option<f64>,
    pub dominant_class: Option<ClassCode>,
    pub total_area_ha: f64,
    /// Standardized class → area (ha).
    pub class_areas: BTreeMap<ClassCode, f64>,
    pub applied_rules: Vec<AppliedRule>,
    /// `coefficient × total_area_ha`.
    pub total_carbon_mg: Option<f64>,
}

/// A result row joined to its boundary-clipped zone geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultFeature {
    pub geometry: MultiPolygon<f64>,
    pub properties: ResultRow,
}

/// One row per spatial unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayRow {
    pub zone_id: String,
    pub region: String,
    pub gez: String,
    pub frontier: bool,
    pub wetland: bool,
    pub class: Option<ClassCode>,
    pub cell_count: u64,
    pub area_ha: f64,
    pub coefficient: Option<f64>,
    pub applied_rule: Option<AppliedRule>,
    pub source: Option<TableSource>,
    pub total_carbon_mg: Option<f64>,
}

/// Carbon-pool table row keyed by raw LULC code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassCoefficientRow {
    pub lucode: u32,
    pub label: String,
    pub std_class: ClassCode,
    /// Mg C/ha; `None` when the code does not occur in the project area.
    pub c_above: Option<f64>,
    pub overridden: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub country: String,
    pub method: AggregationMethod,
    pub force_wetland_overrides: bool,
    pub crs: Crs,
    pub cell_area_ha: f64,
    pub zone_count: usize,
    pub unit_count: usize,
    pub nodata_zone_count: usize,
    pub total_area_ha: f64,
    /// Sum of `area × coefficient` over all spatial units.
    pub total_carbon_mg: f64,
    pub warnings: Vec<String>,
}

/// Everything a run produces, ready for the output writers.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub results: Vec<AggregatedResult>,
    pub rows: Vec<ResultRow>,
    pub features: Vec<ResultFeature>,
    pub overlay_rows: Vec<OverlayRow>,
    pub class_table: Vec<ClassCoefficientRow>,
    /// Mg C/ha per cell in the target CRS; NaN where no unit applies.
    pub density: RasterGrid<f32>,
    pub summary: RunSummary,
}

/// Borrowed run state handed to [`assemble`].
pub struct Assembly<'a> {
    pub options: &'a RunOptions,
    pub tables: &'a LookupTables,
    pub lulc: &'a RasterGrid<u32>,
    pub zones: &'a ZoneLayer,
    pub overlay: &'a OverlayResult,
    pub units: &'a [SpatialUnit],
    /// Parallel to `units`.
    pub breakdowns: &'a [Option<ClassBreakdown>],
    pub results: Vec<AggregatedResult>,
}

pub fn assemble(a: Assembly<'_>) -> RunOutput {
    let mut rows = Vec::with_capacity(a.results.len());
    let mut features = Vec::with_capacity(a.results.len());
    for r in &a.results {
        let zi = r.zone_index;
        let attrs = &a.zones.zones[zi].attributes;
        let row = ResultRow {
            zone_id: r.zone_id.clone(),
            region: attrs.region.clone(),
            gez: attrs.gez.clone(),
            frontier: attrs.frontier,
            wetland: attrs.wetland,
            method: r.method,
            coefficient: r.coefficient,
            dominant_class: r.dominant_class,
            total_area_ha: r.total_area_ha,
            class_areas: r.breakdown.iter().map(|b| (b.class, b.area_ha)).collect(),
            applied_rules: r.applied_rules.clone(),
            total_carbon_mg: r.coefficient.map(|c| c * r.total_area_ha),
        };
        features.push(ResultFeature { geometry: a.overlay.clipped[zi].clone(), properties: row.clone() });
        rows.push(row);
    }

    let overlay_rows: Vec<OverlayRow> = a
        .units
        .iter()
        .zip(a.breakdowns)
        .map(|(u, b)| {
            let attrs = &a.zones.zones[u.zone_index].attributes;
            let coefficient = b.as_ref().map(|b| b.coefficient);
            OverlayRow {
                zone_id: u.zone_id.clone(),
                region: attrs.region.clone(),
                gez: attrs.gez.clone(),
                frontier: attrs.frontier,
                wetland: attrs.wetland,
                class: u.class,
                cell_count: u.cell_count,
                area_ha: u.area_ha,
                coefficient,
                applied_rule: b.as_ref().map(|b| b.applied_rule.clone()),
                source: b.as_ref().and_then(|b| b.source),
                total_carbon_mg: coefficient.map(|c| c * u.area_ha),
            }
        })
        .collect();

    let class_table = class_table(&a);
    let density = density_map(&a);

    let summary = RunSummary {
        country: a.options.country.clone(),
        method: a.options.method,
        force_wetland_overrides: a.options.force_wetland_overrides,
        crs: TARGET_CRS,
        cell_area_ha: a.overlay.cell_area_ha,
        zone_count: a.zones.zones.len(),
        unit_count: a.units.len(),
        nodata_zone_count: a.results.iter().filter(|r| r.coefficient.is_none()).count(),
        total_area_ha: a.units.iter().map(|u| u.area_ha).sum(),
        total_carbon_mg: overlay_rows.iter().filter_map(|r| r.total_carbon_mg).sum(),
        warnings: a.overlay.warnings.iter().map(ToString::to_string).collect(),
    };

    RunOutput {
        results: a.results,
        rows,
        features,
        overlay_rows,
        class_table,
        density,
        summary,
    }
}

/// Per raw code: coefficient of the unit holding most of its cells
/// (dominant), or the cell-weighted mean over units (weighted).
fn class_table(a: &Assembly<'_>) -> Vec<ClassCoefficientRow> {
    // raw code → (cells, coefficient) per unit, in unit order.
    let mut per_code: BTreeMap<u32, Vec<(u64, f64)>> = BTreeMap::new();
    for (u, b) in a.units.iter().zip(a.breakdowns) {
        let Some(b) = b else { continue };
        for (&raw, &n) in &u.raw_classes {
            per_code.entry(raw).or_default().push((n, b.coefficient));
        }
    }

    a.tables
        .crosswalk
        .entries()
        .map(|e| {
            let overridden = a.tables.class_overrides.as_ref().and_then(|o| o.get(e.raw));
            let computed = per_code.get(&e.raw).and_then(|parts| match a.options.method {
                AggregationMethod::Dominant => parts
                    .iter()
                    .fold(None, |best: Option<(u64, f64)>, &(n, c)| match best {
                        Some((bn, _)) if bn >= n => best,
                        _ => Some((n, c)),
                    })
                    .map(|(_, c)| c),
                AggregationMethod::Weighted => {
                    let cells: u64 = parts.iter().map(|(n, _)| n).sum();
                    (cells > 0).then(|| parts.iter().map(|&(n, c)| n as f64 * c).sum::<f64>() / cells as f64)
                }
            });
            ClassCoefficientRow {
                lucode: e.raw,
                label: e.label.clone(),
                std_class: e.class,
                c_above: overridden.or(computed),
                overridden: overridden.is_some(),
            }
        })
        .collect()
}

fn density_map(a: &Assembly<'_>) -> RasterGrid<f32> {
    let mut coefficient_of: BTreeMap<(usize, u32), f32> = BTreeMap::new();
    for (u, b) in a.units.iter().zip(a.breakdowns) {
        let Some(b) = b else { continue };
        for &raw in u.raw_classes.keys() {
            coefficient_of.insert((u.zone_index, raw), b.coefficient as f32);
        }
    }

    let mut density = RasterGrid::new(
        a.lulc.width,
        a.lulc.height,
        a.lulc.transform,
        a.lulc.crs,
        f32::NAN,
        f32::NAN,
    );
    for (i, &zi) in a.overlay.zone_grid.data.iter().enumerate() {
        if zi == NODATA_CLASS {
            continue;
        }
        if let Some(&c) = coefficient_of.get(&(zi as usize, a.lulc.data[i])) {
            density.data[i] = c;
        }
    }
    density
}
