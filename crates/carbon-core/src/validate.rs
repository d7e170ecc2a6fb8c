//! Pre-run checks that do not perform the overlay.
//!
//! Everything is collected; nothing here fails fast.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{info, warn};

use crate::coefficients::CoefficientKey;
use crate::crs::Crs;
use crate::error::OverlayError;
use crate::pipeline::{LookupTables, RunInputs, RunOptions, TARGET_CRS};
use crate::reproject::{reproject_zones, LAYER_BOUNDARY, LAYER_LULC, LAYER_ZONES};
use crate::zones::ZoneFieldError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerCrs {
    pub layer: String,
    pub crs: Option<Crs>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneOverlap {
    pub first: String,
    pub second: String,
    pub area_ha: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    /// Raw codes in the raster with no crosswalk entry.
    pub unmapped_classes: Vec<u32>,
    /// Keys no table can resolve, over every zone × observed class.
    pub missing_coefficients: Vec<CoefficientKey>,
    /// Layers lacking a CRS.
    pub missing_crs: Vec<String>,
    /// Layers in a CRS the reprojector cannot handle.
    pub unsupported_crs: Vec<LayerCrs>,
    /// Vector layers whose CRS differs from the LULC raster's.
    pub crs_mismatches: Vec<LayerCrs>,
    /// Layers not already in the target CRS; reprojected at run time.
    pub reprojected_layers: Vec<LayerCrs>,
    pub missing_zone_fields: Vec<ZoneFieldError>,
    /// Identifiers shared by more than one zone feature.
    pub duplicate_zone_ids: Vec<String>,
    pub overlapping_zones: Vec<ZoneOverlap>,
    pub is_valid: bool,
}

impl ValidationReport {
    /// Attach attribute errors found while reading the zone layer.
    pub fn with_zone_field_errors(mut self, errors: Vec<ZoneFieldError>) -> Self {
        self.missing_zone_fields.extend(errors);
        self.is_valid = self.compute_valid();
        self
    }

    fn compute_valid(&self) -> bool {
        self.unmapped_classes.is_empty()
            && self.missing_coefficients.is_empty()
            && self.missing_crs.is_empty()
            && self.unsupported_crs.is_empty()
            && self.missing_zone_fields.is_empty()
    }
}

pub fn validate(inputs: &RunInputs, tables: &LookupTables, options: &RunOptions) -> ValidationReport {
    let mut missing_crs = Vec::new();
    let mut unsupported_crs = Vec::new();
    let mut reprojected_layers = Vec::new();
    for (layer, crs) in [
        (LAYER_LULC, inputs.lulc.crs),
        (LAYER_ZONES, inputs.zones.crs),
        (LAYER_BOUNDARY, inputs.boundary.crs),
    ] {
        match crs {
            None => missing_crs.push(layer.to_string()),
            Some(c) if !c.is_supported() => unsupported_crs.push(LayerCrs { layer: layer.to_string(), crs }),
            Some(c) if c != TARGET_CRS => reprojected_layers.push(LayerCrs { layer: layer.to_string(), crs }),
            Some(_) => {}
        }
    }
    // Vector layers are held against the raster they are overlaid on.
    let crs_mismatches: Vec<LayerCrs> = match inputs.lulc.crs {
        Some(lulc_crs) => [(LAYER_ZONES, inputs.zones.crs), (LAYER_BOUNDARY, inputs.boundary.crs)]
            .into_iter()
            .filter(|&(_, crs)| crs.is_some_and(|c| c != lulc_crs))
            .map(|(layer, crs)| LayerCrs { layer: layer.to_string(), crs })
            .collect(),
        None => Vec::new(),
    };
    if !crs_mismatches.is_empty() {
        warn!(layers = crs_mismatches.len(), "vector layers are not in the LULC raster's CRS");
    }

    let (mapped, unmapped) = tables.crosswalk.map_observed(&inputs.lulc.observed_classes());
    let unmapped_classes = unmapped.map(|e| e.codes).unwrap_or_default();
    let classes: BTreeSet<_> = mapped.values().copied().collect();

    let resolver = tables.resolver();
    let mut missing: BTreeSet<CoefficientKey> = BTreeSet::new();
    for zone in &inputs.zones.zones {
        let wetland_override = options.force_wetland_overrides && zone.attributes.wetland;
        for &class in &classes {
            if let Err(key) = tables.rules.evaluate(&zone.attributes, class, wetland_override).resolve(&resolver) {
                missing.insert(key);
            }
        }
    }

    // Overlap areas only mean something in the equal-area CRS.
    let overlapping_zones = match reproject_zones(&inputs.zones, TARGET_CRS) {
        Ok(layer) => layer
            .overlaps()
            .into_iter()
            .filter_map(|w| match w {
                OverlayError::OverlappingZones { first, second, area_ha } => Some(ZoneOverlap { first, second, area_ha }),
                _ => None,
            })
            .collect(),
        Err(e) => {
            warn!("overlap check skipped: {e}");
            Vec::new()
        }
    };

    let mut report = ValidationReport {
        unmapped_classes,
        missing_coefficients: missing.into_iter().collect(),
        missing_crs,
        unsupported_crs,
        crs_mismatches,
        reprojected_layers,
        missing_zone_fields: Vec::new(),
        duplicate_zone_ids: inputs.zones.duplicate_ids(),
        overlapping_zones,
        is_valid: false,
    };
    report.is_valid = report.compute_valid();
    info!(
        valid = report.is_valid,
        unmapped = report.unmapped_classes.len(),
        missing_coefficients = report.missing_coefficients.len(),
        "validation finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coefficients::ClassRef;
    use crate::raster::{GridTransform, RasterGrid};
    use crate::zones::{BoundaryPolygon, ZoneAttributes, ZoneLayer, ZonePolygon};
    use geo::{polygon, MultiPolygon};

    fn square(x0: f64, y0: f64, size: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: x0, y: y0),
            (x: x0 + size, y: y0),
            (x: x0 + size, y: y0 + size),
            (x: x0, y: y0 + size),
            (x: x0, y: y0),
        ]])
    }

    fn inputs(codes: &[u32], raster_crs: Option<Crs>) -> RunInputs {
        let mut lulc = RasterGrid::classified(codes.len(), 1, GridTransform::new(0.0, 100.0, 100.0, 100.0), raster_crs);
        lulc.data.copy_from_slice(codes);
        let attrs = ZoneAttributes { region: "Africa".into(), gez: "Tropical rainforest".into(), frontier: false, wetland: true };
        RunInputs {
            lulc,
            zones: ZoneLayer::new(
                Some(Crs::EQUAL_AREA),
                vec![
                    ZonePolygon { id: "Z1".into(), geometry: square(0.0, 0.0, 200.0), attributes: attrs.clone() },
                    ZonePolygon { id: "Z2".into(), geometry: square(100.0, 0.0, 200.0), attributes: attrs },
                ],
            ),
            boundary: BoundaryPolygon::new(Some(Crs::WGS84), square(0.0, 0.0, 1.0)),
        }
    }

    #[test]
    fn reports_everything_at_once() {
        let report = validate(&inputs(&[12, 99, 2, 98], None), &LookupTables::builtin(), &RunOptions::default());
        assert!(!report.is_valid);
        assert_eq!(report.unmapped_classes, vec![98, 99]);
        assert_eq!(report.missing_crs, vec!["lulc".to_string()]);
        // Without a raster CRS there is nothing to hold the vectors against.
        assert!(report.crs_mismatches.is_empty());
        assert_eq!(report.reprojected_layers, vec![LayerCrs { layer: "boundary".into(), crs: Some(Crs::WGS84) }]);
        // Class 16 (from IGBP 12) has a global fallback; class 1 (from IGBP 2) does not.
        assert_eq!(
            report.missing_coefficients,
            vec![CoefficientKey::new("Africa", "Tropical rainforest", false, ClassRef::Standard(1))]
        );
        assert_eq!(report.overlapping_zones.len(), 1);
        assert!((report.overlapping_zones[0].area_ha - 2.0).abs() < 1e-9);
    }

    #[test]
    fn layers_sharing_the_raster_crs_do_not_mismatch() {
        let mut same = inputs(&[12], Some(Crs::WGS84));
        same.zones.crs = Some(Crs::WGS84);
        let report = validate(&same, &LookupTables::builtin(), &RunOptions::default());
        assert!(report.crs_mismatches.is_empty(), "{:?}", report.crs_mismatches);
        assert_eq!(report.reprojected_layers.len(), 3);

        let mixed = inputs(&[12], Some(Crs::EQUAL_AREA));
        let report = validate(&mixed, &LookupTables::builtin(), &RunOptions::default());
        assert_eq!(report.crs_mismatches, vec![LayerCrs { layer: "boundary".into(), crs: Some(Crs::WGS84) }]);
        assert_eq!(report.reprojected_layers, report.crs_mismatches);
    }

    #[test]
    fn duplicate_zone_ids_are_reported() {
        let mut dup = inputs(&[12], Some(Crs::EQUAL_AREA));
        dup.zones.zones[1].id = "Z1".into();
        let report = validate(&dup, &LookupTables::builtin(), &RunOptions::default());
        assert_eq!(report.duplicate_zone_ids, vec!["Z1".to_string()]);
    }

    #[test]
    fn savanna_fill_satisfies_validation() {
        // IGBP 9 → class 13 has no row of its own; forest class 1 does.
        let tables = LookupTables::builtin()
            .with_coefficient_csv("lookup", "REGION,GEZ_TERM,FRONTIER,CLASS,CARBON_VALUE\nAfrica,Tropical rainforest,0,1,200\n")
            .unwrap();
        let report = validate(&inputs(&[2, 9], Some(Crs::EQUAL_AREA)), &tables, &RunOptions::default());
        assert!(report.missing_coefficients.is_empty(), "{:?}", report.missing_coefficients);
    }

    #[test]
    fn wetland_override_changes_required_keys() {
        let options = RunOptions { force_wetland_overrides: true, ..RunOptions::default() };
        let report = validate(&inputs(&[12], Some(Crs::EQUAL_AREA)), &LookupTables::builtin(), &options);
        assert_eq!(
            report.missing_coefficients,
            vec![CoefficientKey::new("Africa", "Tropical rainforest", false, ClassRef::Wetland)]
        );
    }

    #[test]
    fn clean_inputs_are_valid_until_field_errors_arrive() {
        let tables = LookupTables::builtin()
            .with_coefficient_csv("lookup", "REGION,GEZ_TERM,FRONTIER,CLASS,CARBON_VALUE\nAfrica,Tropical rainforest,0,1,200\n")
            .unwrap();
        let report = validate(&inputs(&[2, 12], Some(Crs::EQUAL_AREA)), &tables, &RunOptions::default());
        assert!(report.is_valid, "{report:?}");
        let report = report.with_zone_field_errors(vec![ZoneFieldError { zone: "Z3".into(), fields: vec!["REGION".into()] }]);
        assert!(!report.is_valid);
    }
}
