//! Carbon-zone and boundary vector layers.
//!
//! A zone carries the attributes the coefficient lookup is keyed on
//! (continental region, GEZ ecological zone term, frontier-forest flag) plus
//! the wetland/hydric flag used by the wetland override.

use std::collections::BTreeMap;

use geo::{Area, BooleanOps, BoundingRect, MultiPolygon};
use serde::{Deserialize, Serialize};

use crate::crs::Crs;
use crate::error::{CarbonError, OverlayError};
use crate::raster::M2_PER_HA;

/// Attribute field names recognised on zone features.
pub const FIELD_REGION: &str = "REGION";
pub const FIELD_GEZ: &str = "GEZ_TERM";
pub const FIELD_FRONTIER: &str = "FRONTIER";
pub const FIELD_WETLAND: &str = "WETLAND";
/// Accepted in place of [`FIELD_WETLAND`].
pub const FIELD_HYDRIC: &str = "HYDRIC";

/// Fields a zone feature must carry.
pub const REQUIRED_FIELDS: [&str; 3] = [FIELD_REGION, FIELD_GEZ, FIELD_FRONTIER];

/// Intersections smaller than this (m²) are not treated as zone overlap.
const OVERLAP_TOLERANCE_M2: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoneAttributes {
    pub region: String,
    pub gez: String,
    pub frontier: bool,
    /// Wetland / hydric zone.
    pub wetland: bool,
}

impl ZoneAttributes {
    /// Build attributes from a format-agnostic field map (field names are
    /// matched case-insensitively). Returns the names of missing or
    /// unparsable required fields on failure.
    pub fn from_fields(fields: &BTreeMap<String, String>) -> Result<Self, Vec<String>> {
        let lookup = |name: &str| {
            fields
                .iter()
                .find(|(k, _)| k.trim().eq_ignore_ascii_case(name))
                .map(|(_, v)| v.trim())
        };

        let mut missing = Vec::new();
        let region = lookup(FIELD_REGION).filter(|v| !v.is_empty());
        let gez = lookup(FIELD_GEZ).filter(|v| !v.is_empty());
        let frontier = lookup(FIELD_FRONTIER).and_then(parse_flag);
        if region.is_none() {
            missing.push(FIELD_REGION.to_string());
        }
        if gez.is_none() {
            missing.push(FIELD_GEZ.to_string());
        }
        if frontier.is_none() {
            missing.push(FIELD_FRONTIER.to_string());
        }
        let (wetland_field, wetland_value) = match lookup(FIELD_WETLAND) {
            Some(v) => (FIELD_WETLAND, Some(v)),
            None => (FIELD_HYDRIC, lookup(FIELD_HYDRIC)),
        };
        let wetland = match wetland_value {
            None | Some("") => Some(false),
            Some(v) => parse_flag(v),
        };
        if wetland.is_none() {
            missing.push(wetland_field.to_string());
        }

        match (region, gez, frontier, wetland) {
            (Some(region), Some(gez), Some(frontier), Some(wetland)) if missing.is_empty() => Ok(Self {
                region: region.to_string(),
                gez: gez.to_string(),
                frontier,
                wetland,
            }),
            _ => Err(missing),
        }
    }
}

/// Parse a boolean-ish attribute value.
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "1.0" | "true" | "t" | "y" | "yes" | "frontier" => Some(true),
        "0" | "0.0" | "false" | "f" | "n" | "no" | "non-frontier" => Some(false),
        _ => None,
    }
}

/// A single carbon-zone feature.
#[derive(Debug, Clone, PartialEq)]
pub struct ZonePolygon {
    pub id: String,
    pub geometry: MultiPolygon<f64>,
    pub attributes: ZoneAttributes,
}

/// A zone feature as read from a vector source, before attribute parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneFeature {
    pub id: String,
    pub geometry: MultiPolygon<f64>,
    pub fields: BTreeMap<String, String>,
}

/// A zone whose required attributes are missing or unparsable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneFieldError {
    pub zone: String,
    pub fields: Vec<String>,
}

impl From<ZoneFieldError> for CarbonError {
    fn from(e: ZoneFieldError) -> Self {
        CarbonError::MissingZoneFields { zone: e.zone, fields: e.fields }
    }
}

/// A carbon-zone layer with its CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneLayer {
    pub crs: Option<Crs>,
    pub zones: Vec<ZonePolygon>,
}

impl ZoneLayer {
    pub fn new(crs: Option<Crs>, zones: Vec<ZonePolygon>) -> Self {
        Self { crs, zones }
    }

    /// Parse attributes of every feature. Features with attribute errors are
    /// left out of the layer and reported.
    pub fn from_features(crs: Option<Crs>, features: Vec<ZoneFeature>) -> (Self, Vec<ZoneFieldError>) {
        let mut zones = Vec::with_capacity(features.len());
        let mut errors = Vec::new();
        for f in features {
            match ZoneAttributes::from_fields(&f.fields) {
                Ok(attributes) => zones.push(ZonePolygon { id: f.id, geometry: f.geometry, attributes }),
                Err(fields) => errors.push(ZoneFieldError { zone: f.id, fields }),
            }
        }
        (Self { crs, zones }, errors)
    }

    /// Identifiers carried by more than one zone, sorted.
    pub fn duplicate_ids(&self) -> Vec<String> {
        let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
        for z in &self.zones {
            *seen.entry(z.id.as_str()).or_default() += 1;
        }
        seen.into_iter().filter(|&(_, n)| n > 1).map(|(id, _)| id.to_string()).collect()
    }

    /// Zone indices ordered by identifier: the overlay's tie-break order.
    pub fn id_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.zones.len()).collect();
        order.sort_by(|&a, &b| self.zones[a].id.cmp(&self.zones[b].id).then(a.cmp(&b)));
        order
    }

    /// Pairs of zones whose geometries overlap by more than a square metre.
    /// Pairs are reported in identifier order; only meaningful in a metric CRS.
    pub fn overlaps(&self) -> Vec<OverlayError> {
        let order = self.id_order();
        let bboxes: Vec<_> = self.zones.iter().map(|z| z.geometry.bounding_rect()).collect();
        let mut found = Vec::new();
        for (i, &a) in order.iter().enumerate() {
            for &b in &order[i + 1..] {
                let (Some(ra), Some(rb)) = (bboxes[a], bboxes[b]) else {
                    continue;
                };
                let disjoint = ra.max().x <= rb.min().x
                    || rb.max().x <= ra.min().x
                    || ra.max().y <= rb.min().y
                    || rb.max().y <= ra.min().y;
                if disjoint {
                    continue;
                }
                let area = self.zones[a].geometry.intersection(&self.zones[b].geometry).unsigned_area();
                if area > OVERLAP_TOLERANCE_M2 {
                    found.push(OverlayError::OverlappingZones {
                        first: self.zones[a].id.clone(),
                        second: self.zones[b].id.clone(),
                        area_ha: area / M2_PER_HA,
                    });
                }
            }
        }
        found
    }
}

/// The project area of interest. Exactly one per run.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryPolygon {
    pub crs: Option<Crs>,
    pub geometry: MultiPolygon<f64>,
}

impl BoundaryPolygon {
    pub fn new(crs: Option<Crs>, geometry: MultiPolygon<f64>) -> Self {
        Self { crs, geometry }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn attrs() -> ZoneAttributes {
        ZoneAttributes {
            region: "Africa".into(),
            gez: "Tropical rainforest".into(),
            frontier: false,
            wetland: false,
        }
    }

    #[test]
    fn attributes_parse_case_insensitively() {
        let fields: BTreeMap<String, String> = [
            ("region", "Africa"),
            ("Gez_Term", " Tropical dry forest "),
            ("FRONTIER", "1"),
            ("wetland", "yes"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let a = ZoneAttributes::from_fields(&fields).unwrap();
        assert_eq!(a.gez, "Tropical dry forest");
        assert!(a.frontier);
        assert!(a.wetland);
    }

    #[test]
    fn attributes_report_every_missing_field() {
        let fields: BTreeMap<String, String> =
            [("REGION".to_string(), "Africa".to_string()), ("FRONTIER".to_string(), "maybe".to_string())]
                .into_iter()
                .collect();
        let missing = ZoneAttributes::from_fields(&fields).unwrap_err();
        assert_eq!(missing, vec!["GEZ_TERM".to_string(), "FRONTIER".to_string()]);
    }

    #[test]
    fn wetland_defaults_to_false() {
        let fields: BTreeMap<String, String> = [("REGION", "Asia"), ("GEZ_TERM", "Polar"), ("FRONTIER", "Non-frontier")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let a = ZoneAttributes::from_fields(&fields).unwrap();
        assert!(!a.wetland);
        assert!(!a.frontier);
    }

    #[test]
    fn hydric_field_sets_the_wetland_flag() {
        let fields: BTreeMap<String, String> =
            [("REGION", "Africa"), ("GEZ_TERM", "Tropical rainforest"), ("FRONTIER", "0"), ("Hydric", "1")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
        assert!(ZoneAttributes::from_fields(&fields).unwrap().wetland);

        let mut bad = fields.clone();
        bad.insert("Hydric".into(), "swampy".into());
        assert_eq!(ZoneAttributes::from_fields(&bad).unwrap_err(), vec!["HYDRIC".to_string()]);

        // WETLAND takes precedence when both are present.
        let mut both = fields;
        both.insert("WETLAND".into(), "no".into());
        assert!(!ZoneAttributes::from_fields(&both).unwrap().wetland);
    }

    #[test]
    fn from_features_reports_bad_zones() {
        let good: BTreeMap<String, String> = [("REGION", "Asia"), ("GEZ_TERM", "Polar"), ("FRONTIER", "0")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let features = vec![
            ZoneFeature { id: "ok".into(), geometry: square(0.0, 0.0, 1.0), fields: good },
            ZoneFeature { id: "bad".into(), geometry: square(1.0, 0.0, 1.0), fields: BTreeMap::new() },
        ];
        let (layer, errors) = ZoneLayer::from_features(Some(Crs::WGS84), features);
        assert_eq!(layer.zones.len(), 1);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].zone, "bad");
        assert_eq!(errors[0].fields, vec!["REGION", "GEZ_TERM", "FRONTIER"]);
        let err: CarbonError = errors[0].clone().into();
        assert_eq!(err.to_string(), "carbon zone `bad`: missing required field(s) REGION, GEZ_TERM, FRONTIER");
    }

    #[test]
    fn id_order_sorts_by_identifier() {
        let layer = ZoneLayer::new(
            Some(Crs::EQUAL_AREA),
            vec![
                ZonePolygon { id: "Z3".into(), geometry: square(0.0, 0.0, 10.0), attributes: attrs() },
                ZonePolygon { id: "Z1".into(), geometry: square(10.0, 0.0, 10.0), attributes: attrs() },
                ZonePolygon { id: "Z2".into(), geometry: square(20.0, 0.0, 10.0), attributes: attrs() },
            ],
        );
        assert_eq!(layer.id_order(), vec![1, 2, 0]);
        assert!(layer.duplicate_ids().is_empty());
    }

    #[test]
    fn duplicate_ids_are_listed_once() {
        let layer = ZoneLayer::new(
            Some(Crs::EQUAL_AREA),
            vec![
                ZonePolygon { id: "A".into(), geometry: square(0.0, 0.0, 10.0), attributes: attrs() },
                ZonePolygon { id: "B".into(), geometry: square(10.0, 0.0, 10.0), attributes: attrs() },
                ZonePolygon { id: "A".into(), geometry: square(20.0, 0.0, 10.0), attributes: attrs() },
                ZonePolygon { id: "A".into(), geometry: square(30.0, 0.0, 10.0), attributes: attrs() },
            ],
        );
        assert_eq!(layer.duplicate_ids(), vec!["A".to_string()]);
        assert_eq!(layer.id_order(), vec![0, 2, 3, 1]);
    }

    #[test]
    fn overlaps_detected_but_shared_edges_ignored() {
        let layer = ZoneLayer::new(
            Some(Crs::EQUAL_AREA),
            vec![
                ZonePolygon { id: "A".into(), geometry: square(0.0, 0.0, 100.0), attributes: attrs() },
                ZonePolygon { id: "B".into(), geometry: square(100.0, 0.0, 100.0), attributes: attrs() },
                ZonePolygon { id: "C".into(), geometry: square(150.0, 50.0, 100.0), attributes: attrs() },
            ],
        );
        let found = layer.overlaps();
        assert_eq!(found.len(), 1, "only B and C overlap: {found:?}");
        match &found[0] {
            OverlayError::OverlappingZones { first, second, area_ha } => {
                assert_eq!((first.as_str(), second.as_str()), ("B", "C"));
                assert!((area_ha - 0.25).abs() < 1e-9, "overlap area {area_ha} ha");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
