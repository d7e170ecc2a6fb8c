//! GeoJSON input (carbon zones, boundary) and output (result features).
//!
//! Polygon and MultiPolygon geometries are read; anything else is an error.
//! A legacy `crs` member names the CRS; without one the file is CRS84.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use carbon_core::assemble::{ResultFeature, ResultRow};
use carbon_core::crs::Crs;
use carbon_core::zones::{BoundaryPolygon, ZoneFeature, ZoneFieldError, ZoneLayer};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use serde_json::{json, Map, Value};

/// Property names tried, in order, when a feature has no `id`.
const ID_FIELDS: [&str; 3] = ["ID", "ZONE_ID", "CODE"];

struct Feature {
    id: Option<String>,
    geometry: MultiPolygon<f64>,
    properties: BTreeMap<String, String>,
}

struct Collection {
    crs: Option<Crs>,
    features: Vec<Feature>,
}

fn parse_position(v: &Value) -> Result<Coord<f64>> {
    let pos = v.as_array().ok_or_else(|| anyhow!("position is not an array"))?;
    match (pos.first().and_then(Value::as_f64), pos.get(1).and_then(Value::as_f64)) {
        (Some(x), Some(y)) => Ok(Coord { x, y }),
        _ => bail!("position needs two numbers"),
    }
}

fn parse_ring(v: &Value) -> Result<LineString<f64>> {
    let coords = v
        .as_array()
        .ok_or_else(|| anyhow!("ring is not an array"))?
        .iter()
        .map(parse_position)
        .collect::<Result<Vec<_>>>()?;
    if coords.len() < 4 {
        bail!("ring has {} positions, at least 4 are required", coords.len());
    }
    Ok(LineString::new(coords))
}

fn parse_polygon(v: &Value) -> Result<Polygon<f64>> {
    let rings = v.as_array().ok_or_else(|| anyhow!("polygon is not an array of rings"))?;
    let mut rings = rings.iter().map(parse_ring);
    let exterior = rings.next().ok_or_else(|| anyhow!("polygon has no rings"))??;
    let interiors = rings.collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn parse_geometry(v: &Value) -> Result<MultiPolygon<f64>> {
    let kind = v.get("type").and_then(Value::as_str).unwrap_or_default();
    let coords = v.get("coordinates").ok_or_else(|| anyhow!("geometry has no coordinates"))?;
    match kind {
        "Polygon" => Ok(MultiPolygon::new(vec![parse_polygon(coords)?])),
        "MultiPolygon" => {
            let polys = coords
                .as_array()
                .ok_or_else(|| anyhow!("MultiPolygon coordinates are not an array"))?
                .iter()
                .map(parse_polygon)
                .collect::<Result<Vec<_>>>()?;
            Ok(MultiPolygon::new(polys))
        }
        other => bail!("unsupported geometry type `{other}` (expected Polygon or MultiPolygon)"),
    }
}

/// Property values as text; null is dropped.
fn property_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

fn parse_collection(text: &str) -> Result<Collection> {
    let root: Value = serde_json::from_str(text)?;
    let crs = match root.pointer("/crs/properties/name").and_then(Value::as_str) {
        Some(name) => Some(Crs::parse(name)?),
        None => Some(Crs::WGS84),
    };

    let raw: Vec<&Value> = match root.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") => root
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| anyhow!("FeatureCollection has no features array"))?
            .iter()
            .collect(),
        Some("Feature") => vec![&root],
        other => bail!("expected a FeatureCollection or Feature, found {other:?}"),
    };

    let mut features = Vec::with_capacity(raw.len());
    for (index, f) in raw.into_iter().enumerate() {
        let geometry = f
            .get("geometry")
            .filter(|g| !g.is_null())
            .ok_or_else(|| anyhow!("feature {index} has no geometry"))?;
        let geometry = parse_geometry(geometry).with_context(|| format!("feature {index}"))?;
        let properties = f
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| props.iter().filter_map(|(k, v)| property_text(v).map(|t| (k.clone(), t))).collect())
            .unwrap_or_default();
        let id = f.get("id").and_then(property_text);
        features.push(Feature { id, geometry, properties });
    }
    Ok(Collection { crs, features })
}

fn zone_id(feature: &Feature, index: usize) -> String {
    if let Some(id) = &feature.id {
        return id.clone();
    }
    ID_FIELDS
        .iter()
        .find_map(|name| {
            feature
                .properties
                .iter()
                .find(|(k, v)| k.eq_ignore_ascii_case(name) && !v.trim().is_empty())
                .map(|(_, v)| v.trim().to_string())
        })
        .unwrap_or_else(|| index.to_string())
}

fn parse_zones(text: &str) -> Result<(ZoneLayer, Vec<ZoneFieldError>)> {
    let collection = parse_collection(text)?;
    let features = collection
        .features
        .into_iter()
        .enumerate()
        .map(|(index, f)| ZoneFeature { id: zone_id(&f, index), geometry: f.geometry, fields: f.properties })
        .collect();
    Ok(ZoneLayer::from_features(collection.crs, features))
}

fn parse_boundary(text: &str) -> Result<BoundaryPolygon> {
    let collection = parse_collection(text)?;
    if collection.features.is_empty() {
        bail!("boundary has no features");
    }
    let polygons = collection.features.into_iter().flat_map(|f| f.geometry.0).collect();
    Ok(BoundaryPolygon::new(collection.crs, MultiPolygon::new(polygons)))
}

/// Read the carbon-zone layer. Features with missing attributes are returned
/// separately so the caller decides whether they are fatal.
pub fn read_zones(path: &Path) -> Result<(ZoneLayer, Vec<ZoneFieldError>)> {
    let text = fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
    parse_zones(&text).with_context(|| format!("Invalid carbon zones {}", path.display()))
}

/// Read the project boundary; all features are merged into one area.
pub fn read_boundary(path: &Path) -> Result<BoundaryPolygon> {
    let text = fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
    parse_boundary(&text).with_context(|| format!("Invalid boundary {}", path.display()))
}

fn ring_json(ring: &LineString<f64>) -> Value {
    Value::Array(ring.0.iter().map(|c| json!([c.x, c.y])).collect())
}

fn geometry_json(geometry: &MultiPolygon<f64>) -> Value {
    let polygons: Vec<Value> = geometry
        .0
        .iter()
        .map(|p| {
            let mut rings = vec![ring_json(p.exterior())];
            rings.extend(p.interiors().iter().map(ring_json));
            Value::Array(rings)
        })
        .collect();
    json!({ "type": "MultiPolygon", "coordinates": polygons })
}

fn properties_json(row: &ResultRow) -> Value {
    let mut props = Map::new();
    props.insert("zone_id".into(), json!(row.zone_id));
    props.insert("region".into(), json!(row.region));
    props.insert("gez".into(), json!(row.gez));
    props.insert("frontier".into(), json!(row.frontier));
    props.insert("wetland".into(), json!(row.wetland));
    props.insert("method".into(), json!(row.method.as_str()));
    props.insert("carbon_coefficient".into(), json!(row.coefficient));
    props.insert("dominant_class".into(), json!(row.dominant_class));
    props.insert("total_area_ha".into(), json!(row.total_area_ha));
    props.insert("class_areas".into(), json!(crate::io::table::class_areas_cell(&row.class_areas)));
    props.insert(
        "applied_rules".into(),
        json!(row.applied_rules.iter().map(|r| r.as_str()).collect::<Vec<_>>().join(";")),
    );
    props.insert("total_carbon_mg".into(), json!(row.total_carbon_mg));
    Value::Object(props)
}

fn features_json(features: &[ResultFeature], crs: Crs) -> Value {
    let features: Vec<Value> = features
        .iter()
        .map(|f| {
            json!({
                "type": "Feature",
                "id": f.properties.zone_id,
                "properties": properties_json(&f.properties),
                "geometry": geometry_json(&f.geometry),
            })
        })
        .collect();
    json!({
        "type": "FeatureCollection",
        "crs": { "type": "name", "properties": { "name": format!("urn:ogc:def:crs:EPSG::{}", crs.epsg) } },
        "features": features,
    })
}

/// Write the boundary-clipped zones with their results.
pub fn write_features(path: &Path, features: &[ResultFeature], crs: Crs) -> Result<()> {
    let text = serde_json::to_string(&features_json(features, crs))?;
    fs::write(path, text).with_context(|| format!("Cannot write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use carbon_core::AggregationMethod;

    const ZONES: &str = r#"{
      "type": "FeatureCollection",
      "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::6933" } },
      "features": [
        { "type": "Feature", "id": "K-1",
          "properties": { "REGION": "Africa", "GEZ_TERM": "Tropical rainforest", "FRONTIER": 0, "WETLAND": null },
          "geometry": { "type": "Polygon", "coordinates": [[[0,0],[10,0],[10,10],[0,10],[0,0]]] } },
        { "type": "Feature",
          "properties": { "zone_id": "K-2", "REGION": "Africa", "FRONTIER": "1" },
          "geometry": { "type": "MultiPolygon", "coordinates": [[[[10,0],[20,0],[20,10],[10,10],[10,0]]]] } }
      ]
    }"#;

    #[test]
    fn zones_keep_ids_and_report_missing_fields() {
        let (layer, errors) = parse_zones(ZONES).unwrap();
        assert_eq!(layer.crs, Some(Crs::EQUAL_AREA));
        assert_eq!(layer.zones.len(), 1);
        assert_eq!(layer.zones[0].id, "K-1");
        assert!(!layer.zones[0].attributes.frontier);
        assert_eq!(errors, vec![ZoneFieldError { zone: "K-2".into(), fields: vec!["GEZ_TERM".into()] }]);
    }

    #[test]
    fn boundary_merges_features_and_defaults_to_crs84() {
        let text = r#"{"type":"FeatureCollection","features":[
          {"type":"Feature","properties":{},"geometry":{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,0]]]}},
          {"type":"Feature","properties":{},"geometry":{"type":"Polygon","coordinates":[[[2,2],[3,2],[3,3],[2,2]]]}}
        ]}"#;
        let boundary = parse_boundary(text).unwrap();
        assert_eq!(boundary.crs, Some(Crs::WGS84));
        assert_eq!(boundary.geometry.0.len(), 2);
    }

    #[test]
    fn non_polygon_geometry_is_rejected() {
        let text = r#"{"type":"Feature","properties":{},"geometry":{"type":"Point","coordinates":[1,2]}}"#;
        let err = parse_boundary(text).unwrap_err();
        assert!(format!("{err:#}").contains("Point"), "{err:#}");
    }

    #[test]
    fn written_features_carry_crs_and_nulls() {
        let (layer, _) = parse_zones(ZONES).unwrap();
        let row = ResultRow {
            zone_id: "K-1".into(),
            region: "Africa".into(),
            gez: "Tropical rainforest".into(),
            frontier: false,
            wetland: false,
            method: AggregationMethod::Weighted,
            coefficient: None,
            dominant_class: None,
            total_area_ha: 0.0,
            class_areas: BTreeMap::new(),
            applied_rules: Vec::new(),
            total_carbon_mg: None,
        };
        let features = vec![ResultFeature { geometry: layer.zones[0].geometry.clone(), properties: row }];
        let doc = features_json(&features, Crs::EQUAL_AREA);
        assert_eq!(doc["crs"]["properties"]["name"], "urn:ogc:def:crs:EPSG::6933");
        let f = &doc["features"][0];
        assert_eq!(f["id"], "K-1");
        assert!(f["properties"]["carbon_coefficient"].is_null());
        assert_eq!(f["geometry"]["coordinates"][0][0][2], json!([10.0, 10.0]));
    }
}
