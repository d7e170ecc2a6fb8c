//! CSV and JSON writers for the tabular outputs.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use carbon_core::assemble::{ClassCoefficientRow, OverlayRow, ResultRow, RunSummary};
use carbon_core::coefficients::TableSource;
use carbon_core::{AggregatedResult, ClassCode};
use serde::Serialize;

const RESULT_HEADER: [&str; 12] = [
    "zone_id", "region", "gez", "frontier", "wetland", "method", "carbon_coefficient", "dominant_class",
    "total_area_ha", "class_areas", "applied_rules", "total_carbon_mg",
];

const OVERLAY_HEADER: [&str; 12] = [
    "zone_id", "region", "gez", "frontier", "wetland", "std_class", "cell_count", "area_ha",
    "carbon_coefficient", "applied_rule", "source", "total_carbon_mg",
];

const CLASS_TABLE_HEADER: [&str; 5] = ["lucode", "LULC_name", "std_class", "c_above", "overridden"];

#[derive(Serialize)]
struct ResultRecord<'a> {
    zone_id: &'a str,
    region: &'a str,
    gez: &'a str,
    frontier: u8,
    wetland: u8,
    method: &'static str,
    carbon_coefficient: Option<f64>,
    dominant_class: Option<ClassCode>,
    total_area_ha: f64,
    class_areas: String,
    applied_rules: String,
    total_carbon_mg: Option<f64>,
}

impl<'a> From<&'a ResultRow> for ResultRecord<'a> {
    fn from(r: &'a ResultRow) -> Self {
        Self {
            zone_id: &r.zone_id,
            region: &r.region,
            gez: &r.gez,
            frontier: r.frontier.into(),
            wetland: r.wetland.into(),
            method: r.method.as_str(),
            carbon_coefficient: r.coefficient,
            dominant_class: r.dominant_class,
            total_area_ha: r.total_area_ha,
            class_areas: class_areas_cell(&r.class_areas),
            applied_rules: r.applied_rules.iter().map(|a| a.as_str()).collect::<Vec<_>>().join(";"),
            total_carbon_mg: r.total_carbon_mg,
        }
    }
}

#[derive(Serialize)]
struct OverlayRecord<'a> {
    zone_id: &'a str,
    region: &'a str,
    gez: &'a str,
    frontier: u8,
    wetland: u8,
    std_class: Option<ClassCode>,
    cell_count: u64,
    area_ha: f64,
    carbon_coefficient: Option<f64>,
    applied_rule: Option<&'a str>,
    source: Option<&'static str>,
    total_carbon_mg: Option<f64>,
}

impl<'a> From<&'a OverlayRow> for OverlayRecord<'a> {
    fn from(r: &'a OverlayRow) -> Self {
        Self {
            zone_id: &r.zone_id,
            region: &r.region,
            gez: &r.gez,
            frontier: r.frontier.into(),
            wetland: r.wetland.into(),
            std_class: r.class,
            cell_count: r.cell_count,
            area_ha: r.area_ha,
            carbon_coefficient: r.coefficient,
            applied_rule: r.applied_rule.as_ref().map(|a| a.as_str()),
            source: r.source.map(|s| match s {
                TableSource::Override => "override",
                TableSource::Builtin => "builtin",
            }),
            total_carbon_mg: r.total_carbon_mg,
        }
    }
}

#[derive(Serialize)]
struct ClassTableRecord<'a> {
    lucode: u32,
    label: &'a str,
    std_class: ClassCode,
    c_above: Option<f64>,
    overridden: u8,
}

impl<'a> From<&'a ClassCoefficientRow> for ClassTableRecord<'a> {
    fn from(r: &'a ClassCoefficientRow) -> Self {
        Self {
            lucode: r.lucode,
            label: &r.label,
            std_class: r.std_class,
            c_above: r.c_above,
            overridden: r.overridden.into(),
        }
    }
}

/// `1:80.0000;15:20.0000`
pub(crate) fn class_areas_cell(areas: &BTreeMap<ClassCode, f64>) -> String {
    areas
        .iter()
        .map(|(class, area)| format!("{class}:{area:.4}"))
        .collect::<Vec<_>>()
        .join(";")
}

/// Header row, then one serialized record per row.
fn write_csv<W, R>(out: W, header: &[&str], records: impl IntoIterator<Item = R>) -> csv::Result<()>
where
    W: Write,
    R: Serialize,
{
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(out);
    writer.write_record(header)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_csv_file<R: Serialize>(path: &Path, header: &[&str], records: impl IntoIterator<Item = R>) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Cannot create {}", path.display()))?;
    write_csv(BufWriter::new(file), header, records).with_context(|| format!("Cannot write {}", path.display()))
}

pub fn write_results(path: &Path, rows: &[ResultRow]) -> Result<()> {
    write_csv_file(path, &RESULT_HEADER, rows.iter().map(ResultRecord::from))
}

pub fn write_overlay(path: &Path, rows: &[OverlayRow]) -> Result<()> {
    write_csv_file(path, &OVERLAY_HEADER, rows.iter().map(OverlayRecord::from))
}

pub fn write_class_table(path: &Path, rows: &[ClassCoefficientRow]) -> Result<()> {
    write_csv_file(path, &CLASS_TABLE_HEADER, rows.iter().map(ClassTableRecord::from))
}

fn write(path: &Path, text: String) -> Result<()> {
    fs::write(path, text).with_context(|| format!("Cannot write {}", path.display()))
}

/// Full per-zone results, including the per-class breakdown.
pub fn write_results_json(path: &Path, results: &[AggregatedResult]) -> Result<()> {
    write(path, serde_json::to_string_pretty(results)?)
}

/// Inputs a run was made from, recorded next to its outputs.
#[derive(Debug, Serialize)]
pub struct RunInfo<'a> {
    pub version: &'static str,
    pub inputs: BTreeMap<&'static str, Option<PathBuf>>,
    pub outputs: BTreeMap<&'static str, PathBuf>,
    pub summary: &'a RunSummary,
}

pub fn write_run_info(path: &Path, info: &RunInfo<'_>) -> Result<()> {
    write(path, serde_json::to_string_pretty(info)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use carbon_core::rules::AppliedRule;
    use carbon_core::AggregationMethod;

    fn row() -> ResultRow {
        ResultRow {
            zone_id: "Z1".into(),
            region: "Asia, South".into(),
            gez: "Tropical \"dry\" forest".into(),
            frontier: true,
            wetland: false,
            method: AggregationMethod::Weighted,
            coefficient: Some(4.2),
            dominant_class: Some(1),
            total_area_ha: 100.0,
            class_areas: BTreeMap::from([(1, 80.0), (15, 20.0)]),
            applied_rules: vec![AppliedRule::Rule("peat".into()), AppliedRule::NoRuleMatched],
            total_carbon_mg: Some(420.0),
        }
    }

    fn results_csv(rows: &[ResultRow]) -> String {
        let mut out = Vec::new();
        write_csv(&mut out, &RESULT_HEADER, rows.iter().map(ResultRecord::from)).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn result_rows_are_quoted_and_flattened() {
        let csv = results_csv(&[row()]);
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("zone_id,region,gez,frontier"));
        assert_eq!(
            lines.next().unwrap(),
            "Z1,\"Asia, South\",\"Tropical \"\"dry\"\" forest\",1,0,weighted,4.2,1,100.0,1:80.0000;15:20.0000,peat;none,420.0"
        );
    }

    #[test]
    fn nodata_zone_leaves_blank_cells() {
        let mut r = row();
        r.coefficient = None;
        r.dominant_class = None;
        r.total_carbon_mg = None;
        r.class_areas.clear();
        r.applied_rules.clear();
        let csv = results_csv(&[r]);
        assert!(csv.lines().nth(1).unwrap().ends_with(",weighted,,,100.0,,,"), "{csv}");
    }

    #[test]
    fn multiline_labels_survive_a_read_back() {
        let rows = [ClassCoefficientRow {
            lucode: 11,
            label: "Permanent\nwetlands".into(),
            std_class: 15,
            c_above: Some(9.0),
            overridden: true,
        }];
        let mut out = Vec::new();
        write_csv(&mut out, &CLASS_TABLE_HEADER, rows.iter().map(ClassTableRecord::from)).unwrap();

        let mut reader = csv::Reader::from_reader(out.as_slice());
        assert_eq!(reader.headers().unwrap().iter().collect::<Vec<_>>(), CLASS_TABLE_HEADER);
        let records: Vec<_> = reader.records().map(Result::unwrap).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(&records[0][1], "Permanent\nwetlands");
        assert_eq!(&records[0][4], "1");
    }

    #[test]
    fn empty_table_still_has_a_header() {
        let mut out = Vec::new();
        write_csv(&mut out, &OVERLAY_HEADER, std::iter::empty::<OverlayRecord<'_>>()).unwrap();
        assert_eq!(String::from_utf8(out).unwrap().trim_end(), OVERLAY_HEADER.join(","));
    }
}
