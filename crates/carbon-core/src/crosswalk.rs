//! Raw LULC code → standardized class mapping.
//!
//! The built-in table maps MODIS IGBP (1–17) onto the GLC2000 legend the
//! coefficient tables are keyed on. User rows replace built-in rows with the
//! same raw code.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{TableError, UnmappedClassError};
use crate::tables::{parse_class_cell, CsvTable};
use crate::ClassCode;

/// GLC2000 classes that carry no vegetation carbon.
pub const WATER: ClassCode = 20;
pub const SNOW_ICE: ClassCode = 21;
pub const ARTIFICIAL: ClassCode = 22;

/// GLC2000 targets of the IGBP forests 1–4, the forest reference.
pub const FOREST_CLASSES: [ClassCode; 4] = [1, 2, 4, 5];
/// GLC2000 targets of the IGBP shrublands 6–7.
pub const SHRUB_CLASSES: [ClassCode; 2] = [11, 12];
/// GLC2000 targets of the IGBP savannas 8–9.
pub const SAVANNA_CLASSES: [ClassCode; 2] = [3, 13];
/// Tree cover, regularly flooded (fresh water).
pub const WOODY_WETLAND: ClassCode = 7;
/// Shrub or herbaceous cover, regularly flooded.
pub const MARSH: ClassCode = 15;

/// (MODIS IGBP code, GLC2000 class, IGBP label)
const BUILTIN: [(u32, ClassCode, &str); 17] = [
    (1, 4, "Evergreen needleleaf forests"),
    (2, 1, "Evergreen broadleaf forests"),
    (3, 5, "Deciduous needleleaf forests"),
    (4, 2, "Deciduous broadleaf forests"),
    (5, 6, "Mixed forests"),
    (6, 11, "Closed shrublands"),
    (7, 12, "Open shrublands"),
    (8, 3, "Woody savannas"),
    (9, 13, "Savannas"),
    (10, 13, "Grasslands"),
    (11, 15, "Permanent wetlands"),
    (12, 16, "Croplands"),
    (13, 22, "Urban and built-up lands"),
    (14, 17, "Cropland/natural vegetation mosaics"),
    (15, 21, "Permanent snow and ice"),
    (16, 19, "Barren"),
    (17, 20, "Water bodies"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrosswalkEntry {
    pub raw: u32,
    pub class: ClassCode,
    pub label: String,
}

/// Immutable raw-code lookup, built once per run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Crosswalk {
    entries: BTreeMap<u32, CrosswalkEntry>,
}

impl Crosswalk {
    pub fn builtin() -> Self {
        let entries = BUILTIN
            .iter()
            .map(|&(raw, class, label)| (raw, CrosswalkEntry { raw, class, label: label.to_string() }))
            .collect();
        Self { entries }
    }

    pub fn from_entries(entries: impl IntoIterator<Item = CrosswalkEntry>) -> Self {
        Self { entries: entries.into_iter().map(|e| (e.raw, e)).collect() }
    }

    /// Columns: `LULC`, `STD_CLASS` or `GLC2000 Class`, optional `LULC_CLASS`/`LABEL`.
    pub fn from_csv(name: &str, text: &str) -> Result<Self, TableError> {
        let table = CsvTable::parse(name, text)?;
        let raw_col = table.require(&["LULC", "RAW", "LUCODE"])?;
        let class_col = table.require(&["STD_CLASS", "GLC2000 Class", "GLC2000", "CLASS"])?;
        let label_col = table.column(&["LULC_CLASS", "LABEL"]);

        let mut entries = BTreeMap::new();
        for row in &table.rows {
            let raw: u32 = row
                .get(raw_col)
                .parse()
                .map_err(|_| table.error(row, format!("bad LULC code `{}`", row.get(raw_col))))?;
            let class = match parse_class_cell(row.get(class_col)).as_deref() {
                Some([single]) => *single,
                _ => {
                    return Err(table.error(row, format!("expected one class, got `{}`", row.get(class_col))));
                }
            };
            let label = label_col.map(|c| row.get(c).to_string()).unwrap_or_default();
            entries.insert(raw, CrosswalkEntry { raw, class, label });
        }
        Ok(Self { entries })
    }

    /// `self` with every row of `user` replacing the row of the same raw code.
    pub fn merged(mut self, user: Crosswalk) -> Self {
        self.entries.extend(user.entries);
        self
    }

    pub fn get(&self, raw: u32) -> Option<&CrosswalkEntry> {
        self.entries.get(&raw)
    }

    pub fn entries(&self) -> impl Iterator<Item = &CrosswalkEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Map the observed raw codes that have an entry. Codes without one are
    /// all reported next to the partial mapping.
    pub fn map_observed(&self, observed: &BTreeSet<u32>) -> (BTreeMap<u32, ClassCode>, Option<UnmappedClassError>) {
        let mut mapped = BTreeMap::new();
        let mut codes = Vec::new();
        for &raw in observed {
            match self.entries.get(&raw) {
                Some(e) => {
                    mapped.insert(raw, e.class);
                }
                None => codes.push(raw),
            }
        }
        let unmapped = (!codes.is_empty()).then_some(UnmappedClassError { codes });
        (mapped, unmapped)
    }
}
