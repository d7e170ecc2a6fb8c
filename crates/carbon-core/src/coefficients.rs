//! Carbon coefficient tables (Mg C/ha) keyed by zone attributes and class.
//!
//! Rows whose region and GEZ term are both [`GLOBAL`] act as class-wide
//! fallbacks. A run resolves against the user override table first and the
//! built-in table second.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Serializer};

use crate::error::TableError;
use crate::tables::{explode_list, parse_class_cell, CsvTable};
use crate::zones::{parse_flag, ZoneAttributes};
use crate::ClassCode;

/// Region / GEZ term of fallback rows.
pub const GLOBAL: &str = "Global";

/// (class, value) rows of the built-in fallback table; both frontier states.
const BUILTIN_GLOBAL: [(ClassCode, f64); 6] = [
    (16, 5.0), // cultivated and managed land
    (19, 0.0), // bare areas
    (20, 0.0),
    (21, 0.0),
    (22, 0.0),
    (23, 0.0),
];

/// Class half of a lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ClassRef {
    Standard(ClassCode),
    /// The GEZ-specific wetland coefficient selected by the wetland override.
    Wetland,
}

impl fmt::Display for ClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassRef::Standard(c) => write!(f, "{c}"),
            ClassRef::Wetland => f.write_str("wetland"),
        }
    }
}

impl Serialize for ClassRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ClassRef::Standard(c) => serializer.serialize_u16(*c),
            ClassRef::Wetland => serializer.serialize_str("wetland"),
        }
    }
}

fn parse_class_ref(cell: &str) -> Option<Vec<ClassRef>> {
    if cell.trim().eq_ignore_ascii_case("wetland") {
        return Some(vec![ClassRef::Wetland]);
    }
    // A labelled cell ("20 - 23: Water, snow and ice;artificial surfaces")
    // may contain `;` inside its label, so only bare cells are list-split.
    let classes: Option<Vec<ClassCode>> = if cell.contains(':') {
        parse_class_cell(cell)
    } else {
        let mut all = Vec::new();
        for part in explode_list(cell) {
            all.extend(parse_class_cell(&part)?);
        }
        (!all.is_empty()).then_some(all)
    };
    classes.map(|cs| cs.into_iter().map(ClassRef::Standard).collect())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CoefficientKey {
    pub region: String,
    pub gez: String,
    pub frontier: bool,
    pub class: ClassRef,
}

impl CoefficientKey {
    pub fn new(region: impl Into<String>, gez: impl Into<String>, frontier: bool, class: ClassRef) -> Self {
        Self { region: region.into(), gez: gez.into(), frontier, class }
    }

    pub fn for_zone(attrs: &ZoneAttributes, class: ClassRef) -> Self {
        Self::new(attrs.region.clone(), attrs.gez.clone(), attrs.frontier, class)
    }

    /// The class-wide fallback key for this key.
    pub fn global(&self) -> Self {
        Self::new(GLOBAL, GLOBAL, self.frontier, self.class)
    }

    pub fn is_global(&self) -> bool {
        self.region == GLOBAL && self.gez == GLOBAL
    }
}

impl fmt::Display for CoefficientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, class {})",
            self.region,
            self.gez,
            if self.frontier { "frontier" } else { "non-frontier" },
            self.class
        )
    }
}

/// Which table a coefficient came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TableSource {
    Override,
    Builtin,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoefficientTable {
    entries: BTreeMap<CoefficientKey, f64>,
}

impl CoefficientTable {
    pub fn builtin() -> Self {
        let mut table = Self::default();
        for (class, value) in BUILTIN_GLOBAL {
            for frontier in [false, true] {
                table.insert(CoefficientKey::new(GLOBAL, GLOBAL, frontier, ClassRef::Standard(class)), value);
            }
        }
        table
    }

    /// Columns `REGION, GEZ_TERM, FRONTIER, CLASS|GLC2000, CARBON_VALUE`.
    ///
    /// `;` lists in REGION, GEZ_TERM and CLASS explode into one entry per
    /// combination; FRONTIER `Either` covers both states. Later rows win.
    pub fn from_csv(name: &str, text: &str) -> Result<Self, TableError> {
        let table = CsvTable::parse(name, text)?;
        let region_col = table.require(&["REGION"])?;
        let gez_col = table.require(&["GEZ_TERM", "GEZ"])?;
        let frontier_col = table.require(&["FRONTIER"])?;
        let class_col = table.require(&["CLASS", "GLC2000", "GLC2000 Class", "STD_CLASS"])?;
        let value_col = table.require(&["CARBON_VALUE", "VALUE"])?;

        let mut out = Self::default();
        for row in &table.rows {
            let regions = explode_list(row.get(region_col));
            let gezs = explode_list(row.get(gez_col));
            if regions.is_empty() || gezs.is_empty() {
                return Err(table.error(row, "REGION and GEZ_TERM must not be empty"));
            }
            let frontiers: Vec<bool> = match row.get(frontier_col) {
                f if f.is_empty() || f.eq_ignore_ascii_case("either") || f.eq_ignore_ascii_case("both") => {
                    vec![false, true]
                }
                f => vec![parse_flag(f).ok_or_else(|| table.error(row, format!("bad FRONTIER `{f}`")))?],
            };
            let classes = parse_class_ref(row.get(class_col))
                .ok_or_else(|| table.error(row, format!("bad class `{}`", row.get(class_col))))?;
            let value: f64 = row
                .get(value_col)
                .parse()
                .ok()
                .filter(|v: &f64| v.is_finite())
                .ok_or_else(|| table.error(row, format!("bad CARBON_VALUE `{}`", row.get(value_col))))?;

            for region in &regions {
                for gez in &gezs {
                    for &frontier in &frontiers {
                        for &class in &classes {
                            out.insert(CoefficientKey::new(region.as_str(), gez.as_str(), frontier, class), value);
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    pub fn insert(&mut self, key: CoefficientKey, value: f64) {
        self.entries.insert(key, value);
    }

    pub fn get(&self, key: &CoefficientKey) -> Option<f64> {
        self.entries.get(key).copied()
    }

    /// Exact entry, then the global fallback for the same class and frontier state.
    pub fn lookup(&self, key: &CoefficientKey) -> Option<f64> {
        self.get(key).or_else(|| self.get(&key.global()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Override-then-builtin lookup over shared read-only tables.
#[derive(Debug, Clone, Copy)]
pub struct CoefficientResolver<'a> {
    overrides: Option<&'a CoefficientTable>,
    builtin: &'a CoefficientTable,
}

impl<'a> CoefficientResolver<'a> {
    pub fn new(overrides: Option<&'a CoefficientTable>, builtin: &'a CoefficientTable) -> Self {
        Self { overrides, builtin }
    }

    pub fn resolve(&self, key: &CoefficientKey) -> Option<(f64, TableSource)> {
        if let Some(v) = self.overrides.and_then(|t| t.lookup(key)) {
            return Some((v, TableSource::Override));
        }
        self.builtin.lookup(key).map(|v| (v, TableSource::Builtin))
    }
}

/// Per-raw-code replacements for the class coefficient table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassOverrides {
    values: BTreeMap<u32, f64>,
}

impl ClassOverrides {
    /// Columns `lucode, c_above_override`; a blank override cell is skipped.
    pub fn from_csv(name: &str, text: &str) -> Result<Self, TableError> {
        let table = CsvTable::parse(name, text)?;
        let code_col = table.require(&["lucode", "LULC"])?;
        let value_col = table.require(&["c_above_override", "c_above"])?;
        let mut values = BTreeMap::new();
        for row in &table.rows {
            if row.get(value_col).is_empty() {
                continue;
            }
            let code: u32 = row
                .get(code_col)
                .parse()
                .map_err(|_| table.error(row, format!("bad lucode `{}`", row.get(code_col))))?;
            let value: f64 = row
                .get(value_col)
                .parse()
                .map_err(|_| table.error(row, format!("bad c_above_override `{}`", row.get(value_col))))?;
            values.insert(code, value);
        }
        Ok(Self { values })
    }

    pub fn get(&self, code: u32) -> Option<f64> {
        self.values.get(&code).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
