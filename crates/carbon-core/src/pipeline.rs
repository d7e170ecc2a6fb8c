//! Run orchestrator: reproject → overlay → crosswalk → rules → coefficients
//! → aggregate → assemble.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregate::{aggregate, AggregatedResult, AggregationMethod, ClassBreakdown};
use crate::assemble::{assemble, Assembly, RunOutput};
use crate::coefficients::{ClassOverrides, CoefficientResolver, CoefficientTable};
use crate::crosswalk::Crosswalk;
use crate::crs::Crs;
use crate::error::{CarbonError, MissingCoefficientError, TableError};
use crate::overlay::{overlay, SpatialUnit};
use crate::raster::RasterGrid;
use crate::reproject::{reproject_boundary, reproject_raster, reproject_zones};
use crate::rules::{RuleOutcome, RuleSet};
use crate::zones::{BoundaryPolygon, ZoneLayer};

/// The CRS every area calculation is carried out in.
pub const TARGET_CRS: Crs = Crs::EQUAL_AREA;

// ── Public structs ────────────────────────────────────────────────────────────

/// Per-run settings supplied by the caller's configuration layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Project country code; recorded in the run summary only.
    pub country: String,
    pub method: AggregationMethod,
    /// Redirect wetland zones to their GEZ wetland coefficient.
    pub force_wetland_overrides: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            country: String::new(),
            method: AggregationMethod::Weighted,
            force_wetland_overrides: false,
        }
    }
}

/// Read-only lookup state, loaded once and shared by reference.
#[derive(Debug, Clone)]
pub struct LookupTables {
    pub crosswalk: Crosswalk,
    pub builtin_coefficients: CoefficientTable,
    pub override_coefficients: Option<CoefficientTable>,
    pub rules: RuleSet,
    pub class_overrides: Option<ClassOverrides>,
}

impl Default for LookupTables {
    fn default() -> Self {
        Self::builtin()
    }
}

impl LookupTables {
    pub fn builtin() -> Self {
        Self {
            crosswalk: Crosswalk::builtin(),
            builtin_coefficients: CoefficientTable::builtin(),
            override_coefficients: None,
            rules: RuleSet::builtin(),
            class_overrides: None,
        }
    }

    /// Merge user crosswalk rows over the current table.
    pub fn with_crosswalk_csv(mut self, name: &str, text: &str) -> Result<Self, TableError> {
        let user = Crosswalk::from_csv(name, text)?;
        self.crosswalk = self.crosswalk.merged(user);
        Ok(self)
    }

    /// Install a user coefficient table, consulted before the built-in one.
    pub fn with_coefficient_csv(mut self, name: &str, text: &str) -> Result<Self, TableError> {
        self.override_coefficients = Some(CoefficientTable::from_csv(name, text)?);
        Ok(self)
    }

    /// Put user rules ahead of the current rule list.
    pub fn with_rules_csv(mut self, name: &str, text: &str) -> Result<Self, TableError> {
        let user = RuleSet::from_csv(name, text)?;
        self.rules = user.then(self.rules);
        Ok(self)
    }

    pub fn with_class_overrides_csv(mut self, name: &str, text: &str) -> Result<Self, TableError> {
        self.class_overrides = Some(ClassOverrides::from_csv(name, text)?);
        Ok(self)
    }

    pub fn resolver(&self) -> CoefficientResolver<'_> {
        CoefficientResolver::new(self.override_coefficients.as_ref(), &self.builtin_coefficients)
    }
}

/// Already-opened datasets, in any supported CRS.
#[derive(Debug, Clone)]
pub struct RunInputs {
    pub lulc: RasterGrid<u32>,
    pub zones: ZoneLayer,
    pub boundary: BoundaryPolygon,
}

// ── Coefficient resolution ────────────────────────────────────────────────────

/// Rule outcome for every unit that has a class; `None` for zero-area placeholders.
pub fn evaluate_units(units: &[SpatialUnit], zones: &ZoneLayer, tables: &LookupTables) -> Vec<Option<RuleOutcome>> {
    units
        .iter()
        .map(|u| {
            u.class.map(|class| {
                let attrs = &zones.zones[u.zone_index].attributes;
                tables.rules.evaluate(attrs, class, u.wetland_override)
            })
        })
        .collect()
}

/// Resolve every outcome to a coefficient. Missing keys are collected across
/// all units before failing.
pub fn resolve_units(
    units: &[SpatialUnit],
    outcomes: &[Option<RuleOutcome>],
    tables: &LookupTables,
) -> Result<Vec<Option<ClassBreakdown>>, MissingCoefficientError> {
    let resolver = tables.resolver();
    let mut missing = BTreeSet::new();
    let breakdowns: Vec<Option<ClassBreakdown>> = units
        .iter()
        .zip(outcomes)
        .map(|(u, outcome)| {
            let (class, outcome) = (u.class?, outcome.as_ref()?);
            match outcome.resolve(&resolver) {
                Ok(r) => Some(ClassBreakdown {
                    class,
                    cell_count: u.cell_count,
                    area_ha: u.area_ha,
                    coefficient: r.coefficient,
                    applied_rule: r.applied,
                    source: r.source,
                }),
                Err(key) => {
                    missing.insert(key);
                    None
                }
            }
        })
        .collect();
    if missing.is_empty() {
        Ok(breakdowns)
    } else {
        Err(MissingCoefficientError { keys: missing.into_iter().collect() })
    }
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

/// Run the engine on one project.
///
/// Structural problems (CRS, geometry, tables) abort at once. Crosswalk and
/// coefficient gaps are reported in full, both kinds in one error when both
/// occur. Overlay mismatches are logged and
/// carried in the output as warnings.
pub fn run(inputs: &RunInputs, tables: &LookupTables, options: &RunOptions) -> Result<RunOutput, CarbonError> {
    info!(
        country = %options.country,
        method = %options.method,
        force_wetland_overrides = options.force_wetland_overrides,
        "starting carbon run"
    );

    for id in inputs.zones.duplicate_ids() {
        warn!(zone = %id, "carbon zone identifier is not unique; rows are kept per feature");
    }

    // ── 1. Reproject ────────────────────────────────────────────────────────
    let lulc = reproject_raster(&inputs.lulc, TARGET_CRS)?;
    let zones = reproject_zones(&inputs.zones, TARGET_CRS)?;
    let boundary = reproject_boundary(&inputs.boundary, TARGET_CRS)?;
    info!(
        cells = lulc.len(),
        cell_area_ha = lulc.cell_area_ha(),
        zones = zones.zones.len(),
        "inputs in {TARGET_CRS}"
    );

    // ── 2. Overlay ──────────────────────────────────────────────────────────
    let overlay = overlay(&lulc, &zones, &boundary);
    for w in &overlay.warnings {
        warn!("{w}");
    }
    info!(cells = overlay.total_cells(), "overlay complete");

    // ── 3. Crosswalk ────────────────────────────────────────────────────────
    let (units, unmapped) = overlay.spatial_units(&zones, &tables.crosswalk, options.force_wetland_overrides);
    info!(units = units.len(), "spatial units built");

    // ── 4. Rules + coefficients ─────────────────────────────────────────────
    let outcomes = evaluate_units(&units, &zones, tables);
    let breakdowns = match (unmapped, resolve_units(&units, &outcomes, tables)) {
        (None, Ok(breakdowns)) => breakdowns,
        (Some(unmapped), Ok(_)) => return Err(unmapped.into()),
        (None, Err(missing)) => return Err(missing.into()),
        (Some(unmapped), Err(missing)) => return Err(CarbonError::LookupGaps { unmapped, missing }),
    };

    // ── 5. Aggregate ────────────────────────────────────────────────────────
    let mut per_zone: BTreeMap<usize, Vec<ClassBreakdown>> = BTreeMap::new();
    for (u, b) in units.iter().zip(&breakdowns) {
        let parts = per_zone.entry(u.zone_index).or_default();
        if let Some(b) = b {
            parts.push(b.clone());
        }
    }
    let results: Vec<AggregatedResult> = zones
        .id_order()
        .into_iter()
        .map(|zi| {
            let parts = per_zone.remove(&zi).unwrap_or_default();
            aggregate(zi, &zones.zones[zi].id, options.method, parts)
        })
        .collect();
    let nodata = results.iter().filter(|r| r.coefficient.is_none()).count();
    if nodata > 0 {
        warn!(zones = nodata, "zones without area inside the boundary carry no coefficient");
    }

    // ── 6. Assemble ─────────────────────────────────────────────────────────
    let output = assemble(Assembly {
        options,
        tables,
        lulc: &lulc,
        zones: &zones,
        overlay: &overlay,
        units: &units,
        breakdowns: &breakdowns,
        results,
    });
    info!(
        total_area_ha = output.summary.total_area_ha,
        total_carbon_mg = output.summary.total_carbon_mg,
        "run complete"
    );
    Ok(output)
}
