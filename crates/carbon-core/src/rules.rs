//! Ordered expert rules: a flat list of (predicate, action) pairs evaluated
//! top-down, first match wins.
//!
//! The wetland override sits in front of the list when enabled. A unit that
//! matches nothing keeps its identity key and records [`AppliedRule::NoRuleMatched`].
//! Fill rules only take effect once the tables show the unit's own key is
//! missing, so they are settled by [`RuleOutcome::resolve`].

use std::collections::BTreeSet;
use std::fmt;

use serde::{Serialize, Serializer};

use crate::coefficients::{ClassRef, CoefficientKey, CoefficientResolver, TableSource};
use crate::crosswalk::{
    ARTIFICIAL, FOREST_CLASSES, MARSH, SAVANNA_CLASSES, SHRUB_CLASSES, SNOW_ICE, WATER, WOODY_WETLAND,
};
use crate::error::TableError;
use crate::tables::{explode_list, parse_class_cell, CsvRow, CsvTable};
use crate::zones::{parse_flag, ZoneAttributes};
use crate::ClassCode;

pub const WETLAND_OVERRIDE_ID: &str = "wetland-override";
pub const NO_RULE_ID: &str = "none";

/// Savanna coefficient as a fraction of the forest reference.
pub const SAVANNA_FOREST_FRACTION: f64 = 0.4;

/// Conditions over a spatial unit. `None` / empty fields are wildcards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RulePredicate {
    pub region: Option<String>,
    pub gez: Option<String>,
    pub frontier: Option<bool>,
    pub classes: Vec<ClassCode>,
    pub wetland: Option<bool>,
}

impl RulePredicate {
    pub fn matches(&self, attrs: &ZoneAttributes, class: ClassCode) -> bool {
        let text = |want: &Option<String>, have: &str| want.as_deref().map_or(true, |w| w.eq_ignore_ascii_case(have));
        text(&self.region, &attrs.region)
            && text(&self.gez, &attrs.gez)
            && self.frontier.map_or(true, |f| f == attrs.frontier)
            && self.wetland.map_or(true, |w| w == attrs.wetland)
            && (self.classes.is_empty() || self.classes.contains(&class))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuleAction {
    /// Use this coefficient as is.
    Fixed(f64),
    /// Look up `class` (the unit's own class when `None`) and scale by `factor`.
    Lookup { class: Option<ClassCode>, factor: f64 },
    /// Only when the unit's own coefficient is missing: `factor` times the
    /// mean coefficient of `classes` in the same zone.
    FillFromMean { classes: Vec<ClassCode>, factor: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpertRule {
    pub id: String,
    pub predicate: RulePredicate,
    pub action: RuleAction,
}

/// Audit trail entry for one unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AppliedRule {
    WetlandOverride,
    Rule(String),
    NoRuleMatched,
}

impl AppliedRule {
    pub fn as_str(&self) -> &str {
        match self {
            AppliedRule::WetlandOverride => WETLAND_OVERRIDE_ID,
            AppliedRule::Rule(id) => id,
            AppliedRule::NoRuleMatched => NO_RULE_ID,
        }
    }
}

impl fmt::Display for AppliedRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for AppliedRule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// How a unit's coefficient is obtained.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Lookup { key: CoefficientKey, factor: f64 },
    Fixed(f64),
    /// `key` when it resolves, else `factor` × the mean of whichever
    /// `reference` keys resolve.
    Fill { key: CoefficientKey, reference: Vec<CoefficientKey>, factor: f64 },
}

/// A settled coefficient and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub coefficient: f64,
    /// `None` when a fixed-value rule supplied the coefficient.
    pub source: Option<TableSource>,
    pub applied: AppliedRule,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub resolution: Resolution,
    pub applied: AppliedRule,
}

impl RuleOutcome {
    /// Settle the coefficient against the lookup tables. On failure the
    /// unresolvable key is returned.
    pub fn resolve(&self, resolver: &CoefficientResolver<'_>) -> Result<Resolved, CoefficientKey> {
        let applied = self.applied.clone();
        match &self.resolution {
            Resolution::Fixed(v) => Ok(Resolved { coefficient: *v, source: None, applied }),
            Resolution::Lookup { key, factor } => resolver
                .resolve(key)
                .map(|(v, source)| Resolved { coefficient: v * factor, source: Some(source), applied })
                .ok_or_else(|| key.clone()),
            Resolution::Fill { key, reference, factor } => {
                if let Some((v, source)) = resolver.resolve(key) {
                    return Ok(Resolved { coefficient: v, source: Some(source), applied: AppliedRule::NoRuleMatched });
                }
                let hits: Vec<(f64, TableSource)> = reference.iter().filter_map(|k| resolver.resolve(k)).collect();
                if hits.is_empty() {
                    return Err(key.clone());
                }
                let mean = hits.iter().map(|(v, _)| v).sum::<f64>() / hits.len() as f64;
                let source = if hits.iter().any(|&(_, s)| s == TableSource::Override) {
                    TableSource::Override
                } else {
                    TableSource::Builtin
                };
                Ok(Resolved { coefficient: mean * factor, source: Some(source), applied })
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    rules: Vec<ExpertRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<ExpertRule>) -> Self {
        Self { rules }
    }

    /// Water GEZ and non-vegetated classes carry no carbon. Savannas, woody
    /// wetlands and marshes without a coefficient borrow one from forest or
    /// shrub classes of the same zone.
    pub fn builtin() -> Self {
        Self::new(vec![
            ExpertRule {
                id: "water-gez-zero".into(),
                predicate: RulePredicate { gez: Some("Water".into()), ..Default::default() },
                action: RuleAction::Fixed(0.0),
            },
            ExpertRule {
                id: "non-vegetated-zero".into(),
                predicate: RulePredicate { classes: vec![WATER, SNOW_ICE, ARTIFICIAL], ..Default::default() },
                action: RuleAction::Fixed(0.0),
            },
            ExpertRule {
                id: "savanna-40pct-forest".into(),
                predicate: RulePredicate { classes: SAVANNA_CLASSES.to_vec(), ..Default::default() },
                action: RuleAction::FillFromMean { classes: FOREST_CLASSES.to_vec(), factor: SAVANNA_FOREST_FRACTION },
            },
            ExpertRule {
                id: "woody-wetland-as-forest".into(),
                predicate: RulePredicate { classes: vec![WOODY_WETLAND], ..Default::default() },
                action: RuleAction::FillFromMean { classes: FOREST_CLASSES.to_vec(), factor: 1.0 },
            },
            ExpertRule {
                id: "marsh-as-shrub".into(),
                predicate: RulePredicate { classes: vec![MARSH], ..Default::default() },
                action: RuleAction::FillFromMean { classes: SHRUB_CLASSES.to_vec(), factor: 1.0 },
            },
        ])
    }

    /// Columns `ID, REGION, GEZ_TERM, FRONTIER, CLASS, WETLAND, ACTION, TARGET_CLASS, VALUE`.
    /// Only `ID` and `ACTION` are required; blank predicate cells are wildcards.
    ///
    /// `ACTION` is `fixed` (VALUE), `lookup` (optional TARGET_CLASS, VALUE as
    /// factor) or `fill` (TARGET_CLASS list to average, VALUE as factor).
    pub fn from_csv(name: &str, text: &str) -> Result<Self, TableError> {
        let table = CsvTable::parse(name, text)?;
        let id_col = table.require(&["ID", "RULE_ID"])?;
        let action_col = table.require(&["ACTION"])?;
        let region_col = table.column(&["REGION"]);
        let gez_col = table.column(&["GEZ_TERM", "GEZ"]);
        let frontier_col = table.column(&["FRONTIER"]);
        let class_col = table.column(&["CLASS", "GLC2000"]);
        let wetland_col = table.column(&["WETLAND", "HYDRIC"]);
        let target_col = table.column(&["TARGET_CLASS"]);
        let value_col = table.column(&["VALUE"]);

        let cell = |row: &CsvRow, col: Option<usize>| col.map(|c| row.get(c).to_string()).unwrap_or_default();
        let non_empty = |s: String| (!s.is_empty()).then_some(s);

        let mut seen = BTreeSet::new();
        let mut rules = Vec::new();
        for row in &table.rows {
            let id = row.get(id_col).to_string();
            if id.is_empty() {
                return Err(table.error(row, "empty rule ID"));
            }
            if !seen.insert(id.clone()) {
                return Err(table.error(row, format!("duplicate rule ID `{id}`")));
            }

            let flag = |col: Option<usize>, what: &str| -> Result<Option<bool>, TableError> {
                match cell(row, col) {
                    s if s.is_empty() || s.eq_ignore_ascii_case("either") => Ok(None),
                    s => parse_flag(&s).map(Some).ok_or_else(|| table.error(row, format!("bad {what} `{s}`"))),
                }
            };
            let mut classes = Vec::new();
            for part in explode_list(&cell(row, class_col)) {
                let parsed = parse_class_cell(&part).ok_or_else(|| table.error(row, format!("bad CLASS `{part}`")))?;
                classes.extend(parsed);
            }
            let predicate = RulePredicate {
                region: non_empty(cell(row, region_col)),
                gez: non_empty(cell(row, gez_col)),
                frontier: flag(frontier_col, "FRONTIER")?,
                classes,
                wetland: flag(wetland_col, "WETLAND")?,
            };

            let value = match cell(row, value_col) {
                s if s.is_empty() => None,
                s => Some(
                    s.parse::<f64>()
                        .ok()
                        .filter(|v| v.is_finite())
                        .ok_or_else(|| table.error(row, format!("bad VALUE `{s}`")))?,
                ),
            };
            let action = match row.get(action_col).to_ascii_lowercase().as_str() {
                "fixed" => RuleAction::Fixed(value.ok_or_else(|| table.error(row, "fixed action needs a VALUE"))?),
                "lookup" => {
                    let class = match cell(row, target_col) {
                        s if s.is_empty() => None,
                        s => match parse_class_cell(&s).as_deref() {
                            Some([c]) => Some(*c),
                            _ => return Err(table.error(row, format!("bad TARGET_CLASS `{s}`"))),
                        },
                    };
                    RuleAction::Lookup { class, factor: value.unwrap_or(1.0) }
                }
                "fill" => {
                    let mut classes = Vec::new();
                    for part in explode_list(&cell(row, target_col)) {
                        let parsed =
                            parse_class_cell(&part).ok_or_else(|| table.error(row, format!("bad TARGET_CLASS `{part}`")))?;
                        classes.extend(parsed);
                    }
                    if classes.is_empty() {
                        return Err(table.error(row, "fill action needs TARGET_CLASS"));
                    }
                    RuleAction::FillFromMean { classes, factor: value.unwrap_or(1.0) }
                }
                other => return Err(table.error(row, format!("unknown ACTION `{other}`"))),
            };
            rules.push(ExpertRule { id, predicate, action });
        }
        Ok(Self { rules })
    }

    /// `self` evaluated before `later`.
    pub fn then(mut self, later: RuleSet) -> Self {
        self.rules.extend(later.rules);
        self
    }

    pub fn rules(&self) -> &[ExpertRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Pick the coefficient source for one (zone, class) unit.
    pub fn evaluate(&self, attrs: &ZoneAttributes, class: ClassCode, force_wetland_overrides: bool) -> RuleOutcome {
        if force_wetland_overrides && attrs.wetland {
            return RuleOutcome {
                resolution: Resolution::Lookup { key: CoefficientKey::for_zone(attrs, ClassRef::Wetland), factor: 1.0 },
                applied: AppliedRule::WetlandOverride,
            };
        }
        for rule in &self.rules {
            if !rule.predicate.matches(attrs, class) {
                continue;
            }
            let resolution = match &rule.action {
                RuleAction::Fixed(v) => Resolution::Fixed(*v),
                RuleAction::Lookup { class: target, factor } => Resolution::Lookup {
                    key: CoefficientKey::for_zone(attrs, ClassRef::Standard(target.unwrap_or(class))),
                    factor: *factor,
                },
                RuleAction::FillFromMean { classes, factor } => Resolution::Fill {
                    key: CoefficientKey::for_zone(attrs, ClassRef::Standard(class)),
                    reference: classes
                        .iter()
                        .map(|&c| CoefficientKey::for_zone(attrs, ClassRef::Standard(c)))
                        .collect(),
                    factor: *factor,
                },
            };
            return RuleOutcome { resolution, applied: AppliedRule::Rule(rule.id.clone()) };
        }
        RuleOutcome {
            resolution: Resolution::Lookup {
                key: CoefficientKey::for_zone(attrs, ClassRef::Standard(class)),
                factor: 1.0,
            },
            applied: AppliedRule::NoRuleMatched,
        }
    }
}
