//! Reduction of per-class results to one coefficient per zone.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::coefficients::TableSource;
use crate::rules::AppliedRule;
use crate::ClassCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMethod {
    /// Coefficient of the class with the largest area.
    Dominant,
    /// Area-weighted mean over all classes.
    #[default]
    Weighted,
}

impl AggregationMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            AggregationMethod::Dominant => "dominant",
            AggregationMethod::Weighted => "weighted",
        }
    }
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dominant" => Ok(AggregationMethod::Dominant),
            "weighted" => Ok(AggregationMethod::Weighted),
            other => Err(format!("unknown aggregation method `{other}` (expected dominant or weighted)")),
        }
    }
}

/// Resolved figures for one standardized class inside one zone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassBreakdown {
    pub class: ClassCode,
    pub cell_count: u64,
    pub area_ha: f64,
    /// Mg C/ha.
    pub coefficient: f64,
    pub applied_rule: AppliedRule,
    /// `None` when a fixed-value rule supplied the coefficient.
    pub source: Option<TableSource>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedResult {
    /// Position of the zone in its [`ZoneLayer`](crate::zones::ZoneLayer).
    pub zone_index: usize,
    pub zone_id: String,
    pub method: AggregationMethod,
    /// `None` is the NoData result of a zone with zero total area.
    pub coefficient: Option<f64>,
    pub dominant_class: Option<ClassCode>,
    pub total_area_ha: f64,
    /// Sorted by class code; identical for both methods.
    pub breakdown: Vec<ClassBreakdown>,
    /// Distinct rules applied across the breakdown, sorted.
    pub applied_rules: Vec<AppliedRule>,
}

/// Largest area wins; equal areas go to the lowest class code.
fn dominant(breakdown: &[ClassBreakdown]) -> Option<&ClassBreakdown> {
    breakdown
        .iter()
        .filter(|b| b.area_ha > 0.0)
        .fold(None, |best: Option<&ClassBreakdown>, b| match best {
            Some(cur) if cur.area_ha > b.area_ha || (cur.area_ha == b.area_ha && cur.class <= b.class) => Some(cur),
            _ => Some(b),
        })
}

pub fn aggregate(
    zone_index: usize,
    zone_id: &str,
    method: AggregationMethod,
    mut breakdown: Vec<ClassBreakdown>,
) -> AggregatedResult {
    breakdown.sort_by_key(|b| b.class);
    let total_area_ha: f64 = breakdown.iter().map(|b| b.area_ha).sum();
    let top = dominant(&breakdown);
    let dominant_class = top.map(|b| b.class);

    let coefficient = if total_area_ha > 0.0 {
        match method {
            AggregationMethod::Dominant => top.map(|b| b.coefficient),
            AggregationMethod::Weighted => {
                let weighted: f64 = breakdown.iter().map(|b| b.area_ha * b.coefficient).sum();
                Some(weighted / total_area_ha)
            }
        }
    } else {
        None
    };

    let mut applied_rules: Vec<AppliedRule> = breakdown.iter().map(|b| b.applied_rule.clone()).collect();
    applied_rules.sort();
    applied_rules.dedup();

    AggregatedResult {
        zone_index,
        zone_id: zone_id.to_string(),
        method,
        coefficient,
        dominant_class,
        total_area_ha,
        breakdown,
        applied_rules,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn part(class: ClassCode, area_ha: f64, coefficient: f64) -> ClassBreakdown {
        ClassBreakdown {
            class,
            cell_count: area_ha as u64,
            area_ha,
            coefficient,
            applied_rule: AppliedRule::NoRuleMatched,
            source: Some(TableSource::Builtin),
        }
    }

    #[test]
    fn forest_wetland_scenario() {
        let parts = vec![part(15, 20.0, 1.0), part(1, 80.0, 5.0)];
        let d = aggregate(0, "Z1", AggregationMethod::Dominant, parts.clone());
        let w = aggregate(0, "Z1", AggregationMethod::Weighted, parts);
        assert_eq!(d.coefficient, Some(5.0));
        assert_eq!(d.dominant_class, Some(1));
        assert_abs_diff_eq!(w.coefficient.unwrap(), 4.2, epsilon = 1e-12);
        assert_eq!(d.breakdown, w.breakdown, "breakdown must not depend on method");
        assert_eq!(d.total_area_ha, 100.0);
    }

    #[test]
    fn equal_areas_average_and_tie_to_lowest_code() {
        let parts = vec![part(9, 50.0, 4.0), part(3, 50.0, 2.0)];
        let w = aggregate(0, "Z", AggregationMethod::Weighted, parts.clone());
        assert_abs_diff_eq!(w.coefficient.unwrap(), 3.0, epsilon = 1e-12);
        let d = aggregate(0, "Z", AggregationMethod::Dominant, parts);
        assert_eq!(d.dominant_class, Some(3));
        assert_eq!(d.coefficient, Some(2.0));
    }

    #[test]
    fn zero_area_yields_nodata_not_nan() {
        for method in [AggregationMethod::Weighted, AggregationMethod::Dominant] {
            let r = aggregate(0, "empty", method, Vec::new());
            assert_eq!(r.coefficient, None);
            assert_eq!(r.dominant_class, None);
            assert_eq!(r.total_area_ha, 0.0);
        }
    }

    #[test]
    fn applied_rules_are_distinct() {
        let mut a = part(1, 10.0, 1.0);
        a.applied_rule = AppliedRule::Rule("x".into());
        let b = part(2, 10.0, 1.0);
        let mut c = part(3, 10.0, 1.0);
        c.applied_rule = AppliedRule::Rule("x".into());
        let r = aggregate(0, "Z", AggregationMethod::Weighted, vec![a, b, c]);
        assert_eq!(r.applied_rules, vec![AppliedRule::Rule("x".into()), AppliedRule::NoRuleMatched]);
    }

    #[test]
    fn method_parses_from_text() {
        assert_eq!("Dominant".parse::<AggregationMethod>(), Ok(AggregationMethod::Dominant));
        assert_eq!(" weighted ".parse::<AggregationMethod>(), Ok(AggregationMethod::Weighted));
        assert!("mean".parse::<AggregationMethod>().is_err());
        assert_eq!(serde_json::to_string(&AggregationMethod::Dominant).unwrap(), "\"dominant\"");
    }
}
