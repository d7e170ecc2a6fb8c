//! Error taxonomy for the engine.
//!
//! Structural errors (`ProjectionError`, `TableError`) abort a run on first
//! occurrence. Lookup gaps (`UnmappedClassError`, `MissingCoefficientError`)
//! carry the complete list of offending codes/keys so one run reports
//! everything that needs fixing; when both occur they travel together as
//! `CarbonError::LookupGaps`. `OverlayError` is warning-level and is
//! returned alongside a (possibly empty) result rather than as an `Err`.

use std::fmt;

use thiserror::Error;

use crate::coefficients::CoefficientKey;
use crate::crs::Crs;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProjectionError {
    #[error("layer `{layer}` has no coordinate reference system")]
    MissingCrs { layer: String },

    #[error("layer `{layer}` uses unsupported CRS {crs}")]
    UnsupportedCrs { layer: String, crs: Crs },

    #[error("unrecognised CRS definition `{0}`")]
    UnparsableCrs(String),

    #[error("coordinate ({x}, {y}) is outside the domain of {crs}")]
    OutOfDomain { x: f64, y: f64, crs: Crs },

    #[error("layer `{layer}` feature `{feature}` collapsed to zero area after reprojection")]
    DegenerateGeometry { layer: String, feature: String },

    #[error("raster reprojection is degenerate: {reason}")]
    DegenerateRaster { reason: String },
}

/// Raw raster codes with no crosswalk entry, sorted ascending.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} raw LULC class(es) have no crosswalk entry: {}", codes.len(), join(codes))]
pub struct UnmappedClassError {
    pub codes: Vec<u32>,
}

/// Lookup keys absent from every coefficient table, sorted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} coefficient key(s) missing from all lookup tables: {}", keys.len(), join(keys))]
pub struct MissingCoefficientError {
    pub keys: Vec<CoefficientKey>,
}

/// Zone/boundary spatial mismatch. Reported as a warning; the run continues
/// with whatever (possibly empty) result the overlay produced.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OverlayError {
    #[error("boundary does not intersect any carbon zone")]
    DisjointExtents,

    #[error("boundary does not intersect the LULC raster extent")]
    RasterOutsideBoundary,

    #[error("carbon zones `{first}` and `{second}` overlap ({area_ha:.3} ha); shared cells go to `{first}`")]
    OverlappingZones { first: String, second: String, area_ha: f64 },
}

/// Malformed static table input (crosswalk, coefficients, rules, overrides).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("{table}: missing required column `{column}`")]
    MissingColumn { table: String, column: String },

    #[error("{table} line {line}: {message}")]
    Parse { table: String, line: usize, message: String },
}

/// Umbrella error for a pipeline run.
#[derive(Debug, Error)]
pub enum CarbonError {
    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error(transparent)]
    UnmappedClass(#[from] UnmappedClassError),

    #[error(transparent)]
    MissingCoefficient(#[from] MissingCoefficientError),

    #[error("{unmapped}; {missing}")]
    LookupGaps { unmapped: UnmappedClassError, missing: MissingCoefficientError },

    #[error(transparent)]
    Table(#[from] TableError),

    #[error("carbon zone `{zone}`: missing required field(s) {}", fields.join(", "))]
    MissingZoneFields { zone: String, fields: Vec<String> },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}
