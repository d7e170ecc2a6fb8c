//! Carbon coefficient engine.
//!
//! Combines a classified LULC raster with a carbon-zone polygon layer inside a
//! project boundary and resolves every zone/class combination to a carbon
//! coefficient (Mg C/ha) through a crosswalk, an ordered expert-rule list and
//! a coefficient lookup.
//!
//! Pipeline order:
//!   reproject → overlay → crosswalk → rules → coefficients → aggregate → assemble.
//!
//! File formats are not handled here; callers hand in [`raster::RasterGrid`],
//! [`zones::ZoneLayer`] and [`zones::BoundaryPolygon`] values and persist the
//! [`assemble::RunOutput`] themselves.

pub mod aggregate;
pub mod assemble;
pub mod coefficients;
pub mod crosswalk;
pub mod crs;
pub mod error;
pub mod overlay;
pub mod pipeline;
pub mod raster;
pub mod reproject;
pub mod rules;
pub mod tables;
pub mod validate;
pub mod zones;

pub use aggregate::{AggregatedResult, AggregationMethod};
pub use assemble::RunOutput;
pub use error::{CarbonError, MissingCoefficientError, OverlayError, ProjectionError, UnmappedClassError};
pub use pipeline::{run, LookupTables, RunInputs, RunOptions};
pub use validate::{validate, ValidationReport};

/// Standardized (crosswalked) land-cover class code.
pub type ClassCode = u16;
