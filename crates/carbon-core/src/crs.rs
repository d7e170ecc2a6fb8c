//! Coordinate reference systems and the projection math behind them.
//! All coordinate math uses f64.
//!
//! Only three systems are understood: geographic WGS84 (EPSG:4326 / CRS84),
//! Web Mercator (EPSG:3857) and the equal-area target EPSG:6933 (WGS84
//! Lambert cylindrical equal-area, standard parallel 30°, the EASE-Grid 2.0
//! global projection).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ProjectionError;

// ── Ellipsoid constants ───────────────────────────────────────────────────────

/// WGS84 semi-major axis in metres.
const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening.
const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// Standard parallel of EPSG:6933.
const EASE2_LAT_TS_DEG: f64 = 30.0;
/// Web Mercator latitude limit.
const MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

const ANGLE_TOLERANCE_DEG: f64 = 1e-9;

fn e2() -> f64 {
    WGS84_F * (2.0 - WGS84_F)
}

/// Identifies a coordinate reference system by EPSG code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Crs {
    pub epsg: u32,
}

impl Crs {
    pub const WGS84: Crs = Crs { epsg: 4326 };
    pub const WEB_MERCATOR: Crs = Crs { epsg: 3857 };
    /// The equal-area system every area calculation happens in.
    pub const EQUAL_AREA: Crs = Crs { epsg: 6933 };

    pub const fn from_epsg(epsg: u32) -> Self {
        Self { epsg }
    }

    /// Parse `EPSG:4326`, `urn:ogc:def:crs:EPSG::4326`, `OGC:CRS84`, or a bare code.
    pub fn parse(def: &str) -> Result<Self, ProjectionError> {
        let trimmed = def.trim();
        let upper = trimmed.to_ascii_uppercase();
        if upper.ends_with("CRS84") {
            return Ok(Self::WGS84);
        }
        let code = upper
            .rsplit(':')
            .next()
            .filter(|tail| !tail.is_empty())
            .and_then(|tail| tail.parse::<u32>().ok());
        match code {
            Some(900_913) => Ok(Self::WEB_MERCATOR),
            Some(epsg) if upper.contains("EPSG") || upper.chars().all(|c| c.is_ascii_digit()) => {
                Ok(Self { epsg })
            }
            _ => Err(ProjectionError::UnparsableCrs(trimmed.to_string())),
        }
    }

    /// The projection implementing this CRS, if it is one we support.
    pub fn projection(self) -> Option<Projection> {
        match self.epsg {
            4326 => Some(Projection::Geographic),
            3857 => Some(Projection::WebMercator),
            6933 => Some(Projection::EqualArea),
            _ => None,
        }
    }

    pub fn is_supported(self) -> bool {
        self.projection().is_some()
    }

    /// Transform one coordinate from `self` into `target`.
    pub fn transform(self, target: Crs, x: f64, y: f64) -> Result<(f64, f64), ProjectionError> {
        if self == target {
            return Ok((x, y));
        }
        let src = self.projection().ok_or_else(|| ProjectionError::UnsupportedCrs {
            layer: "coordinate".into(),
            crs: self,
        })?;
        let dst = target.projection().ok_or_else(|| ProjectionError::UnsupportedCrs {
            layer: "coordinate".into(),
            crs: target,
        })?;
        let (lon, lat) = src
            .to_geographic(x, y)
            .ok_or(ProjectionError::OutOfDomain { x, y, crs: self })?;
        dst.from_geographic(lon, lat)
            .ok_or(ProjectionError::OutOfDomain { x: lon, y: lat, crs: target })
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}

/// Supported map projections. Geographic coordinates are (lon, lat) degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    Geographic,
    WebMercator,
    EqualArea,
}

impl Projection {
    /// Projected (x, y) → geographic (lon, lat). `None` outside the projection's domain.
    pub fn to_geographic(self, x: f64, y: f64) -> Option<(f64, f64)> {
        if !x.is_finite() || !y.is_finite() {
            return None;
        }
        match self {
            Projection::Geographic => in_geographic_range(x, y).then_some((x, y)),
            Projection::WebMercator => {
                let lon = (x / WGS84_A).to_degrees();
                let lat = (2.0 * (y / WGS84_A).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
                in_geographic_range(lon, lat).then_some((lon, lat))
            }
            Projection::EqualArea => ease2_inverse(x, y),
        }
    }

    /// Geographic (lon, lat) → projected (x, y). `None` outside the projection's domain.
    pub fn from_geographic(self, lon: f64, lat: f64) -> Option<(f64, f64)> {
        if !in_geographic_range(lon, lat) {
            return None;
        }
        match self {
            Projection::Geographic => Some((lon, lat)),
            Projection::WebMercator => {
                if lat.abs() > MERCATOR_MAX_LAT + ANGLE_TOLERANCE_DEG {
                    return None;
                }
                let phi = lat.to_radians();
                let y = WGS84_A * (std::f64::consts::FRAC_PI_4 + phi / 2.0).tan().ln();
                Some((WGS84_A * lon.to_radians(), y))
            }
            Projection::EqualArea => Some(ease2_forward(lon, lat)),
        }
    }
}

fn in_geographic_range(lon: f64, lat: f64) -> bool {
    lon.is_finite()
        && lat.is_finite()
        && lon.abs() <= 180.0 + ANGLE_TOLERANCE_DEG
        && lat.abs() <= 90.0 + ANGLE_TOLERANCE_DEG
}

// ── EPSG:6933 (Lambert cylindrical equal-area on WGS84) ───────────────────────

/// Scale factor along the standard parallel.
fn ease2_k0() -> f64 {
    let phi = EASE2_LAT_TS_DEG.to_radians();
    phi.cos() / (1.0 - e2() * phi.sin().powi(2)).sqrt()
}

/// Authalic function q(φ) (Snyder 3-12).
fn authalic_q(sin_phi: f64) -> f64 {
    let e2 = e2();
    let e = e2.sqrt();
    let es = e * sin_phi;
    (1.0 - e2) * (sin_phi / (1.0 - es * es) - (1.0 / (2.0 * e)) * ((1.0 - es) / (1.0 + es)).ln())
}

fn ease2_forward(lon: f64, lat: f64) -> (f64, f64) {
    let k0 = ease2_k0();
    let lat = lat.clamp(-90.0, 90.0);
    let x = WGS84_A * k0 * lon.to_radians();
    let y = WGS84_A * authalic_q(lat.to_radians().sin()) / (2.0 * k0);
    (x, y)
}

fn ease2_inverse(x: f64, y: f64) -> Option<(f64, f64)> {
    let e2 = e2();
    let e = e2.sqrt();
    let k0 = ease2_k0();
    let lon = (x / (WGS84_A * k0)).to_degrees();
    let q = 2.0 * y * k0 / WGS84_A;
    let qp = authalic_q(1.0);

    if q.abs() > qp * (1.0 + 1e-12) || lon.abs() > 180.0 + ANGLE_TOLERANCE_DEG {
        return None;
    }
    if q.abs() >= qp {
        return Some((lon, 90.0_f64.copysign(q)));
    }

    // Newton iteration on the authalic latitude (Snyder 3-16).
    let mut phi = (q / 2.0).asin();
    for _ in 0..25 {
        let s = phi.sin();
        let c = phi.cos();
        if c.abs() < 1e-15 {
            break;
        }
        let one = 1.0 - e2 * s * s;
        let es = e * s;
        let dphi = one * one / (2.0 * c)
            * (q / (1.0 - e2) - s / one + (1.0 / (2.0 * e)) * ((1.0 - es) / (1.0 + es)).ln());
        phi += dphi;
        if dphi.abs() < 1e-14 {
            break;
        }
    }
    Some((lon, phi.to_degrees()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn parse_accepts_common_spellings() {
        assert_eq!(Crs::parse("EPSG:4326").unwrap(), Crs::WGS84);
        assert_eq!(Crs::parse("urn:ogc:def:crs:EPSG::6933").unwrap(), Crs::EQUAL_AREA);
        assert_eq!(Crs::parse("urn:ogc:def:crs:OGC:1.3:CRS84").unwrap(), Crs::WGS84);
        assert_eq!(Crs::parse(" 3857 ").unwrap(), Crs::WEB_MERCATOR);
        assert!(Crs::parse("+proj=longlat").is_err());
    }

    #[test]
    fn ease2_antimeridian_matches_published_extent() {
        // EASE-Grid 2.0 global grid half-width is 17 367 530.45 m.
        let (x, y) = Projection::EqualArea.from_geographic(180.0, 0.0).unwrap();
        assert_abs_diff_eq!(x, 17_367_530.45, epsilon = 1.0);
        assert_abs_diff_eq!(y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn ease2_roundtrip_within_tolerance() {
        let mut rng_state: u64 = 7;
        for _ in 0..500 {
            // LCG for deterministic pseudo-random
            rng_state = rng_state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let lat = (rng_state as f64 / u64::MAX as f64) * 178.0 - 89.0;
            rng_state = rng_state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let lon = (rng_state as f64 / u64::MAX as f64) * 360.0 - 180.0;

            let (x, y) = Projection::EqualArea.from_geographic(lon, lat).unwrap();
            let (lon2, lat2) = Projection::EqualArea.to_geographic(x, y).unwrap();
            assert!((lon - lon2).abs() < 1e-9, "lon {lon} → {lon2}");
            assert!((lat - lat2).abs() < 1e-9, "lat {lat} → {lat2}");
        }
    }

    #[test]
    fn ease2_one_degree_equatorial_cell_area() {
        // A 1°×1° cell on the equator covers ≈12 309 km² of the WGS84 ellipsoid.
        let (x0, y0) = Projection::EqualArea.from_geographic(0.0, 0.0).unwrap();
        let (x1, y1) = Projection::EqualArea.from_geographic(1.0, 1.0).unwrap();
        let km2 = (x1 - x0) * (y1 - y0) / 1e6;
        assert!((km2 - 12_309.0).abs() < 15.0, "cell area {km2:.1} km²");
    }

    #[test]
    fn web_mercator_via_geographic_into_equal_area() {
        let (mx, my) = Projection::WebMercator.from_geographic(32.5, 0.3).unwrap();
        let direct = Crs::WGS84.transform(Crs::EQUAL_AREA, 32.5, 0.3).unwrap();
        let chained = Crs::WEB_MERCATOR.transform(Crs::EQUAL_AREA, mx, my).unwrap();
        assert_abs_diff_eq!(direct.0, chained.0, epsilon = 1e-6);
        assert_abs_diff_eq!(direct.1, chained.1, epsilon = 1e-6);
    }

    #[test]
    fn out_of_domain_is_reported() {
        let err = Crs::WGS84.transform(Crs::EQUAL_AREA, 0.0, 95.0).unwrap_err();
        assert!(matches!(err, ProjectionError::OutOfDomain { .. }));
        let err = Crs::from_epsg(32636).transform(Crs::EQUAL_AREA, 0.0, 0.0).unwrap_err();
        assert!(matches!(err, ProjectionError::UnsupportedCrs { .. }));
    }
}
