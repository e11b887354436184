//! Fuzzy bounding-box matching.
//!
//! Report documents are programmatically generated, but the point
//! locations of a given element drift slightly between instances, so
//! exact bounding-box comparison never works. A [`BoxMatcher`] compiles
//! a nominal box into a per-coordinate inclusive integer range and
//! accepts any candidate whose coordinates' integer parts all fall
//! inside their ranges. Fractional digits are ignored.

use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::SchemaError;

/// Tolerance applied to a coordinate when the spec carries no `:N`
/// override.
pub const DEFAULT_TOLERANCE: i64 = 10;

lazy_static! {
    /// One coordinate token: `<int>.<3 digits>` with an optional `:N`
    /// tolerance suffix.
    static ref COORD_TOKEN: Regex = Regex::new(r"^(\d+)\.\d{3}(?::(\d+))?$").unwrap();
}

/// An axis-aligned box on a page, in document points.
///
/// Coordinates are positional: (x0, y0, x1, y1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl BoundingBox {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    fn coords(&self) -> [f64; 4] {
        [self.x0, self.y0, self.x1, self.y1]
    }
}

/// A compiled fuzzy matcher for one nominal bounding box.
///
/// Compiling is expensive relative to matching and the same spec is
/// reused across an entire batch, so matchers are built once through a
/// [`MatcherCache`] and shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoxMatcher {
    /// Inclusive (low, high) integer range per coordinate, in
    /// (x0, y0, x1, y1) order.
    ranges: [(i64, i64); 4],
}

impl BoxMatcher {
    /// Compile a bounding-box spec string.
    ///
    /// The spec is four tokens of the form `<int>.<3 digits>[:<int>]`
    /// separated by commas and/or whitespace, e.g.
    /// `"663.000:20, 313.440, 699.454, 323.989"`. Each token becomes
    /// the inclusive range `[floor(v) - tol, floor(v) + tol]` where
    /// `tol` is the token's `:N` override or [`DEFAULT_TOLERANCE`].
    pub fn compile(spec: &str) -> Result<Self, SchemaError> {
        let tokens: Vec<&str> = spec
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .collect();

        if tokens.len() != 4 {
            return Err(SchemaError::CoordinateCount {
                spec: spec.to_string(),
                found: tokens.len(),
            });
        }

        let mut ranges = [(0i64, 0i64); 4];
        for (i, token) in tokens.iter().enumerate() {
            let caps = COORD_TOKEN.captures(token).ok_or_else(|| SchemaError::BadCoordinate {
                spec: spec.to_string(),
                token: token.to_string(),
            })?;

            let value: i64 = caps[1].parse().map_err(|_| SchemaError::BadCoordinate {
                spec: spec.to_string(),
                token: token.to_string(),
            })?;

            let tolerance = match caps.get(2) {
                Some(m) => m.as_str().parse().map_err(|_| SchemaError::BadCoordinate {
                    spec: spec.to_string(),
                    token: token.to_string(),
                })?,
                None => DEFAULT_TOLERANCE,
            };

            ranges[i] = (value - tolerance, value + tolerance);
        }

        Ok(Self { ranges })
    }

    /// Test whether a candidate box falls inside all four ranges.
    pub fn matches(&self, candidate: &BoundingBox) -> bool {
        candidate
            .coords()
            .iter()
            .zip(&self.ranges)
            .all(|(value, (low, high))| {
                let whole = value.floor() as i64;
                (*low..=*high).contains(&whole)
            })
    }
}

/// Cache of compiled matchers, keyed by the literal spec string.
///
/// Identical specs always reuse the same matcher. Entries are never
/// replaced once inserted, so shared `Arc`s stay valid for the whole
/// batch.
#[derive(Debug, Default)]
pub struct MatcherCache {
    compiled: HashMap<String, Arc<BoxMatcher>>,
}

impl MatcherCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the matcher for `spec`, compiling it on first use.
    pub fn get_or_compile(&mut self, spec: &str) -> Result<Arc<BoxMatcher>, SchemaError> {
        if let Some(matcher) = self.compiled.get(spec) {
            return Ok(Arc::clone(matcher));
        }
        let matcher = Arc::new(BoxMatcher::compile(spec)?);
        self.compiled.insert(spec.to_string(), Arc::clone(&matcher));
        Ok(matcher)
    }

    /// Number of distinct specs compiled so far.
    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_default_tolerance() {
        let m = BoxMatcher::compile("100.000,100.000,120.000,110.000").unwrap();

        // Integer part within +/-10 of nominal on all coordinates.
        assert!(m.matches(&BoundingBox::new(105.123, 103.456, 118.222, 109.876)));
        assert!(m.matches(&BoundingBox::new(90.0, 90.0, 110.0, 100.0)));
        assert!(m.matches(&BoundingBox::new(110.999, 110.0, 130.5, 120.0)));

        // One coordinate just past the boundary.
        assert!(!m.matches(&BoundingBox::new(89.999, 100.0, 120.0, 110.0)));
        assert!(!m.matches(&BoundingBox::new(111.0, 100.0, 120.0, 110.0)));
    }

    #[test]
    fn compile_explicit_tolerance() {
        let m = BoxMatcher::compile("663.000:20, 313.440, 699.454, 323.989").unwrap();

        assert!(m.matches(&BoundingBox::new(643.0, 313.0, 699.0, 323.0)));
        assert!(m.matches(&BoundingBox::new(683.5, 320.1, 705.0, 330.0)));
        assert!(!m.matches(&BoundingBox::new(642.999, 313.0, 699.0, 323.0)));
        assert!(!m.matches(&BoundingBox::new(684.0, 313.0, 699.0, 323.0)));
    }

    #[test]
    fn inclusive_range_boundaries() {
        // V = 500, N = 5: V-N and V+N match, V-N-1 and V+N+1 do not.
        let m = BoxMatcher::compile("500.000:5,500.000:5,500.000:5,500.000:5").unwrap();
        let at = |v: f64| BoundingBox::new(v, v, v, v);

        assert!(m.matches(&at(495.0)));
        assert!(m.matches(&at(505.999)));
        assert!(!m.matches(&at(494.999)));
        assert!(!m.matches(&at(506.0)));
    }

    #[test]
    fn fractional_digits_ignored() {
        let m = BoxMatcher::compile("100.000:0,100.000:0,100.000:0,100.000:0").unwrap();
        assert!(m.matches(&BoundingBox::new(100.0, 100.999, 100.5, 100.001)));
        assert!(!m.matches(&BoundingBox::new(101.0, 100.0, 100.0, 100.0)));
    }

    #[test]
    fn malformed_specs_fail_compile() {
        assert!(matches!(
            BoxMatcher::compile("100.000,100.000,120.000"),
            Err(SchemaError::CoordinateCount { found: 3, .. })
        ));
        assert!(matches!(
            BoxMatcher::compile("abc,100.000,120.000,110.000"),
            Err(SchemaError::BadCoordinate { .. })
        ));
        // Two fractional digits instead of three.
        assert!(matches!(
            BoxMatcher::compile("100.00,100.000,120.000,110.000"),
            Err(SchemaError::BadCoordinate { .. })
        ));
        assert!(BoxMatcher::compile("").is_err());
    }

    #[test]
    fn cache_reuses_compiled_matchers() {
        let mut cache = MatcherCache::new();
        let spec = "476.280,510.359,488.405,520.672";

        let a = cache.get_or_compile(spec).unwrap();
        let b = cache.get_or_compile(spec).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);

        // Same candidate set either way.
        let candidate = BoundingBox::new(476.0, 510.0, 488.0, 520.0);
        assert_eq!(a.matches(&candidate), b.matches(&candidate));
    }
}
