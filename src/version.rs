//! Version numbering (§9 "Version numbering").
//!
//! Floating-point `+= 0.1` accumulates rounding error, so versions are
//! stored as a scaled integer of tenths and rendered to the wire as `f64`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A document version, stored as tenths (`1.0` ⇒ `Version(10)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// The initial version of a freshly created, empty document.
    pub const INITIAL: Version = Version(10);

    /// Builds a version from its tenths representation.
    pub const fn from_tenths(tenths: i64) -> Self {
        Version(tenths)
    }

    /// The raw tenths value, e.g. `15` for version `1.5`.
    pub const fn tenths(self) -> i64 {
        self.0
    }

    /// The next version, one step (`0.1`) later.
    pub const fn next(self) -> Self {
        Version(self.0 + 1)
    }

    /// Builds a version from its wire `f64` form (e.g. `1.5`), rounding to
    /// the nearest tenth.
    pub fn from_wire(value: f64) -> Self {
        Version((value * 10.0).round() as i64)
    }

    /// The wire `f64` form of this version.
    pub fn to_wire(self) -> f64 {
        self.0 as f64 / 10.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.to_wire())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_advance_by_one_tenth() {
        let v0 = Version::INITIAL;
        let v1 = v0.next();
        assert_eq!(v1.tenths() - v0.tenths(), 1);
        assert_eq!(v1.to_wire(), 1.1);
    }

    #[test]
    fn wire_round_trip() {
        let v = Version::from_wire(2.5);
        assert_eq!(v.to_wire(), 2.5);
        assert_eq!(Version::from_wire(v.to_wire()), v);
    }

    #[test]
    fn ordering_matches_wire_ordering() {
        let a = Version::from_wire(4.8);
        let b = Version::from_wire(5.0);
        assert!(a < b);
    }
}
