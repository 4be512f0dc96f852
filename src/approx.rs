//! Utilities to approximate equality of floating point values.
//!
//! Backends are allowed to diverge from the reference scalar semantics by
//! a small absolute tolerance; cross-backend tests compare results through
//! these helpers rather than exact equality.

/// The absolute tolerance every backend must stay within of the reference
/// semantics.
pub const BACKEND_TOLERANCE: f32 = 1e-5;

/// Checks closeness within an absolute tolerance.
pub trait CloseTo<Rhs: ?Sized> {
    /// Whether `self` and `rhs` agree within `tol`.
    fn close_to(&self, rhs: &Rhs, tol: f32) -> bool;

    /// The largest elementwise absolute difference.
    fn max_abs_diff(&self, rhs: &Rhs) -> f32;
}

impl CloseTo<Self> for f32 {
    fn close_to(&self, rhs: &Self, tol: f32) -> bool {
        (self - rhs).abs() <= tol
    }

    fn max_abs_diff(&self, rhs: &Self) -> f32 {
        (self - rhs).abs()
    }
}

impl CloseTo<Self> for [f32] {
    fn close_to(&self, rhs: &Self, tol: f32) -> bool {
        self.len() == rhs.len() && self.max_abs_diff(rhs) <= tol
    }

    fn max_abs_diff(&self, rhs: &Self) -> f32 {
        self.iter()
            .zip(rhs.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f32::max)
    }
}

/// Asserts elementwise closeness with a diagnostic naming the first
/// offending index.
///
/// # Panics
/// When lengths differ or any element pair diverges beyond `tol`.
pub fn assert_close(actual: &[f32], expected: &[f32], tol: f32) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "length mismatch: {} vs {}",
        actual.len(),
        expected.len()
    );
    for (i, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
        assert!(
            a.close_to(e, tol),
            "element {i}: {a} vs {e} (|diff| = {}, tol = {tol})",
            (a - e).abs()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices_compare_within_tolerance() {
        let a = [1.0_f32, 2.0, 3.0];
        let b = [1.0_f32, 2.000_005, 3.0];
        assert!(a.as_slice().close_to(b.as_slice(), BACKEND_TOLERANCE));
        assert!(!a.as_slice().close_to(b.as_slice(), 1e-7));
        assert!(!a.as_slice().close_to(&b[..2], BACKEND_TOLERANCE));
    }
}
