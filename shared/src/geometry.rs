//! Planar vector helpers used by the coverage planner.
//!
//! Points and vectors live in the local survey frame (meters). Normalizing a
//! vector that is too short to have a direction is reported as an error so
//! that NaN or infinite components never reach a flight command.

use nalgebra::{Point2, Vector2};
use thiserror::Error;

/// Vectors shorter than this have no usable direction.
pub const MIN_LENGTH: f64 = 1e-9;

/// Errors raised by the vector helpers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    /// The vector has (near) zero length and cannot be normalized.
    #[error("cannot normalize a zero-length vector")]
    ZeroLength,

    /// A component is NaN or infinite.
    #[error("non-finite vector ({x}, {y})")]
    NonFinite { x: f64, y: f64 },
}

/// Result type for geometry operations.
pub type GeometryResult<T> = Result<T, GeometryError>;

/// Vector pointing from `p` to `q`.
pub fn vector_between(p: &Point2<f64>, q: &Point2<f64>) -> Vector2<f64> {
    q - p
}

/// Euclidean length of `v`.
pub fn length(v: &Vector2<f64>) -> f64 {
    v.norm()
}

/// Unit vector with the direction of `v`.
///
/// # Errors
/// Returns [`GeometryError::ZeroLength`] when `|v| < MIN_LENGTH` and
/// [`GeometryError::NonFinite`] when a component is NaN or infinite.
pub fn unit(v: &Vector2<f64>) -> GeometryResult<Vector2<f64>> {
    if !v.x.is_finite() || !v.y.is_finite() {
        return Err(GeometryError::NonFinite { x: v.x, y: v.y });
    }

    let len = length(v);
    if len < MIN_LENGTH {
        return Err(GeometryError::ZeroLength);
    }

    Ok(v / len)
}

/// `v` multiplied by `k`.
pub fn scale(v: &Vector2<f64>, k: f64) -> Vector2<f64> {
    v * k
}

/// Z component of the 3D cross product of two planar vectors.
///
/// Zero when `a` and `b` are parallel.
pub fn cross(a: &Vector2<f64>, b: &Vector2<f64>) -> f64 {
    a.x * b.y - a.y * b.x
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_vector_between() {
        let v = vector_between(&Point2::new(1.0, 2.0), &Point2::new(4.0, -2.0));
        assert_eq!(v, Vector2::new(3.0, -4.0));
        assert_relative_eq!(length(&v), 5.0);
    }

    #[test]
    fn test_unit_vector_has_length_one() {
        let u = unit(&Vector2::new(3.0, -4.0)).unwrap();
        assert_relative_eq!(length(&u), 1.0, epsilon = 1e-12);
        assert_relative_eq!(u.x, 0.6);
        assert_relative_eq!(u.y, -0.8);
    }

    #[test]
    fn test_unit_of_zero_vector_is_error() {
        assert_eq!(unit(&Vector2::zeros()), Err(GeometryError::ZeroLength));
        assert_eq!(
            unit(&Vector2::new(1e-12, 0.0)),
            Err(GeometryError::ZeroLength)
        );
    }

    #[test]
    fn test_unit_of_non_finite_vector_is_error() {
        assert!(matches!(
            unit(&Vector2::new(f64::NAN, 1.0)),
            Err(GeometryError::NonFinite { .. })
        ));
        assert!(matches!(
            unit(&Vector2::new(f64::INFINITY, 0.0)),
            Err(GeometryError::NonFinite { .. })
        ));
    }

    #[test]
    fn test_scale_and_cross() {
        assert_eq!(scale(&Vector2::new(1.0, -2.0), 3.0), Vector2::new(3.0, -6.0));
        assert_relative_eq!(cross(&Vector2::new(1.0, 0.0), &Vector2::new(0.0, 1.0)), 1.0);
        assert_relative_eq!(cross(&Vector2::new(2.0, 2.0), &Vector2::new(-1.0, -1.0)), 0.0);
    }
}
