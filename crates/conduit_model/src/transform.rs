//! 4x4 affine transforms.

use crate::geometry::Point;
use serde::{Deserialize, Serialize};
use std::ops::Mul;

/// A row-major 4x4 transform matrix.
///
/// Translation lives in the last column (`m[3]`, `m[7]`, `m[11]`), so a
/// point is transformed as `M * [x, y, z, 1]^T`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Matrix4([f64; 16]);

impl Matrix4 {
    /// The identity transform.
    pub const IDENTITY: Matrix4 = Matrix4([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    /// Creates a matrix from its row-major values.
    #[must_use]
    pub const fn from_row_major(values: [f64; 16]) -> Self {
        Self(values)
    }

    /// Creates a translation.
    #[must_use]
    pub fn translation(x: f64, y: f64, z: f64) -> Self {
        let mut m = Self::IDENTITY;
        m.0[3] = x;
        m.0[7] = y;
        m.0[11] = z;
        m
    }

    /// Creates a uniform scale.
    #[must_use]
    pub fn scale(factor: f64) -> Self {
        let mut m = Self::IDENTITY;
        m.0[0] = factor;
        m.0[5] = factor;
        m.0[10] = factor;
        m
    }

    /// Creates a rotation about the Z axis.
    #[must_use]
    pub fn rotation_z(radians: f64) -> Self {
        let (sin, cos) = radians.sin_cos();
        let mut m = Self::IDENTITY;
        m.0[0] = cos;
        m.0[1] = -sin;
        m.0[4] = sin;
        m.0[5] = cos;
        m
    }

    /// Returns the value at `row`, `col`.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.0[row * 4 + col]
    }

    /// Returns the row-major values.
    #[must_use]
    pub fn as_array(&self) -> &[f64; 16] {
        &self.0
    }

    /// Returns `self * other`.
    #[must_use]
    pub fn multiply(&self, other: &Matrix4) -> Matrix4 {
        let mut out = [0.0; 16];
        for row in 0..4 {
            for col in 0..4 {
                out[row * 4 + col] = (0..4).map(|k| self.get(row, k) * other.get(k, col)).sum();
            }
        }
        Matrix4(out)
    }

    /// Composes a stack of transforms ordered outermost first.
    ///
    /// The result is `stack[0] * stack[1] * ... * stack[n-1]`: the last matrix
    /// is applied to the point first.
    #[must_use]
    pub fn compose<'a>(stack: impl IntoIterator<Item = &'a Matrix4>) -> Matrix4 {
        stack
            .into_iter()
            .fold(Matrix4::IDENTITY, |acc, m| acc.multiply(m))
    }

    /// Transforms a point.
    #[must_use]
    pub fn transform_point(&self, point: Point) -> Point {
        let m = &self.0;
        let x = m[0] * point.x + m[1] * point.y + m[2] * point.z + m[3];
        let y = m[4] * point.x + m[5] * point.y + m[6] * point.z + m[7];
        let z = m[8] * point.x + m[9] * point.y + m[10] * point.z + m[11];
        let w = m[12] * point.x + m[13] * point.y + m[14] * point.z + m[15];
        if w != 0.0 && w != 1.0 {
            Point::new(x / w, y / w, z / w)
        } else {
            Point::new(x, y, z)
        }
    }

    /// Returns true if this is the identity transform.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

impl Default for Matrix4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mul for Matrix4 {
    type Output = Matrix4;

    fn mul(self, rhs: Matrix4) -> Matrix4 {
        self.multiply(&rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn approx(a: Point, b: Point) -> bool {
        (a.x - b.x).abs() < 1e-9 && (a.y - b.y).abs() < 1e-9 && (a.z - b.z).abs() < 1e-9
    }

    #[test]
    fn translation_moves_point() {
        let m = Matrix4::translation(1.0, 2.0, 3.0);
        assert_eq!(m.transform_point(Point::new(1.0, 1.0, 1.0)), Point::new(2.0, 3.0, 4.0));
    }

    #[test]
    fn compose_applies_innermost_first() {
        // Scale inside a translation: the point is scaled, then moved.
        let stack = [Matrix4::translation(10.0, 0.0, 0.0), Matrix4::scale(2.0)];
        let m = Matrix4::compose(&stack);
        assert_eq!(m.transform_point(Point::new(1.0, 0.0, 0.0)), Point::new(12.0, 0.0, 0.0));
    }

    #[test]
    fn empty_stack_is_identity() {
        assert!(Matrix4::compose(std::iter::empty()).is_identity());
    }

    #[test]
    fn rotation_quarter_turn() {
        let m = Matrix4::rotation_z(std::f64::consts::FRAC_PI_2);
        assert!(approx(m.transform_point(Point::new(1.0, 0.0, 0.0)), Point::new(0.0, 1.0, 0.0)));
    }

    proptest! {
        #[test]
        fn composition_matches_sequential_application(
            tx in -100.0f64..100.0, ty in -100.0f64..100.0, s in 0.1f64..10.0,
            x in -50.0f64..50.0, y in -50.0f64..50.0, z in -50.0f64..50.0,
        ) {
            let outer = Matrix4::translation(tx, ty, 0.0);
            let inner = Matrix4::scale(s);
            let p = Point::new(x, y, z);

            let composed = Matrix4::compose(&[outer, inner]).transform_point(p);
            let sequential = outer.transform_point(inner.transform_point(p));
            prop_assert!(approx(composed, sequential));
        }
    }
}
