//! Mean and covariance of 2d offset votes.
//! The trace of the covariance tells how well the offsets of a node agree.

use std::ops::{Add, Sub, Div};

/// A 2d vector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec2(pub [f64; 2]);

/// A 2x2 matrix (row major)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mat2(pub [[f64; 2]; 2]);

impl Vec2 {
    pub fn new(coord: [f64; 2]) -> Vec2 {
        Vec2(coord)
    }

    /// v * v^T
    fn outer(&self) -> Mat2 {
        let v = self.0;
        Mat2([[v[0] * v[0], v[0] * v[1]], [v[1] * v[0], v[1] * v[1]]])
    }
}

impl Add for Vec2 {
    type Output = Vec2;
    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2([self.0[0] + rhs.0[0], self.0[1] + rhs.0[1]])
    }
}

impl Sub for Vec2 {
    type Output = Vec2;
    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2([self.0[0] - rhs.0[0], self.0[1] - rhs.0[1]])
    }
}

impl Div<f64> for Vec2 {
    type Output = Vec2;
    fn div(self, rhs: f64) -> Vec2 {
        Vec2([self.0[0] / rhs, self.0[1] / rhs])
    }
}

impl Add for Mat2 {
    type Output = Mat2;
    fn add(self, rhs: Mat2) -> Mat2 {
        let mut me = self;
        for i in 0..2 {
            for j in 0..2 {
                me.0[i][j] += rhs.0[i][j];
            }
        }
        me
    }
}

impl Div<f64> for Mat2 {
    type Output = Mat2;
    fn div(self, rhs: f64) -> Mat2 {
        let mut me = self;
        for row in me.0.iter_mut() {
            for v in row.iter_mut() {
                *v /= rhs;
            }
        }
        me
    }
}

impl Mat2 {
    pub fn trace(&self) -> f64 {
        self.0[0][0] + self.0[1][1]
    }
}

/// Estimate the mean value and the covariance matrix
/// of the given set.
/// For a single element the covariance is zero.
pub fn estimate_mean_cov(set: &[Vec2]) -> Option<(Vec2, Mat2)> {
    if set.is_empty() {
        return None;
    }
    let mean = set.iter().skip(1).fold(set[0], |acc, &v| acc + v) / set.len() as f64;
    let cov = set.iter()
        .skip(1)
        .fold((set[0] - mean).outer(), |acc, &v| acc + (v - mean).outer());
    let norm = if set.len() > 1 { set.len() - 1 } else { 1 };
    Some((mean, cov / norm as f64))
}

/// Sum of the squared distances of the offsets to their mean.
/// Returns 0 for less than two offsets.
pub fn offset_spread(offsets: &[Vec2]) -> f64 {
    if offsets.len() < 2 {
        return 0.0;
    }
    match estimate_mean_cov(offsets) {
        Some((_, cov)) => cov.trace() * (offsets.len() - 1) as f64,
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! assert_feq {
        ($a: expr, $b: expr, $tol: expr) => (
            assert!(($b-$a).abs() < $tol, "{} != {}", $a, $b);
            )
    }

    #[test]
    fn test_mean_cov2() {
        let v = [Vec2([2f64, 6f64]), Vec2([3f64, 4f64]), Vec2([3f64, 8f64]), Vec2([4f64, 6f64])];
        let (m, c) = estimate_mean_cov(&v[..]).unwrap();
        assert_feq!(m.0[0], 3f64, 0.001);
        assert_feq!(m.0[1], 6f64, 0.001);
        assert_feq!(c.0[0][0], 0.66666f64, 0.001);
        assert_feq!(c.0[1][1], 2.6666f64, 0.001);
        assert_feq!(c.0[0][1], 0f64, 0.001);
        assert_feq!(c.0[1][0], 0f64, 0.001);
        assert_feq!(c.trace(), 3.3333f64, 0.001);
    }

    #[test]
    fn test_empty_and_single() {
        assert!(estimate_mean_cov(&[]).is_none());
        let (m, c) = estimate_mean_cov(&[Vec2([1.0, 2.0])]).unwrap();
        assert_eq!(m, Vec2([1.0, 2.0]));
        assert_eq!(c.trace(), 0.0);
    }

    #[test]
    fn test_offset_spread() {
        // mean (1, 0); squared distances 1 + 1
        let v = [Vec2([0.0, 0.0]), Vec2([2.0, 0.0])];
        assert_feq!(offset_spread(&v), 2.0, 1e-9);
        assert_eq!(offset_spread(&v[..1]), 0.0);
    }

    #[test]
    fn test_outer_product() {
        let m = Vec2([3.1, 2.2]).outer();
        assert_feq!(m.0[0][0], 9.61, 0.001);
        assert_feq!(m.0[0][1], 6.82, 0.001);
        assert_feq!(m.0[1][0], 6.82, 0.001);
        assert_feq!(m.0[1][1], 4.84, 0.001);
    }
}
