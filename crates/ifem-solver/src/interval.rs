//! Closed floating-point intervals for bounding Jacobian determinants.
//!
//! Arithmetic is plain `f64` without directed rounding. Callers compensate by
//! widening the final enclosure with [`Interval::widen`].

use std::ops::{Add, Mul, Neg, Sub};

/// Closed interval `[lo, hi]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub lo: f64,
    pub hi: f64,
}

impl Interval {
    #[inline]
    pub fn new(lo: f64, hi: f64) -> Self {
        debug_assert!(lo <= hi || lo.is_nan() || hi.is_nan(), "empty interval [{lo}, {hi}]");
        Self { lo, hi }
    }

    /// Degenerate interval containing one value
    #[inline]
    pub fn point(v: f64) -> Self {
        Self { lo: v, hi: v }
    }

    /// Smallest interval containing every value of `values`.
    ///
    /// Returns `None` for an empty iterator.
    pub fn hull<I: IntoIterator<Item = f64>>(values: I) -> Option<Self> {
        let mut iter = values.into_iter();
        let first = iter.next()?;
        Some(iter.fold(Self::point(first), |acc, v| Self {
            lo: acc.lo.min(v),
            hi: acc.hi.max(v),
        }))
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.hi - self.lo
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.lo > 0.0
    }

    /// Grow both ends by `rel` times the largest magnitude in the interval.
    pub fn widen(&self, rel: f64) -> Self {
        let pad = rel * self.lo.abs().max(self.hi.abs());
        Self {
            lo: self.lo - pad,
            hi: self.hi + pad,
        }
    }

    /// Enclosure of a 2x2 determinant `| a b ; c d |`.
    pub fn det2(m: &[[Interval; 2]; 2]) -> Self {
        m[0][0] * m[1][1] - m[0][1] * m[1][0]
    }

    /// Enclosure of a 3x3 determinant by cofactor expansion along row 0.
    pub fn det3(m: &[[Interval; 3]; 3]) -> Self {
        let c0 = m[1][1] * m[2][2] - m[1][2] * m[2][1];
        let c1 = m[1][0] * m[2][2] - m[1][2] * m[2][0];
        let c2 = m[1][0] * m[2][1] - m[1][1] * m[2][0];
        m[0][0] * c0 - m[0][1] * c1 + m[0][2] * c2
    }
}

impl Add for Interval {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self {
            lo: self.lo + rhs.lo,
            hi: self.hi + rhs.hi,
        }
    }
}

impl Sub for Interval {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self {
            lo: self.lo - rhs.hi,
            hi: self.hi - rhs.lo,
        }
    }
}

impl Mul for Interval {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        let products = [
            self.lo * rhs.lo,
            self.lo * rhs.hi,
            self.hi * rhs.lo,
            self.hi * rhs.hi,
        ];
        Self {
            lo: products.iter().copied().fold(f64::INFINITY, f64::min),
            hi: products.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

impl Neg for Interval {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Self {
            lo: -self.hi,
            hi: -self.lo,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_handles_sign_changes() {
        let a = Interval::new(-2.0, 3.0);
        let b = Interval::new(-1.0, 4.0);
        let p = a * b;
        assert_eq!(p.lo, -8.0);
        assert_eq!(p.hi, 12.0);
    }

    #[test]
    fn sub_and_neg() {
        let a = Interval::new(1.0, 2.0);
        let b = Interval::new(0.5, 3.0);
        assert_eq!(a - b, Interval::new(-2.0, 1.5));
        assert_eq!(-a, Interval::new(-2.0, -1.0));
    }

    #[test]
    fn det2_of_points_is_exact() {
        let m = [
            [Interval::point(2.0), Interval::point(1.0)],
            [Interval::point(1.0), Interval::point(3.0)],
        ];
        let d = Interval::det2(&m);
        assert_eq!(d, Interval::point(5.0));
        assert!(d.is_positive());
    }

    #[test]
    fn det3_encloses_sampled_determinants() {
        let m = [
            [Interval::new(0.9, 1.1), Interval::new(-0.1, 0.1), Interval::point(0.0)],
            [Interval::point(0.0), Interval::new(0.8, 1.0), Interval::new(0.0, 0.2)],
            [Interval::new(-0.1, 0.0), Interval::point(0.0), Interval::new(1.0, 1.2)],
        ];
        let enclosure = Interval::det3(&m);
        for &a in &[0.9, 1.1] {
            for &b in &[0.8, 1.0] {
                for &c in &[1.0, 1.2] {
                    let d = a * (b * c);
                    assert!(enclosure.lo <= d && d <= enclosure.hi);
                }
            }
        }
        assert!(enclosure.is_positive());
    }

    #[test]
    fn hull_and_widen() {
        let h = Interval::hull([3.0, -1.0, 2.0]).unwrap();
        assert_eq!(h, Interval::new(-1.0, 3.0));
        assert!(Interval::hull(std::iter::empty()).is_none());

        let w = Interval::new(1.0, 2.0).widen(0.5);
        assert_eq!(w, Interval::new(0.0, 3.0));
        assert_eq!(w.width(), 3.0);
    }
}
