//! Angular momentum quantum numbers and Wigner symbols.
//!
//! All quantities are stored as a number of halves so that the half-integer
//! nuclear spins of TlF and the intermediate `F1` coupling can be represented
//! exactly.

use std::hash::Hash;
use serde::{ Deserialize, Serialize };
use wigner_symbols::{ Wigner3jm, Wigner6j };

/// A single spin-projection quantum number.
///
/// This type is backed by a single `i32` representing the number of halves.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash,
    Serialize, Deserialize,
)]
pub struct SpinProj(i32);

impl SpinProj {
    /// Create a new spin projection from a number of halves.
    pub fn new(m: i32) -> Self { Self(m) }

    /// Return `self` as a bare number of halves.
    pub fn halves(self) -> i32 { self.0 }

    /// Return `self` as an `f64`.
    ///
    /// This reflects the "true" value of the projection quantum number; i.e.
    /// there is a relative factor of 2 between this and [`Self::halves`].
    pub fn f(self) -> f64 { f64::from(self.0) / 2.0 }

    /// Create a new spin-projection quantum number from a `f64` value, rounding
    /// to the nearest half-integer.
    pub fn from_f64(f: f64) -> Self { Self((2.0 * f).round() as i32) }
}

impl From<SpinProj> for f64 {
    fn from(m: SpinProj) -> Self { m.f() }
}

/// A single total-spin quantum number.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash,
    Serialize, Deserialize,
)]
pub struct SpinTotal(u32);

impl SpinTotal {
    /// Create a new total spin from a number of halves.
    pub const fn new(j: u32) -> Self { Self(j) }

    /// Create a new integer total spin.
    pub const fn integer(j: u32) -> Self { Self(2 * j) }

    /// Return `self` as a bare number of halves.
    pub fn halves(self) -> u32 { self.0 }

    /// Return `self` as an `f64`.
    pub fn f(self) -> f64 { f64::from(self.0) / 2.0 }

    /// Create a new total-spin quantum number from a `f64` value, rounding
    /// to the nearest half-integer.
    ///
    /// Negative inputs are passed through [`f64::abs`] before rounding.
    pub fn from_f64(f: f64) -> Self { Self((2.0 * f.abs()).round() as u32) }

    /// Return `2j + 1`, the number of projection states.
    pub fn multiplicity(self) -> u32 { self.0 + 1 }

    /// Iterate over all projections by ascending value.
    pub fn projections(self) -> impl Iterator<Item = SpinProj> {
        let j = self.0 as i32;
        (-j..=j).step_by(2).map(SpinProj)
    }

    /// Iterate over all totals allowed by the triangle rule for the coupling
    /// `self + other`, in ascending order.
    pub fn couple(self, other: Self) -> impl Iterator<Item = SpinTotal> {
        let lo = self.0.abs_diff(other.0);
        let hi = self.0 + other.0;
        (lo..=hi).step_by(2).map(SpinTotal)
    }
}

impl From<SpinTotal> for f64 {
    fn from(j: SpinTotal) -> Self { j.f() }
}

/// A `(total, projection)` spin quantum number pair.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Spin(SpinTotal, SpinProj);

impl Spin {
    /// Create a new spin if the given spin-projection number is valid for the
    /// given total-spin number (both in halves).
    pub fn new(j: u32, m: i32) -> Option<Self> {
        let j_i64 = i64::from(j);
        let m_i64 = i64::from(m);
        (
            (-j_i64..=j_i64).contains(&m_i64)
            && m_i64.saturating_sub(j_i64) % 2 == 0
        )
        .then_some(Self(SpinTotal(j), SpinProj(m)))
    }
}

/// `(-1)^(h / 2)` for an even number of halves `h`.
///
/// Odd inputs correspond to a complex phase, which never arises for the
/// physical combinations used in this crate; they are treated as their
/// integer part.
pub fn phase(halves: i64) -> f64 {
    if (halves / 2).rem_euclid(2) == 0 { 1.0 } else { -1.0 }
}

/// Wigner 3j symbol for columns `(j1 m1) (j2 m2) (j3 m3)` given in halves.
///
/// Returns zero rather than panicking for any projection outside its total.
pub fn w3j(
    tj1: u32, tm1: i32,
    tj2: u32, tm2: i32,
    tj3: u32, tm3: i32,
) -> f64
{
    if Spin::new(tj1, tm1).is_none()
        || Spin::new(tj2, tm2).is_none()
        || Spin::new(tj3, tm3).is_none()
        || tm1 + tm2 + tm3 != 0
    {
        return 0.0;
    }
    Wigner3jm {
        tj1: tj1 as i32,
        tm1,
        tj2: tj2 as i32,
        tm2,
        tj3: tj3 as i32,
        tm3,
    }
    .value()
    .into()
}

/// Wigner 6j symbol for total spins (by row) given in halves.
pub fn w6j(tj1: u32, tj2: u32, tj3: u32, tj4: u32, tj5: u32, tj6: u32)
    -> f64
{
    Wigner6j {
        tj1: tj1 as i32,
        tj2: tj2 as i32,
        tj3: tj3 as i32,
        tj4: tj4 as i32,
        tj5: tj5 as i32,
        tj6: tj6 as i32,
    }
    .value()
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn couple_half_integers() {
        let j = SpinTotal::integer(1);
        let i = SpinTotal::new(1);
        let f1: Vec<f64> = j.couple(i).map(|f| f.f()).collect();
        assert_eq!(f1, vec![0.5, 1.5]);
    }

    #[test]
    fn projections_ascend() {
        let m: Vec<i32>
            = SpinTotal::new(3).projections().map(|m| m.halves()).collect();
        assert_eq!(m, vec![-3, -1, 1, 3]);
    }

    #[test]
    fn w3j_out_of_range_is_zero() {
        assert_eq!(w3j(2, 4, 2, 0, 2, -4), 0.0);
        let v = w3j(2, 0, 2, 0, 0, 0);
        assert!((v + 1.0 / 3.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn phase_signs() {
        assert_eq!(phase(0), 1.0);
        assert_eq!(phase(2), -1.0);
        assert_eq!(phase(-2), -1.0);
        assert_eq!(phase(4), 1.0);
    }
}
