//! Definitions to describe basis states, superpositions thereof, and
//! selections by quantum number.

use std::{
    f64::consts::FRAC_1_SQRT_2,
    fmt,
    hash::Hash,
    ops::{ Add, Deref, Mul, Neg, RangeInclusive, Sub },
};
use indexmap::IndexMap;
use num_complex::Complex64 as C64;
use num_traits::Zero;
use serde::{ Deserialize, Serialize };

/* Quantum numbers ************************************************************/

/// Electronic manifold of a TlF basis state.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash,
    Serialize, Deserialize,
)]
pub enum Electronic {
    /// Ground X¹Σ⁺ state.
    X,
    /// Excited B³Π₁ state.
    B,
}

/// Total parity of a basis state.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash,
    Serialize, Deserialize,
)]
pub enum Parity {
    #[serde(alias = "+", alias = "+1")]
    Plus,
    #[serde(alias = "-", alias = "-1")]
    Minus,
}

impl Parity {
    /// Return `+1.0` or `-1.0`.
    pub fn sign(self) -> f64 {
        match self {
            Self::Plus => 1.0,
            Self::Minus => -1.0,
        }
    }

    /// Return `(-1)^n` as a parity.
    pub fn from_power(n: u32) -> Self {
        if n % 2 == 0 { Self::Plus } else { Self::Minus }
    }
}

/// Names a quantum number that can be queried from a [`BasisState`].
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash,
    Serialize, Deserialize,
)]
pub enum QuantumNumber {
    J,
    mJ,
    F1,
    F,
    mF,
    m1,
    m2,
    Omega,
    P,
}

/* States *********************************************************************/

/// Cartesian polarization vector `(ε_x, ε_y, ε_z)` of a driving field.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Polarization(pub [C64; 3]);

impl Polarization {
    pub const X: Self
        = Self([C64::new(1.0, 0.0), C64::new(0.0, 0.0), C64::new(0.0, 0.0)]);
    pub const Y: Self
        = Self([C64::new(0.0, 0.0), C64::new(1.0, 0.0), C64::new(0.0, 0.0)]);
    pub const Z: Self
        = Self([C64::new(0.0, 0.0), C64::new(0.0, 0.0), C64::new(1.0, 0.0)]);

    /// Create a new polarization from real Cartesian components.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self([x.into(), y.into(), z.into()])
    }

    /// σ⁺ polarization, `-(x̂ + iŷ)/√2`.
    pub fn sigma_plus() -> Self {
        Self([
            C64::new(-FRAC_1_SQRT_2, 0.0),
            C64::new(0.0, -FRAC_1_SQRT_2),
            C64::zero(),
        ])
    }

    /// σ⁻ polarization, `(x̂ - iŷ)/√2`.
    pub fn sigma_minus() -> Self {
        Self([
            C64::new(FRAC_1_SQRT_2, 0.0),
            C64::new(0.0, -FRAC_1_SQRT_2),
            C64::zero(),
        ])
    }

    /// Return a unit-norm copy of `self`, or `self` if it is zero.
    pub fn normalized(self) -> Self {
        let norm = self.0.iter().map(|c| c.norm_sqr()).sum::<f64>().sqrt();
        if norm == 0.0 { return self; }
        Self(self.0.map(|c| c / norm))
    }

    /// Weight `c_p` of the spherical tensor component `T¹_p` in `d·ε`, for
    /// `p ∈ {-1, 0, +1}`.
    pub fn spherical(&self, p: i32) -> C64 {
        let [x, y, z] = self.0;
        match p {
            -1 => (x + C64::i() * y) * FRAC_1_SQRT_2,
            0 => z,
            1 => -(x - C64::i() * y) * FRAC_1_SQRT_2,
            _ => C64::zero(),
        }
    }
}

/// A single basis state, i.e. an immutable tuple of quantum numbers in one
/// coupling scheme.
///
/// Superpositions are only ever formed over a single implementor, so states of
/// incompatible coupling schemes can never be combined.
pub trait BasisState: Clone + Eq + Hash + fmt::Debug {
    /// Rotational quantum number.
    fn J(&self) -> u32;

    /// Electronic manifold.
    fn electronic(&self) -> Electronic;

    /// Look up a quantum number by name, if it is defined in this scheme.
    fn quantum_number(&self, qn: QuantumNumber) -> Option<f64>;

    /// Electric dipole matrix element `⟨self| d·ε |ket⟩`.
    fn dipole_element(&self, ket: &Self, pol: &Polarization) -> C64;
}

/// A formal superposition of basis states with complex amplitudes.
///
/// Normalization is never enforced; see [`Self::normalized`]. This collection
/// is backed by a single [`IndexMap`], which can be accessed via [`AsRef`] and
/// [`Deref`].
#[derive(Clone, Debug)]
pub struct State<S>
where S: BasisState
{
    amplitudes: IndexMap<S, C64>,
}

impl<S> AsRef<IndexMap<S, C64>> for State<S>
where S: BasisState
{
    fn as_ref(&self) -> &IndexMap<S, C64> { &self.amplitudes }
}

impl<S> Deref for State<S>
where S: BasisState
{
    type Target = IndexMap<S, C64>;

    fn deref(&self) -> &Self::Target { &self.amplitudes }
}

impl<S> Default for State<S>
where S: BasisState
{
    fn default() -> Self { Self { amplitudes: IndexMap::default() } }
}

impl<S> FromIterator<(S, C64)> for State<S>
where S: BasisState
{
    fn from_iter<I>(iter: I) -> Self
    where I: IntoIterator<Item = (S, C64)>
    {
        let mut state = Self::default();
        iter.into_iter().for_each(|(s, a)| state.add_component(s, a));
        state
    }
}

impl<S> From<S> for State<S>
where S: BasisState
{
    fn from(s: S) -> Self { Self::from_basis(s) }
}

/// Equality ignores insertion order and exactly-zero amplitudes.
impl<S> PartialEq for State<S>
where S: BasisState
{
    fn eq(&self, other: &Self) -> bool {
        let covers = |a: &Self, b: &Self| {
            a.amplitudes.iter()
                .all(|(s, x)| {
                    b.amplitudes.get(s).copied().unwrap_or_else(C64::zero) == *x
                })
        };
        covers(self, other) && covers(other, self)
    }
}

impl<S> State<S>
where S: BasisState
{
    /// Create a new, empty (zero) state.
    pub fn new() -> Self { Self::default() }

    /// Create a state consisting of a single basis state with unit amplitude.
    pub fn from_basis(s: S) -> Self {
        Self { amplitudes: [(s, C64::from(1.0))].into_iter().collect() }
    }

    /// Add `amplitude` to the component along `s`.
    pub fn add_component(&mut self, s: S, amplitude: C64) {
        let a = self.amplitudes.entry(s).or_insert_with(C64::zero);
        *a += amplitude;
    }

    /// Get the amplitude along a basis state.
    pub fn amplitude(&self, s: &S) -> C64 {
        self.amplitudes.get(s).copied().unwrap_or_else(C64::zero)
    }

    /// Conjugate-linear (in `self`) inner product `⟨self|other⟩`.
    ///
    /// Zero when the two states share no basis states.
    pub fn inner(&self, other: &Self) -> C64 {
        self.amplitudes.iter()
            .filter_map(|(s, a)| other.amplitudes.get(s).map(|b| a.conj() * b))
            .sum()
    }

    /// Return the norm `sqrt(⟨self|self⟩)`.
    pub fn norm(&self) -> f64 {
        self.amplitudes.values().map(|a| a.norm_sqr()).sum::<f64>().sqrt()
    }

    /// Return a unit-norm copy of `self`, or `self` if it is zero.
    pub fn normalized(&self) -> Self {
        let norm = self.norm();
        if norm == 0.0 { return self.clone(); }
        self.clone() * C64::from(1.0 / norm)
    }

    /// Return the basis state with the largest-magnitude amplitude.
    ///
    /// Ties are broken by insertion order.
    pub fn largest_component(&self) -> Option<&S> {
        self.amplitudes.iter()
            .fold(None, |acc: Option<(&S, f64)>, (s, a)| {
                match acc {
                    Some((_, best)) if best >= a.norm_sqr() => acc,
                    _ => Some((s, a.norm_sqr())),
                }
            })
            .map(|(s, _)| s)
    }

    /// Return a copy of `self` without components whose squared amplitude is
    /// at most `tol`.
    pub fn remove_small_components(&self, tol: f64) -> Self {
        Self {
            amplitudes: self.amplitudes.iter()
                .filter(|(_, a)| a.norm_sqr() > tol)
                .map(|(s, a)| (s.clone(), *a))
                .collect()
        }
    }

    /// Electric dipole matrix element `⟨self| d·ε |ket⟩` between two
    /// superpositions.
    pub fn dipole_element(&self, ket: &Self, pol: &Polarization) -> C64 {
        let mut acc = C64::zero();
        for (sb, ab) in self.amplitudes.iter() {
            for (sk, ak) in ket.amplitudes.iter() {
                let me = sb.dipole_element(sk, pol);
                if me != C64::zero() { acc += ab.conj() * ak * me; }
            }
        }
        acc
    }
}

impl<S> Add for State<S>
where S: BasisState
{
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self::Output {
        rhs.amplitudes.into_iter()
            .for_each(|(s, a)| self.add_component(s, a));
        self
    }
}

impl<S> Sub for State<S>
where S: BasisState
{
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output { self + (-rhs) }
}

impl<S> Neg for State<S>
where S: BasisState
{
    type Output = Self;

    fn neg(self) -> Self::Output { self * C64::from(-1.0) }
}

impl<S> Mul<C64> for State<S>
where S: BasisState
{
    type Output = Self;

    fn mul(mut self, rhs: C64) -> Self::Output {
        self.amplitudes.values_mut().for_each(|a| { *a *= rhs; });
        self
    }
}

impl<S> Mul<f64> for State<S>
where S: BasisState
{
    type Output = Self;

    fn mul(self, rhs: f64) -> Self::Output { self * C64::from(rhs) }
}

impl<S> fmt::Display for State<S>
where S: BasisState
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.amplitudes.is_empty() { return write!(f, "0"); }
        for (k, (s, a)) in self.amplitudes.iter().enumerate() {
            if k > 0 { write!(f, " + ")?; }
            write!(f, "({:.3}{:+.3}i)·{:?}", a.re, a.im, s)?;
        }
        Ok(())
    }
}

/* Selection ******************************************************************/

/// Filter on the value of a single quantum number.
///
/// Deserializes from a bare number (exact match), a list (any of), or a
/// `{ min, max }` table (inclusive range).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QnFilter {
    Exact(f64),
    Among(Vec<f64>),
    Range { min: f64, max: f64 },
}

impl QnFilter {
    const TOL: f64 = 1e-9;

    /// Return `true` if `value` passes the filter.
    pub fn accepts(&self, value: f64) -> bool {
        match self {
            Self::Exact(x) => (value - x).abs() < Self::TOL,
            Self::Among(xs) => xs.iter().any(|x| (value - x).abs() < Self::TOL),
            Self::Range { min, max }
                => value >= min - Self::TOL && value <= max + Self::TOL,
        }
    }

    /// Return the smallest range of non-negative integers covering every
    /// accepted integer value.
    pub fn integer_span(&self) -> Option<RangeInclusive<u32>> {
        let (lo, hi) = match self {
            Self::Exact(x) => (*x, *x),
            Self::Among(xs) => {
                let lo = xs.iter().copied().fold(f64::INFINITY, f64::min);
                let hi = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                (lo, hi)
            },
            Self::Range { min, max } => (*min, *max),
        };
        let lo = lo.max(0.0).ceil();
        let hi = hi.floor();
        (lo <= hi).then(|| lo as u32..=hi as u32)
    }
}

/// Selects basis states (or superpositions, by their largest component) by
/// quantum number.
///
/// Unset fields match anything.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantumSelector {
    pub electronic: Option<Electronic>,
    pub P: Option<Parity>,
    pub J: Option<QnFilter>,
    pub F1: Option<QnFilter>,
    pub F: Option<QnFilter>,
    pub mF: Option<QnFilter>,
    pub Omega: Option<QnFilter>,
}

impl QuantumSelector {
    /// Create a new selector matching every state.
    pub fn new() -> Self { Self::default() }

    pub fn with_electronic(mut self, electronic: Electronic) -> Self {
        self.electronic = Some(electronic);
        self
    }

    pub fn with_parity(mut self, P: Parity) -> Self {
        self.P = Some(P);
        self
    }

    pub fn with_J(mut self, J: QnFilter) -> Self {
        self.J = Some(J);
        self
    }

    pub fn with_F1(mut self, F1: QnFilter) -> Self {
        self.F1 = Some(F1);
        self
    }

    pub fn with_F(mut self, F: QnFilter) -> Self {
        self.F = Some(F);
        self
    }

    pub fn with_mF(mut self, mF: QnFilter) -> Self {
        self.mF = Some(mF);
        self
    }

    fn filters(&self) -> impl Iterator<Item = (QuantumNumber, &QnFilter)> {
        [
            (QuantumNumber::J, &self.J),
            (QuantumNumber::F1, &self.F1),
            (QuantumNumber::F, &self.F),
            (QuantumNumber::mF, &self.mF),
            (QuantumNumber::Omega, &self.Omega),
        ]
        .into_iter()
        .filter_map(|(qn, filter)| filter.as_ref().map(|f| (qn, f)))
    }

    /// Return `true` if a basis state matches every set field.
    ///
    /// A filter on a quantum number that the state's coupling scheme does not
    /// define never matches.
    pub fn matches<S>(&self, s: &S) -> bool
    where S: BasisState
    {
        if self.electronic.is_some_and(|el| el != s.electronic()) {
            return false;
        }
        if let Some(P) = self.P {
            match s.quantum_number(QuantumNumber::P) {
                Some(p) if p == P.sign() => { },
                _ => { return false; },
            }
        }
        self.filters()
            .all(|(qn, filter)| {
                s.quantum_number(qn).is_some_and(|v| filter.accepts(v))
            })
    }

    /// Return `true` if the largest component of a superposition matches.
    pub fn matches_state<S>(&self, state: &State<S>) -> bool
    where S: BasisState
    {
        state.largest_component().is_some_and(|s| self.matches(s))
    }

    /// Return the indices of all states in `states` that match.
    pub fn select<S>(&self, states: &[State<S>]) -> Vec<usize>
    where S: BasisState
    {
        states.iter().enumerate()
            .filter(|(_, state)| self.matches_state(state))
            .map(|(k, _)| k)
            .collect()
    }

    /// Range of rotational quantum numbers covered by the `J` filter.
    pub fn J_span(&self) -> Option<RangeInclusive<u32>> {
        self.J.as_ref().and_then(QnFilter::integer_span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    struct Level(u32);

    impl BasisState for Level {
        fn J(&self) -> u32 { self.0 }

        fn electronic(&self) -> Electronic {
            if self.0 == 0 { Electronic::X } else { Electronic::B }
        }

        fn quantum_number(&self, qn: QuantumNumber) -> Option<f64> {
            matches!(qn, QuantumNumber::J).then_some(f64::from(self.0))
        }

        fn dipole_element(&self, ket: &Self, _pol: &Polarization) -> C64 {
            if self.0.abs_diff(ket.0) == 1 { C64::from(1.0) } else { C64::zero() }
        }
    }

    #[test]
    fn add_merges_coincident_components() {
        let a: State<Level> = State::from_basis(Level(0)) + State::from_basis(Level(1));
        let b: State<Level> = State::from_basis(Level(1)) * 2.0;
        let c = a + b;
        assert_eq!(c.len(), 2);
        assert_eq!(c.amplitude(&Level(1)), C64::from(3.0));
    }

    #[test]
    fn inner_is_conjugate_linear_and_disjoint_zero() {
        let a: State<Level> = State::from_basis(Level(0)) * C64::i();
        let b: State<Level> = State::from_basis(Level(0));
        assert_eq!(a.inner(&b), -C64::i());
        assert_eq!(b.inner(&a), C64::i());
        let c: State<Level> = State::from_basis(Level(2));
        assert_eq!(a.inner(&c), C64::zero());
    }

    #[test]
    fn normalization_is_explicit() {
        let a: State<Level> = State::from_basis(Level(0)) + State::from_basis(Level(1));
        assert!((a.norm() - 2.0_f64.sqrt()).abs() < 1e-12);
        assert!((a.normalized().norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn selector_matches_by_largest_component() {
        let a: State<Level>
            = State::from_basis(Level(1)) * 0.9 + State::from_basis(Level(2)) * 0.1;
        let sel = QuantumSelector::new().with_J(QnFilter::Exact(1.0));
        assert!(sel.matches_state(&a));
        let range = QuantumSelector::new()
            .with_J(QnFilter::Range { min: 2.0, max: 3.0 });
        assert!(!range.matches_state(&a));
        assert_eq!(range.J_span(), Some(2..=3));
        // F is not defined for `Level`
        let sel_F = QuantumSelector::new().with_F(QnFilter::Exact(1.0));
        assert!(!sel_F.matches_state(&a));
    }

    #[test]
    fn spherical_components_of_sigma_plus() {
        let p = Polarization::sigma_plus();
        assert!((p.spherical(1) - C64::from(1.0)).norm() < 1e-12);
        assert!(p.spherical(-1).norm() < 1e-12);
        assert!(p.spherical(0).norm() < 1e-12);
    }
}
