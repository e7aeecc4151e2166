//! TlF basis states in the coupled and uncoupled angular momentum schemes,
//! and their electric dipole matrix elements.
//!
//! The coupled scheme is `J + I₁ = F₁`, `F₁ + I₂ = F`, where `I₁ = 1/2` is the
//! Tl nuclear spin and `I₂ = 1/2` is the F nuclear spin. States with `Ω ≠ 0`
//! are parity eigenstates `(|Ω⟩ + s|-Ω⟩)/√2` with `s = -P (-1)^(J - Ω)`, which
//! fixes the phase convention such that electric dipole transitions connect
//! states of opposite total parity.

use std::{ f64::consts::FRAC_1_SQRT_2, fmt };
use num_complex::Complex64 as C64;
use num_traits::Zero;
use crate::{
    error::{ ObeError, ObeResult },
    hilbert::{
        BasisState,
        Electronic,
        Parity,
        Polarization,
        QuantumNumber,
        QuantumSelector,
        State,
    },
    spin::{ SpinProj, SpinTotal, phase, w3j, w6j },
};

/// Nuclear spin of ²⁰⁵Tl.
pub const I_TL: SpinTotal = SpinTotal::new(1);

/// Nuclear spin of ¹⁹F.
pub const I_F: SpinTotal = SpinTotal::new(1);

fn frac(halves: i64) -> String {
    if halves % 2 == 0 { format!("{}", halves / 2) } else { format!("{halves}/2") }
}

fn parity_char(P: Parity) -> char {
    match P {
        Parity::Plus => '+',
        Parity::Minus => '-',
    }
}

/// Signed-Ω components `(2ω, amplitude)` of a parity eigenstate.
fn omega_components(J: u32, Omega: u32, P: Parity) -> Vec<(i32, f64)> {
    if Omega == 0 {
        vec![(0, 1.0)]
    } else {
        let s = -P.sign() * phase(2 * (i64::from(J) - i64::from(Omega)));
        let tw = 2 * Omega as i32;
        vec![(tw, FRAC_1_SQRT_2), (-tw, s * FRAC_1_SQRT_2)]
    }
}

/// Angular factor `Σ_p c_p (-1)^(j - m) (j 1 j'; -m p m')` of a rank-1 tensor
/// matrix element between `|j m⟩` and `|j' m'⟩` (all in halves).
fn tensor_angular(tj: u32, tm: i32, tjp: u32, tmp: i32, pol: &Polarization)
    -> C64
{
    let p = (tm - tmp) / 2;
    if (tm - tmp).abs() > 2 || (tm - tmp) % 2 != 0 { return C64::zero(); }
    let c = pol.spherical(p);
    if c == C64::zero() { return C64::zero(); }
    let ph = phase(i64::from(tj) - i64::from(tm));
    c * ph * w3j(tj, -tm, 2, 2 * p, tjp, tmp)
}

/// Rotational part `(-1)^(J - ω) √((2J + 1)(2J' + 1)) (J 1 J'; -ω q ω')`,
/// `q = ω - ω'`, of the molecule-frame dipole element (ω in halves).
///
/// Elements lowering `|ω|` carry an extra `(-1)^q` so that `d·ε` is Hermitian
/// for real `ε`.
fn rotational_factor(tJ: u32, tw: i32, tJp: u32, twp: i32) -> f64 {
    let tq = tw - twp;
    if tq.abs() > 2 { return 0.0; }
    let dim = (f64::from(tJ + 1) * f64::from(tJp + 1)).sqrt();
    let lowering = if twp.abs() > tw.abs() { phase(i64::from(tq)) } else { 1.0 };
    lowering
        * phase(i64::from(tJ) - i64::from(tw))
        * dim
        * w3j(tJ, -tw, 2, tq, tJp, twp)
}

/* Coupled basis **************************************************************/

/// `|J, F₁, F, mF, I₁, I₂, Ω, P, el⟩`.
///
/// `Omega` holds `|Ω|`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoupledBasisState {
    pub J: u32,
    pub F1: SpinTotal,
    pub F: SpinTotal,
    pub mF: SpinProj,
    pub I1: SpinTotal,
    pub I2: SpinTotal,
    pub Omega: u32,
    pub P: Parity,
    pub electronic: Electronic,
}

impl CoupledBasisState {
    /// Create a new TlF state from real quantum number values, returning `None`
    /// if they violate the triangle rule or the projection bound.
    pub fn new(
        electronic: Electronic,
        J: u32,
        F1: f64,
        F: f64,
        mF: f64,
        P: Parity,
        Omega: u32,
    ) -> Option<Self>
    {
        let J_t = SpinTotal::integer(J);
        let F1 = SpinTotal::from_f64(F1);
        let F = SpinTotal::from_f64(F);
        let mF = SpinProj::from_f64(mF);
        let valid
            = J_t.couple(I_TL).any(|f1| f1 == F1)
            && F1.couple(I_F).any(|f| f == F)
            && F.projections().any(|m| m == mF)
            && Omega <= J;
        valid.then_some(Self {
            J, F1, F, mF, I1: I_TL, I2: I_F, Omega, P, electronic,
        })
    }

    /// Create a ground-manifold state, whose parity is fixed by `J`.
    pub fn X(J: u32, F1: f64, F: f64, mF: f64) -> Option<Self> {
        Self::new(Electronic::X, J, F1, F, mF, Parity::from_power(J), 0)
    }

    /// Create an excited-manifold (`|Ω| = 1`) state.
    pub fn B(J: u32, F1: f64, F: f64, mF: f64, P: Parity) -> Option<Self> {
        Self::new(Electronic::B, J, F1, F, mF, P, 1)
    }

    /// Reduced element `⟨self, ω|| d ||ket, ω'⟩` in the coupled scheme.
    fn reduced_element(&self, tw: i32, ket: &Self, twp: i32) -> f64 {
        let tJ = 2 * self.J;
        let tJp = 2 * ket.J;
        let (tF1, tF, tI1, tI2)
            = (self.F1.halves(), self.F.halves(), self.I1.halves(), self.I2.halves());
        let (tF1p, tFp) = (ket.F1.halves(), ket.F.halves());
        let rot = rotational_factor(tJ, tw, tJp, twp);
        if rot == 0.0 { return 0.0; }
        let ph = phase(
            i64::from(tF1) + i64::from(tJ) + i64::from(tFp) + i64::from(tF1p)
            + i64::from(tI1) + i64::from(tI2)
        );
        let dim = (
            f64::from(tF + 1) * f64::from(tFp + 1)
            * f64::from(tF1p + 1) * f64::from(tF1 + 1)
        ).sqrt();
        ph * dim
            * w6j(tF1p, tFp, tI2, tF, tF1, 2)
            * w6j(tJp, tF1p, tI1, tF1, tJ, 2)
            * rot
    }
}

impl BasisState for CoupledBasisState {
    fn J(&self) -> u32 { self.J }

    fn electronic(&self) -> Electronic { self.electronic }

    fn quantum_number(&self, qn: QuantumNumber) -> Option<f64> {
        match qn {
            QuantumNumber::J => Some(f64::from(self.J)),
            QuantumNumber::F1 => Some(self.F1.f()),
            QuantumNumber::F => Some(self.F.f()),
            QuantumNumber::mF => Some(self.mF.f()),
            QuantumNumber::Omega => Some(f64::from(self.Omega)),
            QuantumNumber::P => Some(self.P.sign()),
            _ => None,
        }
    }

    fn dipole_element(&self, ket: &Self, pol: &Polarization) -> C64 {
        if self.I1 != ket.I1 || self.I2 != ket.I2 { return C64::zero(); }
        let angular = tensor_angular(
            self.F.halves(), self.mF.halves(), ket.F.halves(), ket.mF.halves(), pol);
        if angular == C64::zero() { return C64::zero(); }
        let bra_comps = omega_components(self.J, self.Omega, self.P);
        let ket_comps = omega_components(ket.J, ket.Omega, ket.P);
        let mut reduced = 0.0;
        for &(tw, a) in bra_comps.iter() {
            for &(twp, b) in ket_comps.iter() {
                reduced += a * b * self.reduced_element(tw, ket, twp);
            }
        }
        angular * reduced
    }
}

impl fmt::Display for CoupledBasisState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "|{:?}, J = {}, F₁ = {}, F = {}, mF = {}, I₁ = {}, I₂ = {}, P = {}, Ω = {}⟩",
            self.electronic,
            self.J,
            frac(self.F1.halves().into()),
            frac(self.F.halves().into()),
            frac(self.mF.halves().into()),
            frac(self.I1.halves().into()),
            frac(self.I2.halves().into()),
            parity_char(self.P),
            self.Omega,
        )
    }
}

fn manifold_parities(electronic: Electronic, J: u32, selector: &QuantumSelector)
    -> Vec<Parity>
{
    match electronic {
        Electronic::X => vec![Parity::from_power(J)],
        Electronic::B => match selector.P {
            Some(P) => vec![P],
            None => vec![Parity::Plus, Parity::Minus],
        },
    }
}

fn manifolds(selector: &QuantumSelector) -> Vec<Electronic> {
    match selector.electronic {
        Some(el) => vec![el],
        None => vec![Electronic::X, Electronic::B],
    }
}

fn J_bounds(selector: &QuantumSelector) -> ObeResult<std::ops::RangeInclusive<u32>> {
    selector.J_span()
        .ok_or_else(|| ObeError::InvalidConfig(
            "quantum selector must restrict J to a finite, non-empty range".into()
        ))
}

/// Minimum rotational quantum number of an electronic manifold.
pub fn min_J(electronic: Electronic) -> u32 {
    match electronic {
        Electronic::X => 0,
        Electronic::B => 1,
    }
}

/// Enumerate all coupled basis states matching `selector`.
///
/// The ground manifold has `Ω = 0` and `P = (-1)^J`; the excited manifold has
/// `|Ω| = 1` and both parities. States are ordered by manifold, then `J`, `F₁`,
/// `F`, `mF`, and parity, all ascending.
pub fn generate_coupled_states(selector: &QuantumSelector)
    -> ObeResult<Vec<CoupledBasisState>>
{
    let J_span = J_bounds(selector)?;
    let mut states: Vec<CoupledBasisState> = Vec::new();
    for electronic in manifolds(selector) {
        let Omega = match electronic {
            Electronic::X => 0,
            Electronic::B => 1,
        };
        for J in J_span.clone().filter(|J| *J >= min_J(electronic)) {
            let J_t = SpinTotal::integer(J);
            for F1 in J_t.couple(I_TL) {
                for F in F1.couple(I_F) {
                    for mF in F.projections() {
                        for P in manifold_parities(electronic, J, selector) {
                            let s = CoupledBasisState {
                                J, F1, F, mF, I1: I_TL, I2: I_F, Omega, P,
                                electronic,
                            };
                            if selector.matches(&s) { states.push(s); }
                        }
                    }
                }
            }
        }
    }
    Ok(states)
}

/* Uncoupled basis ************************************************************/

/// `|J, mJ, I₁, m₁, I₂, m₂, Ω, P, el⟩`.
///
/// `Omega` holds `|Ω|`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UncoupledBasisState {
    pub J: u32,
    pub mJ: i32,
    pub I1: SpinTotal,
    pub m1: SpinProj,
    pub I2: SpinTotal,
    pub m2: SpinProj,
    pub Omega: u32,
    pub P: Parity,
    pub electronic: Electronic,
}

impl BasisState for UncoupledBasisState {
    fn J(&self) -> u32 { self.J }

    fn electronic(&self) -> Electronic { self.electronic }

    fn quantum_number(&self, qn: QuantumNumber) -> Option<f64> {
        match qn {
            QuantumNumber::J => Some(f64::from(self.J)),
            QuantumNumber::mJ => Some(f64::from(self.mJ)),
            QuantumNumber::m1 => Some(self.m1.f()),
            QuantumNumber::m2 => Some(self.m2.f()),
            QuantumNumber::Omega => Some(f64::from(self.Omega)),
            QuantumNumber::P => Some(self.P.sign()),
            _ => None,
        }
    }

    fn dipole_element(&self, ket: &Self, pol: &Polarization) -> C64 {
        if self.I1 != ket.I1 || self.m1 != ket.m1
            || self.I2 != ket.I2 || self.m2 != ket.m2
        {
            return C64::zero();
        }
        let tJ = 2 * self.J;
        let tJp = 2 * ket.J;
        let angular = tensor_angular(tJ, 2 * self.mJ, tJp, 2 * ket.mJ, pol);
        if angular == C64::zero() { return C64::zero(); }
        let mut reduced = 0.0;
        for (tw, a) in omega_components(self.J, self.Omega, self.P) {
            for (twp, b) in omega_components(ket.J, ket.Omega, ket.P) {
                reduced += a * b * rotational_factor(tJ, tw, tJp, twp);
            }
        }
        angular * reduced
    }
}

impl fmt::Display for UncoupledBasisState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "|{:?}, J = {}, mJ = {}, I₁ = {}, m₁ = {}, I₂ = {}, m₂ = {}, P = {}, Ω = {}⟩",
            self.electronic,
            self.J,
            self.mJ,
            frac(self.I1.halves().into()),
            frac(self.m1.halves().into()),
            frac(self.I2.halves().into()),
            frac(self.m2.halves().into()),
            parity_char(self.P),
            self.Omega,
        )
    }
}

/// Enumerate all uncoupled basis states matching `selector`, with the same
/// manifold conventions as [`generate_coupled_states`].
pub fn generate_uncoupled_states(selector: &QuantumSelector)
    -> ObeResult<Vec<UncoupledBasisState>>
{
    let J_span = J_bounds(selector)?;
    let mut states: Vec<UncoupledBasisState> = Vec::new();
    for electronic in manifolds(selector) {
        let Omega = match electronic {
            Electronic::X => 0,
            Electronic::B => 1,
        };
        for J in J_span.clone().filter(|J| *J >= min_J(electronic)) {
            let J_i = J as i32;
            for mJ in -J_i..=J_i {
                for m1 in I_TL.projections() {
                    for m2 in I_F.projections() {
                        for P in manifold_parities(electronic, J, selector) {
                            let s = UncoupledBasisState {
                                J, mJ, I1: I_TL, m1, I2: I_F, m2, Omega, P,
                                electronic,
                            };
                            if selector.matches(&s) { states.push(s); }
                        }
                    }
                }
            }
        }
    }
    Ok(states)
}

/// Electric dipole matrix element `⟨bra| d·ε |ket⟩` between two
/// superpositions, optionally normalizing the polarization first.
pub fn ed_me_mixed_state<S>(
    bra: &State<S>,
    ket: &State<S>,
    pol: &Polarization,
    normalize_pol: bool,
) -> C64
where S: BasisState
{
    let pol = if normalize_pol { pol.normalized() } else { *pol };
    bra.dipole_element(ket, &pol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hilbert::QnFilter;

    fn X_J(J: u32) -> QuantumSelector {
        QuantumSelector::new()
            .with_electronic(Electronic::X)
            .with_J(QnFilter::Exact(J.into()))
    }

    #[test]
    fn ground_manifold_sizes() {
        // 4(2J + 1) hyperfine sublevels per J
        for J in 0..4 {
            let states = generate_coupled_states(&X_J(J)).unwrap();
            assert_eq!(states.len(), 4 * (2 * J as usize + 1));
            assert!(states.iter().all(|s| s.P == Parity::from_power(J)));
            let unc = generate_uncoupled_states(&X_J(J)).unwrap();
            assert_eq!(unc.len(), states.len());
        }
    }

    #[test]
    fn excited_manifold_has_both_parities() {
        let sel = QuantumSelector::new()
            .with_electronic(Electronic::B)
            .with_J(QnFilter::Among(vec![0.0, 1.0]));
        let states = generate_coupled_states(&sel).unwrap();
        assert_eq!(states.len(), 2 * 12);
        assert!(states.iter().all(|s| s.J == 1 && s.Omega == 1));
    }

    #[test]
    fn unbounded_J_is_rejected() {
        assert!(generate_coupled_states(&QuantumSelector::new()).is_err());
    }

    #[test]
    fn dipole_connects_opposite_parity_only() {
        let g = CoupledBasisState::X(1, 1.5, 1.0, 0.0).unwrap();
        let e_plus = CoupledBasisState::B(1, 1.5, 1.0, 0.0, Parity::Plus).unwrap();
        let e_minus = CoupledBasisState::B(1, 1.5, 1.0, 0.0, Parity::Minus).unwrap();
        let z = Polarization::Z;
        // g has P = -1
        assert!(e_minus.dipole_element(&g, &z).norm() < 1e-12);
        // ΔF = 0, ΔmF = 0 is forbidden for mF = 0; use F' = 2 instead
        let e_F2 = CoupledBasisState::B(1, 1.5, 2.0, 0.0, Parity::Plus).unwrap();
        assert!(e_F2.dipole_element(&g, &z).norm() > 1e-3);
        assert!(e_plus.dipole_element(&g, &z).norm() < 1e-12);
    }

    #[test]
    fn sigma_plus_raises_mF() {
        let g = CoupledBasisState::X(1, 1.5, 2.0, 0.0).unwrap();
        let e_up = CoupledBasisState::B(1, 1.5, 2.0, 1.0, Parity::Plus).unwrap();
        let e_down = CoupledBasisState::B(1, 1.5, 2.0, -1.0, Parity::Plus).unwrap();
        let sp = Polarization::sigma_plus();
        assert!(e_up.dipole_element(&g, &sp).norm() > 1e-3);
        assert!(e_down.dipole_element(&g, &sp).norm() < 1e-12);
    }

    #[test]
    fn dipole_is_hermitian() {
        let g = CoupledBasisState::X(1, 1.5, 1.0, 0.0).unwrap();
        let e = CoupledBasisState::B(1, 1.5, 2.0, 1.0, Parity::Plus).unwrap();
        let pol = Polarization::new(0.3, 0.0, 0.9);
        let a = e.dipole_element(&g, &pol);
        let b = g.dipole_element(&e, &pol);
        assert!(a.norm() > 1e-3);
        assert!((a - b.conj()).norm() < 1e-12);

        let sp = Polarization::sigma_plus();
        let sp_conj = Polarization(sp.0.map(|c| c.conj()));
        let a = e.dipole_element(&g, &sp);
        let b = g.dipole_element(&e, &sp_conj);
        assert!(a.norm() > 1e-3);
        assert!((a - b.conj()).norm() < 1e-12);
    }

    #[test]
    fn decay_strength_sums_to_one_within_closed_J() {
        // B(J = 1) decays only to X(J = 0, 2) for P = -1 and X(J = 1) for P = +1
        let ground = generate_coupled_states(
            &QuantumSelector::new()
                .with_electronic(Electronic::X)
                .with_J(QnFilter::Range { min: 0.0, max: 2.0 })
        ).unwrap();
        let excited = generate_coupled_states(
            &QuantumSelector::new()
                .with_electronic(Electronic::B)
                .with_J(QnFilter::Exact(1.0))
        ).unwrap();
        for e in excited.iter() {
            let total: f64 = ground.iter()
                .flat_map(|g| {
                    [Polarization::X, Polarization::Y, Polarization::Z]
                        .map(|p| g.dipole_element(e, &p).norm_sqr())
                })
                .sum();
            assert!((total - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn mixed_state_element_is_linear() {
        let g = State::from_basis(CoupledBasisState::X(1, 1.5, 2.0, 0.0).unwrap());
        let e1 = CoupledBasisState::B(1, 1.5, 2.0, 0.0, Parity::Plus).unwrap();
        let e2 = CoupledBasisState::B(2, 2.5, 2.0, 0.0, Parity::Plus).unwrap();
        let e = (State::from_basis(e1) + State::from_basis(e2)).normalized();
        let z = Polarization::Z;
        let sum = (e1.dipole_element(&g.largest_component().copied().unwrap(), &z)
            + e2.dipole_element(&g.largest_component().copied().unwrap(), &z))
            * FRAC_1_SQRT_2;
        assert!((ed_me_mixed_state(&e, &g, &z, true) - sum).norm() < 1e-12);
    }
}
