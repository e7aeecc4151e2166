//! Reduced molecular Hamiltonians over a finite set of exact eigenstates.
//!
//! Molecular constants are not tabulated here; they are supplied through a
//! [`MolecularModel`], of which [`EffectiveRotor`] is a simple example.

use std::ops::{ Range, RangeInclusive };
use indexmap::IndexSet;
use ndarray as nd;
use ndarray_linalg::{ EighInto, UPLO };
use num_complex::Complex64 as C64;
use num_traits::Zero;
use serde::{ Deserialize, Serialize };
use tracing::{ debug, warn };
use crate::{
    error::{ ObeError, ObeResult },
    hilbert::{ BasisState, Electronic, QnFilter, QuantumSelector, State },
    molecule::{ self, CoupledBasisState, generate_coupled_states },
};

/// Describes the molecular Hamiltonian of one coupling scheme.
pub trait MolecularModel {
    type State: BasisState;

    /// Generate all basis states of an electronic manifold over a range of `J`.
    fn basis(&self, electronic: Electronic, J: RangeInclusive<u32>)
        -> ObeResult<Vec<Self::State>>;

    /// Hamiltonian matrix element `⟨bra|H|ket⟩`, including any static fields.
    fn element(&self, bra: &Self::State, ket: &Self::State) -> C64;

    /// Matrix element of the field-free Hamiltonian whose eigenbasis is used
    /// as a reference.
    fn field_free_element(&self, bra: &Self::State, ket: &Self::State) -> C64 {
        self.element(bra, ket)
    }

    /// Minimum rotational quantum number of a manifold.
    fn min_J(&self, electronic: Electronic) -> u32 { molecule::min_J(electronic) }
}

/// Effective constants for one electronic manifold, all in the same angular
/// frequency units.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifoldConstants {
    /// Electronic energy offset.
    pub offset: f64,
    /// Rotational constant.
    pub B_rot: f64,
    /// Centrifugal distortion.
    pub D_rot: f64,
    /// Tl nuclear spin-rotation constant.
    pub c_sr: f64,
    /// Effective Zeeman shift per unit field per unit `mF`.
    pub g_F: f64,
    /// `ΔJ = ±1` mixing between states of equal `F₁`, `F`, `mF`, and parity.
    pub mixing: f64,
}

/// Effective rotor model of TlF in the coupled basis, with a static magnetic
/// field along the quantization axis.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectiveRotor {
    pub X: ManifoldConstants,
    pub B: ManifoldConstants,
    pub field: f64,
}

impl EffectiveRotor {
    pub fn new(X: ManifoldConstants, B: ManifoldConstants) -> Self {
        Self { X, B, field: 0.0 }
    }

    pub fn with_field(mut self, field: f64) -> Self {
        self.field = field;
        self
    }

    fn constants(&self, electronic: Electronic) -> &ManifoldConstants {
        match electronic {
            Electronic::X => &self.X,
            Electronic::B => &self.B,
        }
    }

    fn do_element(
        &self,
        bra: &CoupledBasisState,
        ket: &CoupledBasisState,
        zeeman: bool,
    ) -> C64
    {
        if bra.electronic != ket.electronic
            || bra.F1 != ket.F1
            || bra.F != ket.F
            || bra.mF != ket.mF
            || bra.P != ket.P
            || bra.Omega != ket.Omega
        {
            return C64::zero();
        }
        let k = self.constants(bra.electronic);
        if bra.J == ket.J {
            let JJ = f64::from(bra.J * (bra.J + 1));
            let F1 = bra.F1.f();
            let I1 = bra.I1.f();
            let sr = 0.5 * k.c_sr * (F1 * (F1 + 1.0) - JJ - I1 * (I1 + 1.0));
            let zm = if zeeman { k.g_F * self.field * bra.mF.f() } else { 0.0 };
            (k.offset + k.B_rot * JJ - k.D_rot * JJ.powi(2) + sr + zm).into()
        } else if bra.J.abs_diff(ket.J) == 1 {
            k.mixing.into()
        } else {
            C64::zero()
        }
    }
}

impl MolecularModel for EffectiveRotor {
    type State = CoupledBasisState;

    fn basis(&self, electronic: Electronic, J: RangeInclusive<u32>)
        -> ObeResult<Vec<CoupledBasisState>>
    {
        let selector = QuantumSelector::new()
            .with_electronic(electronic)
            .with_J(QnFilter::Range {
                min: f64::from(*J.start()),
                max: f64::from(*J.end()),
            });
        generate_coupled_states(&selector)
    }

    fn element(&self, bra: &CoupledBasisState, ket: &CoupledBasisState) -> C64 {
        self.do_element(bra, ket, true)
    }

    fn field_free_element(
        &self,
        bra: &CoupledBasisState,
        ket: &CoupledBasisState,
    ) -> C64
    {
        self.do_element(bra, ket, false)
    }
}

/// Optional bounds on the rotational window of the excited manifold.
///
/// Unset bounds default to one below the smallest and one above the largest
/// `J` of the requested excited states, clamped to the manifold minimum.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JWindow {
    pub Jmin: Option<u32>,
    pub Jmax: Option<u32>,
}

/// Block-diagonal Hamiltonian over a set of exact eigenstates.
#[derive(Clone, Debug)]
pub struct ReducedHamiltonian<S>
where S: BasisState
{
    pub ground: Vec<State<S>>,
    pub excited: Vec<State<S>>,
    /// `ground` followed by `excited`.
    pub QN: Vec<State<S>>,
    pub H_int: nd::Array2<C64>,
    /// Columns are the field-free eigenstates, expressed in `QN`.
    pub V_ref_int: nd::Array2<C64>,
}

impl<S> ReducedHamiltonian<S>
where S: BasisState
{
    /// Field-free reference states `Σ_i V_ref[i, j] QN[i]`.
    pub fn reference_states(&self) -> Vec<State<S>> {
        self.V_ref_int.columns().into_iter()
            .map(|col| {
                col.iter().zip(self.QN.iter())
                    .fold(State::new(), |acc, (v, s)| acc + s.clone() * *v)
            })
            .collect()
    }
}

/// Assemble a block-diagonal matrix.
pub fn block_diag(blocks: &[&nd::Array2<C64>]) -> nd::Array2<C64> {
    let n: usize = blocks.iter().map(|b| b.nrows()).sum();
    let m: usize = blocks.iter().map(|b| b.ncols()).sum();
    let mut out: nd::Array2<C64> = nd::Array2::zeros((n, m));
    let (mut i0, mut j0) = (0, 0);
    for b in blocks.iter() {
        out.slice_mut(nd::s![i0..i0 + b.nrows(), j0..j0 + b.ncols()]).assign(b);
        i0 += b.nrows();
        j0 += b.ncols();
    }
    out
}

/// Group ascending eigenvalues into numerically degenerate clusters.
fn eigen_clusters(E: &nd::Array1<f64>) -> Vec<Range<usize>> {
    let scale = E.iter().fold(0.0_f64, |acc, e| acc.max(e.abs())).max(1.0);
    let tol = 1e-10 * scale;
    let mut clusters: Vec<Range<usize>> = Vec::new();
    let mut start = 0;
    for k in 1..=E.len() {
        if k == E.len() || E[k] - E[k - 1] > tol {
            clusters.push(start..k);
            start = k;
        }
    }
    clusters
}

/// Diagonalize a Hermitian matrix after removing its mean diagonal for
/// precision.
fn eigh_shifted(H: &nd::Array2<C64>) -> ObeResult<(nd::Array1<f64>, nd::Array2<C64>)> {
    let n = H.nrows();
    let shift: f64
        = if n == 0 { 0.0 } else { H.diag().iter().map(|h| h.re).sum::<f64>() / n as f64 };
    let mut Hs = H.clone();
    Hs.diag_mut().iter_mut().for_each(|h| { *h -= shift; });
    let (E, V) = Hs.eigh_into(UPLO::Lower)?;
    Ok((E.mapv(|e| e + shift), V))
}

/// For each target vector, find the eigenvector of `(E, V)` closest to it.
///
/// Within a degenerate cluster, the selected vector is the normalized
/// projection of the target onto the cluster, orthogonalized against vectors
/// already selected from the same cluster, with its phase fixed such that its
/// overlap with the target is real and positive. Returns the selected vectors
/// as columns alongside their eigenvalues.
fn match_eigenvectors(
    E: &nd::Array1<f64>,
    V: &nd::Array2<C64>,
    targets: &[nd::Array1<C64>],
    labels: &[String],
) -> ObeResult<(nd::Array1<f64>, nd::Array2<C64>)>
{
    let clusters = eigen_clusters(E);
    let mut chosen: Vec<Vec<nd::Array1<C64>>> = vec![Vec::new(); clusters.len()];
    let mut out_E: nd::Array1<f64> = nd::Array1::zeros(targets.len());
    let mut out_V: nd::Array2<C64> = nd::Array2::zeros((V.nrows(), targets.len()));
    for (col, (a, label)) in targets.iter().zip(labels).enumerate() {
        let overlaps: nd::Array1<C64> = V.t().mapv(|v| v.conj()).dot(a);
        let best
            = clusters.iter().enumerate()
            .filter(|(c, r)| chosen[*c].len() < r.len())
            .map(|(c, r)| {
                let w: f64 = overlaps.slice(nd::s![r.clone()])
                    .iter().map(|x| x.norm_sqr()).sum();
                (c, w)
            })
            .fold(None, |acc: Option<(usize, f64)>, (c, w)| {
                match acc {
                    Some((_, wb)) if wb >= w => acc,
                    _ => Some((c, w)),
                }
            });
        let Some((c, w)) = best else {
            return Err(ObeError::StateNotFound(label.clone()));
        };
        if w < 1e-12 { return Err(ObeError::StateNotFound(label.clone())); }
        let r = clusters[c].clone();
        let mut v: nd::Array1<C64>
            = V.slice(nd::s![.., r.clone()])
            .dot(&overlaps.slice(nd::s![r.clone()]));
        for u in chosen[c].iter() {
            let proj: C64 = u.iter().zip(v.iter()).map(|(x, y)| x.conj() * y).sum();
            v = v - u * proj;
        }
        let norm = v.iter().map(|x| x.norm_sqr()).sum::<f64>().sqrt();
        if norm < 1e-9 { return Err(ObeError::StateNotFound(label.clone())); }
        v /= C64::from(norm);
        let ov: C64 = a.iter().zip(v.iter()).map(|(x, y)| x.conj() * y).sum();
        if ov.norm() > 0.0 { v *= ov.conj() / ov.norm(); }
        out_E[col] = E.slice(nd::s![r]).mean().unwrap_or(0.0);
        out_V.column_mut(col).assign(&v);
        chosen[c].push(v);
    }
    Ok((out_E, out_V))
}

struct ReducedManifold<S>
where S: BasisState
{
    states: Vec<State<S>>,
    H: nd::Array2<C64>,
    V_ref: nd::Array2<C64>,
}

fn reduce_manifold<M>(
    model: &M,
    approx: &[State<M::State>],
    J_range: RangeInclusive<u32>,
    rtol: Option<f64>,
) -> ObeResult<ReducedManifold<M::State>>
where M: MolecularModel
{
    let electronic
        = match approx.iter().find_map(|s| s.largest_component()) {
            Some(s) => s.electronic(),
            None => {
                return Ok(ReducedManifold {
                    states: Vec::new(),
                    H: nd::Array2::zeros((0, 0)),
                    V_ref: nd::Array2::zeros((0, 0)),
                });
            },
        };
    let basis: IndexSet<M::State>
        = model.basis(electronic, J_range.clone())?.into_iter().collect();
    let n = basis.len();
    debug!(
        "reduce_manifold: {:?} manifold, J in {:?}, {} basis states",
        electronic, J_range, n,
    );

    let H: nd::Array2<C64>
        = nd::Array2::from_shape_fn((n, n), |(i, j)| {
            model.element(&basis[i], &basis[j])
        });
    let (E, V) = eigh_shifted(&H)?;

    let mut targets: Vec<nd::Array1<C64>> = Vec::with_capacity(approx.len());
    let mut labels: Vec<String> = Vec::with_capacity(approx.len());
    for state in approx.iter() {
        let mut a: nd::Array1<C64> = nd::Array1::zeros(n);
        for (s, amp) in state.iter() {
            match basis.get_index_of(s) {
                Some(k) => { a[k] += *amp; },
                None => {
                    warn!("reduce_manifold: component {:?} lies outside the J window", s);
                },
            }
        }
        targets.push(a);
        labels.push(state.to_string());
    }
    let (_, X) = match_eigenvectors(&E, &V, &targets, &labels)?;

    // express the exact states in the basis, pruning small components
    let mut states: Vec<State<M::State>> = Vec::with_capacity(approx.len());
    let mut X_pruned: nd::Array2<C64> = nd::Array2::zeros(X.raw_dim());
    for (j, col) in X.columns().into_iter().enumerate() {
        let mut state: State<M::State>
            = col.iter().zip(basis.iter())
            .filter(|(a, _)| a.norm_sqr() > 0.0)
            .map(|(a, s)| (s.clone(), *a))
            .collect();
        if let Some(tol) = rtol {
            state = state.remove_small_components(tol).normalized();
        }
        for (s, a) in state.iter() {
            if let Some(k) = basis.get_index_of(s) { X_pruned[[k, j]] = *a; }
        }
        states.push(state);
    }

    let Xh = X_pruned.t().mapv(|x| x.conj());
    let H_red = Xh.dot(&H).dot(&X_pruned);

    let H_ff: nd::Array2<C64>
        = nd::Array2::from_shape_fn((n, n), |(i, j)| {
            model.field_free_element(&basis[i], &basis[j])
        });
    let H_ff_red = Xh.dot(&H_ff).dot(&X_pruned);
    let m = states.len();
    let (E_ff, V_ff) = eigh_shifted(&H_ff_red)?;
    let unit: Vec<nd::Array1<C64>>
        = (0..m)
        .map(|i| {
            let mut e: nd::Array1<C64> = nd::Array1::zeros(m);
            e[i] = C64::from(1.0);
            e
        })
        .collect();
    let unit_labels: Vec<String>
        = states.iter().map(|s| s.to_string()).collect();
    let (_, V_ref) = match_eigenvectors(&E_ff, &V_ff, &unit, &unit_labels)?;

    Ok(ReducedManifold { states, H: H_red, V_ref })
}

fn J_span<S>(states: &[State<S>]) -> Option<(u32, u32)>
where S: BasisState
{
    states.iter()
        .flat_map(|s| s.keys().map(|b| b.J()))
        .fold(None, |acc, J| match acc {
            None => Some((J, J)),
            Some((lo, hi)) => Some((lo.min(J), hi.max(J))),
        })
}

/// Build the reduced Hamiltonian over the exact eigenstates closest to the
/// given approximate ground and excited states.
///
/// Each manifold is diagonalized separately; the ground manifold over the `J`
/// span of the ground states and the excited manifold over `window`. With
/// `rtol`, components of the exact states with squared amplitude below `rtol`
/// are removed.
pub fn generate_total_reduced_hamiltonian<M>(
    model: &M,
    ground_approx: &[State<M::State>],
    excited_approx: &[State<M::State>],
    window: JWindow,
    rtol: Option<f64>,
) -> ObeResult<ReducedHamiltonian<M::State>>
where M: MolecularModel
{
    let ground_range
        = J_span(ground_approx).map(|(lo, hi)| lo..=hi).unwrap_or(0..=0);
    let excited_range
        = match J_span(excited_approx) {
            Some((lo, hi)) => {
                let el = excited_approx.iter()
                    .find_map(|s| s.largest_component())
                    .map(|s| s.electronic())
                    .unwrap_or(Electronic::B);
                let floor = model.min_J(el);
                let Jmin = window.Jmin.unwrap_or(lo.saturating_sub(1)).max(floor);
                let Jmax = window.Jmax.unwrap_or(hi + 1).max(Jmin);
                Jmin..=Jmax
            },
            None => 0..=0,
        };
    let ground = reduce_manifold(model, ground_approx, ground_range, rtol)?;
    let excited = reduce_manifold(model, excited_approx, excited_range, rtol)?;
    let H_int = block_diag(&[&ground.H, &excited.H]);
    let V_ref_int = block_diag(&[&ground.V_ref, &excited.V_ref]);
    let QN: Vec<State<M::State>>
        = ground.states.iter().chain(excited.states.iter()).cloned().collect();
    Ok(ReducedHamiltonian {
        ground: ground.states,
        excited: excited.states,
        QN,
        H_int,
        V_ref_int,
    })
}

/// Find the index of the state in `QN` with the largest overlap with `state`.
pub fn find_state_index<S>(QN: &[State<S>], state: &State<S>) -> ObeResult<usize>
where S: BasisState
{
    QN.iter().enumerate()
        .map(|(k, q)| (k, q.inner(state).norm_sqr()))
        .filter(|(_, w)| *w > 1e-12)
        .fold(None, |acc: Option<(usize, f64)>, (k, w)| match acc {
            Some((_, wb)) if wb >= w => acc,
            _ => Some((k, w)),
        })
        .map(|(k, _)| k)
        .ok_or_else(|| ObeError::StateNotFound(state.to_string()))
}

/// Find the indices of several states in `QN`; see [`find_state_index`].
pub fn find_state_indices<S>(QN: &[State<S>], states: &[State<S>])
    -> ObeResult<Vec<usize>>
where S: BasisState
{
    states.iter().map(|s| find_state_index(QN, s)).collect()
}
