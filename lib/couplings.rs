//! Laser couplings and spontaneous decay between exact molecular eigenstates.

use itertools::Itertools;
use ndarray as nd;
use num_complex::Complex64 as C64;
use num_traits::Zero;
use tracing::{ debug, warn };
use crate::{
    error::{ ObeError, ObeResult },
    hamiltonian::{ find_state_index, find_state_indices },
    hilbert::{ BasisState, Polarization, QuantumSelector, State },
    lindblad::compact::Compaction,
    molecule::ed_me_mixed_state,
};

/// Describes one laser-driven transition between two sets of states.
#[derive(Clone, Debug)]
pub struct TransitionSelector<S>
where S: BasisState
{
    /// Approximate ground states addressed by the laser.
    pub ground: Vec<State<S>>,
    /// Approximate excited states addressed by the laser.
    pub excited: Vec<State<S>>,
    /// Polarizations of the drive; the first one defines the main coupling.
    pub polarizations: Vec<Polarization>,
    /// One symbol per polarization weighting its field, e.g. for polarization
    /// switching. May be empty, in which case every weight is 1.
    pub polarization_symbols: Vec<String>,
    /// Rabi rate symbol.
    pub rabi: String,
    /// Detuning symbol.
    pub detuning: String,
    pub ground_main: Option<State<S>>,
    pub excited_main: Option<State<S>>,
    pub description: Option<String>,
}

impl<S> TransitionSelector<S>
where S: BasisState
{
    /// Create a new transition driven with `ẑ` polarization.
    pub fn new<R, D>(
        ground: Vec<State<S>>,
        excited: Vec<State<S>>,
        rabi: R,
        detuning: D,
    ) -> Self
    where
        R: Into<String>,
        D: Into<String>,
    {
        Self {
            ground,
            excited,
            polarizations: vec![Polarization::Z],
            polarization_symbols: Vec::new(),
            rabi: rabi.into(),
            detuning: detuning.into(),
            ground_main: None,
            excited_main: None,
            description: None,
        }
    }

    /// Set the polarizations and their weighting symbols.
    pub fn with_polarizations<I, T>(mut self, polarizations: Vec<Polarization>, symbols: I)
        -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.polarizations = polarizations;
        self.polarization_symbols = symbols.into_iter().map(Into::into).collect();
        self
    }

    /// Fix the pair of states whose coupling defines the Rabi rate.
    pub fn with_main(mut self, ground_main: State<S>, excited_main: State<S>) -> Self {
        self.ground_main = Some(ground_main);
        self.excited_main = Some(excited_main);
        self
    }

    pub fn with_description<T>(mut self, description: T) -> Self
    where T: Into<String>
    {
        self.description = Some(description.into());
        self
    }

    /// Human-readable name for error messages.
    pub fn label(&self) -> String {
        self.description.clone()
            .unwrap_or_else(|| format!("({}, {})", self.rabi, self.detuning))
    }

    /// All symbols the transition expects to be defined as parameters.
    pub fn symbols(&self) -> Vec<&str> {
        [self.rabi.as_str(), self.detuning.as_str()].into_iter()
            .chain(self.polarization_symbols.iter().map(String::as_str))
            .collect()
    }

    /// Check internal consistency.
    pub fn validate(&self) -> ObeResult<()> {
        if self.polarizations.is_empty() {
            return Err(ObeError::InvalidConfig(
                format!("transition {} has no polarizations", self.label())));
        }
        if !self.polarization_symbols.is_empty()
            && self.polarization_symbols.len() != self.polarizations.len()
        {
            return Err(ObeError::InvalidConfig(format!(
                "transition {} has {} polarizations but {} polarization symbols",
                self.label(),
                self.polarizations.len(),
                self.polarization_symbols.len(),
            )));
        }
        if self.ground_main.is_some() != self.excited_main.is_some() {
            return Err(ObeError::InvalidConfig(format!(
                "transition {} must set both main states or neither",
                self.label(),
            )));
        }
        Ok(())
    }
}

/// Coupling matrix for a single polarization.
#[derive(Clone, Debug, PartialEq)]
pub struct PolarizationField {
    pub polarization: Polarization,
    pub field: nd::Array2<C64>,
}

/// Coupling matrices of one transition over the full system.
///
/// All indices refer to the system basis the field was generated for.
#[derive(Clone, Debug, PartialEq)]
pub struct CouplingField {
    pub ground_main: usize,
    pub excited_main: usize,
    /// `⟨e_main| d·ε_main |g_main⟩`.
    pub main_coupling: C64,
    pub ground_states: Vec<usize>,
    pub excited_states: Vec<usize>,
    pub fields: Vec<PolarizationField>,
}

/// Thresholds applied when generating coupling fields.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CouplingOptions {
    /// Entries smaller than this fraction of the main coupling are zeroed.
    pub relative_coupling: f64,
    /// Entries smaller than this are zeroed.
    pub absolute_coupling: f64,
    pub normalize_pol: bool,
}

impl Default for CouplingOptions {
    fn default() -> Self {
        Self {
            relative_coupling: 1e-3,
            absolute_coupling: 1e-6,
            normalize_pol: true,
        }
    }
}

fn coupling_matrix<S>(
    QN: &[State<S>],
    ground: &[usize],
    excited: &[usize],
    pol: &Polarization,
    normalize_pol: bool,
) -> nd::Array2<C64>
where S: BasisState
{
    let n = QN.len();
    let mut H: nd::Array2<C64> = nd::Array2::zeros((n, n));
    for (&e, &g) in excited.iter().cartesian_product(ground.iter()) {
        let me = ed_me_mixed_state(&QN[e], &QN[g], pol, normalize_pol);
        if me == C64::zero() { continue; }
        H[[e, g]] += me;
        H[[g, e]] += me.conj();
    }
    H
}

/// Generate the coupling fields of a transition with fixed main states.
///
/// One matrix is produced per polarization. The matrices are computed between
/// the states of `QN`, then expressed in the field-free reference basis
/// `V_ref† H V_ref`, and finally entries below either threshold in `options`
/// are zeroed.
#[allow(clippy::too_many_arguments)]
pub fn generate_coupling_field<S>(
    ground_main: &State<S>,
    excited_main: &State<S>,
    ground: &[State<S>],
    excited: &[State<S>],
    QN: &[State<S>],
    V_ref: &nd::Array2<C64>,
    polarizations: &[Polarization],
    pol_main: &Polarization,
    options: CouplingOptions,
) -> ObeResult<CouplingField>
where S: BasisState
{
    let ground_states = find_state_indices(QN, ground)?;
    let excited_states = find_state_indices(QN, excited)?;
    let g_main = find_state_index(QN, ground_main)?;
    let e_main = find_state_index(QN, excited_main)?;
    let label = format!("{} -> {}", QN[g_main], QN[e_main]);
    let main_coupling
        = ed_me_mixed_state(&QN[e_main], &QN[g_main], pol_main, options.normalize_pol);
    if main_coupling.norm() < 1e-12 {
        return Err(ObeError::DisconnectedCoupling(
            format!("{label}: main coupling vanishes")));
    }
    let V_ref_h = V_ref.t().mapv(|v| v.conj());
    let threshold
        = (options.relative_coupling * main_coupling.norm())
        .max(options.absolute_coupling);
    let mut fields: Vec<PolarizationField> = Vec::with_capacity(polarizations.len());
    for pol in polarizations.iter() {
        let H = coupling_matrix(
            QN, &ground_states, &excited_states, pol, options.normalize_pol);
        let mut field = V_ref_h.dot(&H).dot(V_ref);
        let mut dropped: usize = 0;
        field.mapv_inplace(|x| {
            if x != C64::zero() && x.norm() < threshold {
                dropped += 1;
                C64::zero()
            } else {
                x
            }
        });
        if dropped > 0 {
            debug!("generate_coupling_field: {label}: zeroed {dropped} small entries");
        }
        fields.push(PolarizationField { polarization: *pol, field });
    }
    if fields.iter().all(|f| f.field.iter().all(|x| *x == C64::zero())) {
        return Err(ObeError::DisconnectedCoupling(label));
    }
    Ok(CouplingField {
        ground_main: g_main,
        excited_main: e_main,
        main_coupling,
        ground_states,
        excited_states,
        fields,
    })
}

/// Like [`generate_coupling_field`], but choose the main pair as the one with
/// the largest coupling under the first polarization.
pub fn generate_coupling_field_automatic<S>(
    ground: &[State<S>],
    excited: &[State<S>],
    QN: &[State<S>],
    V_ref: &nd::Array2<C64>,
    polarizations: &[Polarization],
    options: CouplingOptions,
) -> ObeResult<CouplingField>
where S: BasisState
{
    let pol_main = polarizations.first()
        .ok_or_else(|| ObeError::InvalidConfig("no polarizations given".into()))?;
    let ground_idx = find_state_indices(QN, ground)?;
    let excited_idx = find_state_indices(QN, excited)?;
    let (g, e)
        = ground_idx.iter().enumerate()
        .cartesian_product(excited_idx.iter().enumerate())
        .map(|((kg, &g), (ke, &e))| {
            let me = ed_me_mixed_state(&QN[e], &QN[g], pol_main, options.normalize_pol);
            ((kg, ke), me.norm())
        })
        .fold(None, |acc: Option<((usize, usize), f64)>, (k, w)| match acc {
            Some((_, wb)) if wb >= w => acc,
            _ => Some((k, w)),
        })
        .filter(|(_, w)| *w >= 1e-12)
        .map(|(k, _)| k)
        .ok_or_else(|| ObeError::DisconnectedCoupling(
            "no ground/excited pair couples under the main polarization".into()
        ))?;
    generate_coupling_field(
        &ground[g], &excited[e], ground, excited, QN, V_ref,
        polarizations, pol_main, options,
    )
}

/// Build one jump operator `√(BR Γ) |g⟩⟨e|` per allowed spontaneous decay
/// from `excited` into `ground`.
///
/// Branching ratios are computed from the polarization-summed squared dipole
/// elements; those below `tol` are dropped and the remainder renormalized
/// over the given ground states, such that `Σ_k C_k† C_k` has `Γ` on the
/// diagonal of every excited state. With `qn_compact`, decays into the same
/// merged level are combined into a single operator.
pub fn collapse_matrices<S>(
    QN: &[State<S>],
    ground: &[State<S>],
    excited: &[State<S>],
    gamma: f64,
    tol: f64,
    qn_compact: Option<&[QuantumSelector]>,
) -> ObeResult<Vec<nd::Array2<C64>>>
where S: BasisState
{
    let n = QN.len();
    let ground_idx = find_state_indices(QN, ground)?;
    let excited_idx = find_state_indices(QN, excited)?;
    let pols = [Polarization::X, Polarization::Y, Polarization::Z];
    let mut C_array: Vec<nd::Array2<C64>> = Vec::new();
    for &e in excited_idx.iter() {
        let strengths: Vec<f64>
            = ground_idx.iter()
            .map(|&g| {
                pols.iter()
                    .map(|p| ed_me_mixed_state(&QN[g], &QN[e], p, false).norm_sqr())
                    .sum()
            })
            .collect();
        let total: f64 = strengths.iter().sum();
        if total <= 0.0 {
            return Err(ObeError::DisconnectedDecay(QN[e].to_string()));
        }
        let kept: Vec<(usize, f64)>
            = ground_idx.iter().zip(strengths.iter())
            .map(|(&g, w)| (g, w / total))
            .filter(|(_, br)| {
                let keep = *br > tol;
                if !keep && *br > 0.0 {
                    debug!("collapse_matrices: dropping branching ratio {br:.3e}");
                }
                keep
            })
            .collect();
        let kept_total: f64 = kept.iter().map(|(_, br)| br).sum();
        if kept.is_empty() || kept_total <= 0.0 {
            return Err(ObeError::DisconnectedDecay(QN[e].to_string()));
        }
        for (g, br) in kept.into_iter() {
            let mut C: nd::Array2<C64> = nd::Array2::zeros((n, n));
            C[[g, e]] = C64::from((br / kept_total * gamma).sqrt());
            C_array.push(C);
        }
    }
    match qn_compact {
        Some(selectors) => {
            let compaction = Compaction::from_selectors(QN, selectors);
            if compaction.is_trivial() {
                warn!("collapse_matrices: compaction selectors match nothing to merge");
            }
            Ok(compaction.collapse(&C_array))
        },
        None => Ok(C_array),
    }
}

/// An extra decay destination that is not part of the laser-coupled system,
/// e.g. a lumped level for decays into states outside the model.
#[derive(Clone, Debug)]
pub struct DecayChannel<S>
where S: BasisState
{
    /// The state decayed into.
    pub ground: State<S>,
    /// Selects the excited states that decay into `ground`.
    pub excited: QuantumSelector,
    /// Fraction of the total decay rate that goes into `ground`.
    pub branching: f64,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        hamiltonian::{
            JWindow,
            generate_total_reduced_hamiltonian,
            tests::{ B1_states, X1_states, test_model },
        },
        hilbert::{ Electronic, QnFilter },
    };

    fn system() -> crate::hamiltonian::ReducedHamiltonian<crate::molecule::CoupledBasisState> {
        generate_total_reduced_hamiltonian(
            &test_model(), &X1_states(), &B1_states(), JWindow::default(), Some(1e-6),
        ).unwrap()
    }

    #[test]
    fn coupling_field_is_hermitian_and_off_diagonal() {
        let red = system();
        let cf = generate_coupling_field_automatic(
            &red.ground, &red.excited, &red.QN, &red.V_ref_int,
            &[Polarization::Z, Polarization::X], CouplingOptions::default(),
        ).unwrap();
        assert_eq!(cf.fields.len(), 2);
        let ng = red.ground.len();
        for f in cf.fields.iter() {
            let H = &f.field;
            for ((i, j), x) in H.indexed_iter() {
                assert!((*x - H[[j, i]].conj()).norm() < 1e-12);
                if (i < ng) == (j < ng) { assert!(x.norm() < 1e-12); }
            }
        }
        assert!(cf.main_coupling.norm() > 0.0);
        let main = cf.fields[0].field[[cf.excited_main, cf.ground_main]];
        assert!((main.norm() - cf.main_coupling.norm()).abs() < 1e-9);
    }

    #[test]
    fn forbidden_main_pair_is_disconnected() {
        let red = system();
        // J = 1 -> J = 1 with identical mF = 0 is forbidden for F = 1 -> F = 1
        // under z polarization
        let g = red.ground.iter()
            .find(|s| {
                let b = s.largest_component().unwrap();
                b.F.f() == 1.0 && b.F1.f() == 1.5 && b.mF.f() == 0.0
            })
            .unwrap();
        let e = red.excited.iter()
            .find(|s| s.largest_component().unwrap().mF.f() == 0.0)
            .unwrap();
        let res = generate_coupling_field(
            g, e, &red.ground, &red.excited, &red.QN, &red.V_ref_int,
            &[Polarization::Z], &Polarization::Z, CouplingOptions::default(),
        );
        assert!(matches!(res, Err(ObeError::DisconnectedCoupling(_))));
    }

    #[test]
    fn collapse_rates_sum_to_gamma() {
        let red = system();
        // B(J = 1, P = +) decays only into X(J = 1) within dipole selection rules
        let gamma = 2.5;
        let C = collapse_matrices(
            &red.QN, &red.ground, &red.excited, gamma, 1e-5, None,
        ).unwrap();
        let n = red.QN.len();
        let mut total: nd::Array2<C64> = nd::Array2::zeros((n, n));
        for c in C.iter() {
            total = total + c.t().mapv(|x| x.conj()).dot(c);
            assert_eq!(c.iter().filter(|x| **x != C64::zero()).count(), 1);
        }
        for k in red.ground.len()..n {
            assert!((total[[k, k]].re - gamma).abs() < 1e-9);
        }
    }

    #[test]
    fn decay_without_channels_is_fatal() {
        let red = system();
        // B(J = 1, P = -) decays only into X(J = 0, 2), neither of which is
        // in the ground set
        let excited_other: Vec<State<_>> = crate::molecule::generate_coupled_states(
            &QuantumSelector::new()
                .with_electronic(Electronic::B)
                .with_J(QnFilter::Exact(1.0))
                .with_F1(QnFilter::Exact(1.5))
                .with_F(QnFilter::Exact(1.0))
                .with_parity(crate::hilbert::Parity::Minus)
        )
        .unwrap()
        .into_iter()
        .map(State::from_basis)
        .collect();
        let mut QN = red.ground.clone();
        QN.extend(excited_other.iter().cloned());
        let res = collapse_matrices(&QN, &red.ground, &excited_other, 1.0, 0.0, None);
        assert!(matches!(res, Err(ObeError::DisconnectedDecay(_))));
    }
}
