//! Symbolic Hamiltonian in the rotating frame of every laser.

use std::collections::VecDeque;
use ndarray as nd;
use num_complex::Complex64 as C64;
use rustc_hash::FxHashMap as HashMap;
use tracing::debug;
use crate::{
    couplings::{ CouplingField, TransitionSelector },
    error::{ ObeError, ObeResult },
    hilbert::{ BasisState, QuantumSelector, State },
    lindblad::compact::Compaction,
    symbolic::Poly,
};

/// Symbol for the complex conjugate of a Rabi rate.
pub fn conjugate_symbol(rabi: &str) -> String { format!("{rabi}ᶜ") }

// disjoint sets over state indices
struct Frames {
    parent: Vec<usize>,
}

impl Frames {
    fn new(n: usize) -> Self { Self { parent: (0..n).collect() } }

    fn find(&mut self, i: usize) -> usize {
        let mut root = i;
        while self.parent[root] != root { root = self.parent[root]; }
        let mut k = i;
        while self.parent[k] != root {
            let next = self.parent[k];
            self.parent[k] = root;
            k = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb { self.parent[ra.max(rb)] = ra.min(rb); }
    }
}

/// Return `true` if every coefficient of `p` is within `tol` of zero.
fn vanishes(p: &Poly, tol: f64) -> bool {
    p.terms().all(|(_, c)| c.norm() <= tol)
}

/// Solve for the frame offset of every coupled state.
///
/// All ground (resp. excited) states of one transition rotate together, and
/// transition `k` fixes `offset(e) - offset(g) = E(e_main) - E(g_main) + δ_k`.
/// Each connected set of frames is anchored at the ground side of its first
/// transition, where the offset is `E(g_main)`.
fn frame_offsets<S>(
    energies: &[f64],
    couplings: &[CouplingField],
    transitions: &[TransitionSelector<S>],
    tol: f64,
) -> ObeResult<Vec<Option<Poly>>>
where S: BasisState
{
    let n = energies.len();
    let mut frames = Frames::new(n);
    for cf in couplings.iter() {
        cf.ground_states.windows(2).for_each(|w| frames.union(w[0], w[1]));
        cf.excited_states.windows(2).for_each(|w| frames.union(w[0], w[1]));
    }

    // edges between frame classes, keyed by class root
    let edges: Vec<(usize, usize, Poly)>
        = couplings.iter().zip(transitions)
        .map(|(cf, tr)| {
            let g = frames.find(cf.ground_main);
            let e = frames.find(cf.excited_main);
            let omega
                = Poly::constant(energies[cf.excited_main] - energies[cf.ground_main])
                + Poly::param(tr.detuning.as_str());
            (g, e, omega)
        })
        .collect();
    let mut adjacent: HashMap<usize, Vec<usize>> = HashMap::default();
    for (k, (g, e, _)) in edges.iter().enumerate() {
        adjacent.entry(*g).or_default().push(k);
        adjacent.entry(*e).or_default().push(k);
    }

    let mut offsets: HashMap<usize, Poly> = HashMap::default();
    for (k0, cf) in couplings.iter().enumerate() {
        let (g0, _, _) = &edges[k0];
        if offsets.contains_key(g0) { continue; }
        offsets.insert(*g0, Poly::constant(energies[cf.ground_main]));
        let mut queue: VecDeque<usize> = VecDeque::from([*g0]);
        while let Some(class) = queue.pop_front() {
            for &k in adjacent.get(&class).into_iter().flatten() {
                let (g, e, omega) = &edges[k];
                match (offsets.get(g).cloned(), offsets.get(e).cloned()) {
                    (Some(og), Some(oe)) => {
                        if !vanishes(&(oe - og - omega.clone()), tol) {
                            return Err(ObeError::InconsistentFrame(
                                transitions[k].label()));
                        }
                    },
                    (Some(og), None) => {
                        offsets.insert(*e, og + omega.clone());
                        queue.push_back(*e);
                    },
                    (None, Some(oe)) => {
                        offsets.insert(*g, oe - omega.clone());
                        queue.push_back(*g);
                    },
                    (None, None) => { },
                }
            }
        }
    }

    let coupled: Vec<bool>
        = {
            let mut c = vec![false; n];
            couplings.iter()
                .flat_map(|cf| cf.ground_states.iter().chain(&cf.excited_states))
                .for_each(|&i| { c[i] = true; });
            c
        };
    Ok(
        (0..n)
        .map(|i| {
            coupled[i]
                .then(|| offsets.get(&frames.find(i)).cloned())
                .flatten()
        })
        .collect()
    )
}

/// Build the symbolic Hamiltonian of the laser-driven system in the rotating
/// frame, optionally compacting groups of uncoupled states.
///
/// Diagonal entries are `E_i - offset_i` (numeric part plus detuning
/// symbols); states not addressed by any transition get zero. For transition
/// `k` and polarization `j`, the coupling entries are
/// `H[e, g] = Ω_k/2 · P_kj · field_j[e, g]/ME_main` and
/// `H[g, e] = Ω_kᶜ/2 · P_kj · conj(field_j[e, g]/ME_main)`, where `P_kj` is the
/// polarization symbol (or 1 if the transition has none).
///
/// With `qn_compact`, the compacted basis is returned alongside.
pub fn generate_total_symbolic_hamiltonian<S>(
    QN: &[State<S>],
    H_int: &nd::Array2<C64>,
    couplings: &[CouplingField],
    transitions: &[TransitionSelector<S>],
    qn_compact: Option<&[QuantumSelector]>,
) -> ObeResult<(nd::Array2<Poly>, Option<Vec<State<S>>>)>
where S: BasisState
{
    let n = QN.len();
    if H_int.dim() != (n, n) {
        return Err(ObeError::Shape(format!(
            "internal hamiltonian is {:?} for {} states", H_int.dim(), n)));
    }
    if couplings.len() != transitions.len() {
        return Err(ObeError::InvalidConfig(format!(
            "{} coupling fields for {} transitions",
            couplings.len(), transitions.len(),
        )));
    }
    transitions.iter().try_for_each(TransitionSelector::validate)?;

    let energies: Vec<f64> = H_int.diag().iter().map(|e| e.re).collect();
    let scale = energies.iter().fold(1.0_f64, |acc, e| acc.max(e.abs()));
    let tol = 1e-12 * scale;
    let offsets = frame_offsets(&energies, couplings, transitions, tol)?;

    let mut H: nd::Array2<Poly> = nd::Array2::from_elem((n, n), Poly::zero());
    for (i, offset) in offsets.iter().enumerate() {
        if let Some(offset) = offset {
            let mut h = Poly::constant(energies[i]) - offset.clone();
            h.prune(tol);
            H[[i, i]] = h;
        }
    }

    // internal couplings within a common frame survive the transformation
    for ((i, j), h) in H_int.indexed_iter() {
        if i == j || h.norm() <= tol { continue; }
        if let (Some(oi), Some(oj)) = (&offsets[i], &offsets[j]) {
            if vanishes(&(oi.clone() - oj.clone()), tol) {
                H[[i, j]] += Poly::constant(*h);
            }
        }
    }

    for (cf, tr) in couplings.iter().zip(transitions) {
        let rabi = Poly::param(tr.rabi.as_str());
        let rabi_c = Poly::param(conjugate_symbol(&tr.rabi));
        for (j, pf) in cf.fields.iter().enumerate() {
            let weight
                = tr.polarization_symbols.get(j)
                .map(|s| Poly::param(s.as_str()))
                .unwrap_or_else(|| Poly::constant(1.0));
            let down = &rabi * &weight;
            let up = &rabi_c * &weight;
            for &e in cf.excited_states.iter() {
                for &g in cf.ground_states.iter() {
                    let v = pf.field[[e, g]] / cf.main_coupling;
                    if v.norm() <= f64::EPSILON { continue; }
                    H[[e, g]] += down.scale(v / 2.0);
                    H[[g, e]] += up.scale(v.conj() / 2.0);
                }
            }
        }
        debug!(
            "generate_total_symbolic_hamiltonian: coupled {} ground and {} excited states via {}",
            cf.ground_states.len(), cf.excited_states.len(), tr.label(),
        );
    }

    match qn_compact {
        Some(selectors) => {
            let compaction = Compaction::from_selectors(QN, selectors);
            let H_compact = compaction.hamiltonian(&H)?;
            debug!(
                "generate_total_symbolic_hamiltonian: compacted {} -> {} states ({})",
                n, compaction.len(), compaction.describe(),
            );
            Ok((H_compact, Some(compaction.states(QN))))
        },
        None => Ok((H, None)),
    }
}
