//! Injection of extra decay destinations into an assembled system.
//!
//! A [`DecayChannel`] adds one level to the basis (inserted just before the
//! first excited state), which is populated only by spontaneous decay from a
//! selected set of excited states.

use ndarray as nd;
use num_complex::Complex64 as C64;
use tracing::debug;
use crate::{
    couplings::DecayChannel,
    error::{ ObeError, ObeResult },
    hamiltonian::find_state_indices,
    hilbert::{ BasisState, State },
    symbolic::Poly,
};

/// Insert one empty row and column per decay channel into a symbolic
/// Hamiltonian.
///
/// The new levels are placed just before the first excited state of `QN`.
/// Returns the indices of the new levels in the enlarged basis alongside the
/// enlarged Hamiltonian.
pub fn add_levels_symbolic_hamiltonian<S>(
    H: &nd::Array2<Poly>,
    decay_channels: &[DecayChannel<S>],
    QN: &[State<S>],
    excited: &[State<S>],
) -> ObeResult<(Vec<usize>, nd::Array2<Poly>)>
where S: BasisState
{
    let n = QN.len();
    if H.dim() != (n, n) {
        return Err(ObeError::Shape(format!(
            "hamiltonian is {:?} for {} states", H.dim(), n)));
    }
    let insert_at
        = find_state_indices(QN, excited)?
        .into_iter()
        .min()
        .unwrap_or(n);
    let k = decay_channels.len();
    let indices: Vec<usize> = (insert_at..insert_at + k).collect();
    let shift = |i: usize| if i < insert_at { i } else { i + k };
    let mut H_new: nd::Array2<Poly>
        = nd::Array2::from_elem((n + k, n + k), Poly::zero());
    for ((i, j), h) in H.indexed_iter() {
        if h.is_zero() { continue; }
        H_new[[shift(i), shift(j)]] = h.clone();
    }
    debug!("add_levels_symbolic_hamiltonian: inserted {k} levels at {insert_at}");
    Ok((indices, H_new))
}

/// Insert the states of each decay channel into `QN` at `indices`, as
/// returned by [`add_levels_symbolic_hamiltonian`].
pub fn add_states_QN<S>(
    decay_channels: &[DecayChannel<S>],
    QN: &[State<S>],
    indices: &[usize],
) -> Vec<State<S>>
where S: BasisState
{
    assert_eq!(decay_channels.len(), indices.len(), "one index per decay channel");
    let mut QN_new: Vec<State<S>> = QN.to_vec();
    for (channel, &idx) in decay_channels.iter().zip(indices) {
        QN_new.insert(idx, channel.ground.clone());
    }
    QN_new
}

/// Enlarge every jump operator to the basis returned by [`add_states_QN`] and
/// add one operator per decay channel and matching excited state.
///
/// For each excited state matched by a channel's selector, its existing
/// decays are scaled so their total rate drops by the fraction `branching`,
/// and a new operator `√(branching Γ) |channel⟩⟨e|` is added.
pub fn add_decays_C_arrays<S>(
    decay_channels: &[DecayChannel<S>],
    indices: &[usize],
    QN: &[State<S>],
    C_array: &[nd::Array2<C64>],
    gamma: f64,
) -> ObeResult<Vec<nd::Array2<C64>>>
where S: BasisState
{
    let n = QN.len();
    let k = decay_channels.len();
    assert_eq!(k, indices.len(), "one index per decay channel");
    let n_old = n - k;
    let insert_at = indices.first().copied().unwrap_or(n_old);
    let shift = |i: usize| if i < insert_at { i } else { i + k };

    let mut C_new: Vec<nd::Array2<C64>>
        = C_array.iter()
        .map(|C| {
            assert_eq!(C.dim(), (n_old, n_old), "jump operator dimension mismatch");
            let mut C_big: nd::Array2<C64> = nd::Array2::zeros((n, n));
            C.indexed_iter()
                .for_each(|((i, j), c)| { C_big[[shift(i), shift(j)]] = *c; });
            C_big
        })
        .collect();

    for (channel, &idx) in decay_channels.iter().zip(indices) {
        if !(0.0..=1.0).contains(&channel.branching) {
            return Err(ObeError::InvalidConfig(format!(
                "decay channel {} has branching ratio {} outside [0, 1]",
                channel.description, channel.branching,
            )));
        }
        let excited: Vec<usize>
            = channel.excited.select(QN).into_iter()
            .filter(|i| !indices.contains(i))
            .collect();
        if excited.is_empty() {
            return Err(ObeError::DisconnectedDecay(format!(
                "decay channel {} matches no excited state", channel.description)));
        }
        let keep = (1.0 - channel.branching).sqrt();
        for &e in excited.iter() {
            C_new.iter_mut()
                .for_each(|C| { C.column_mut(e).mapv_inplace(|c| c * keep); });
        }
        for &e in excited.iter() {
            let mut C: nd::Array2<C64> = nd::Array2::zeros((n, n));
            C[[idx, e]] = C64::from((channel.branching * gamma).sqrt());
            C_new.push(C);
        }
        debug!(
            "add_decays_C_arrays: {} decays from {} excited states into level {idx}",
            channel.description, excited.len(),
        );
    }
    C_new.iter()
        .for_each(|C| assert_eq!(C.dim(), (n, n), "jump operator dimension mismatch"));
    Ok(C_new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        hamiltonian::tests::{ B1_states, X1_states },
        hilbert::{ Electronic, QuantumSelector },
        molecule::CoupledBasisState,
    };

    fn channel() -> DecayChannel<CoupledBasisState> {
        let other = CoupledBasisState::X(3, 3.5, 4.0, 0.0).unwrap();
        DecayChannel {
            ground: State::from_basis(other),
            excited: QuantumSelector::new().with_electronic(Electronic::B),
            branching: 0.25,
            description: "X(J=3)".into(),
        }
    }

    #[test]
    fn levels_are_inserted_before_excited_states() {
        let QN: Vec<State<CoupledBasisState>>
            = X1_states().into_iter().chain(B1_states()).collect();
        let n = QN.len();
        let mut H: nd::Array2<Poly> = nd::Array2::from_elem((n, n), Poly::zero());
        H[[12, 12]] = Poly::param("δ");
        H[[12, 0]] = Poly::param("Ω");
        let channels = [channel()];
        let (indices, H_new)
            = add_levels_symbolic_hamiltonian(&H, &channels, &QN, &B1_states()).unwrap();
        assert_eq!(indices, vec![12]);
        assert_eq!(H_new.dim(), (n + 1, n + 1));
        assert_eq!(H_new[[13, 13]], Poly::param("δ"));
        assert_eq!(H_new[[13, 0]], Poly::param("Ω"));
        assert!(H_new.row(12).iter().all(Poly::is_zero));
        let QN_new = add_states_QN(&channels, &QN, &indices);
        assert_eq!(QN_new.len(), n + 1);
        assert_eq!(QN_new[12], channels[0].ground);
    }

    #[test]
    fn injected_decay_preserves_total_rate() {
        let QN: Vec<State<CoupledBasisState>>
            = X1_states().into_iter().chain(B1_states()).collect();
        let n = QN.len();
        let mut C: nd::Array2<C64> = nd::Array2::zeros((n, n));
        C[[0, 12]] = C64::from(1.0);
        let channels = [channel()];
        let QN_new = add_states_QN(&channels, &QN, &[12]);
        let C_new
            = add_decays_C_arrays(&channels, &[12], &QN_new, &[C], 1.0).unwrap();
        // one existing operator plus one per excited state
        assert_eq!(C_new.len(), 1 + 3);
        let rate_out_of = |e: usize| -> f64 {
            C_new.iter()
                .map(|C| C.column(e).iter().map(|c| c.norm_sqr()).sum::<f64>())
                .sum()
        };
        assert!((rate_out_of(13) - 1.0).abs() < 1e-12);
        assert!((rate_out_of(14) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn unmatched_channel_is_disconnected() {
        let QN: Vec<State<CoupledBasisState>> = X1_states();
        let mut ch = channel();
        ch.excited = QuantumSelector::new().with_electronic(Electronic::B);
        let QN_new = add_states_QN(&[ch.clone()], &QN, &[12]);
        let res = add_decays_C_arrays(&[ch], &[12], &QN_new, &[], 1.0);
        assert!(matches!(res, Err(ObeError::DisconnectedDecay(_))));
    }
}
