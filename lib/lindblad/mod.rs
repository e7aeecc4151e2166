//! The Lindblad master equation, in symbolic form for code generation and in
//! numeric form for checking it.
//!
//! The symbolic pipeline runs
//! [`generate_total_symbolic_hamiltonian`] →
//! (optionally) the decay-channel injection in [`decay`] →
//! [`generate_system_of_equations_symbolic`].

use ndarray as nd;
use num_complex::Complex64 as C64;

pub mod compact;
pub mod decay;
pub mod equations;
pub mod hamiltonian;

pub use compact::Compaction;
pub use decay::{ add_decays_C_arrays, add_levels_symbolic_hamiltonian, add_states_QN };
pub use equations::generate_system_of_equations_symbolic;
pub use hamiltonian::generate_total_symbolic_hamiltonian;

/// Compute the commutator `[A, B] = A B - B A`.
pub fn commutator<SA, SB>(
    A: &nd::ArrayBase<SA, nd::Ix2>,
    B: &nd::ArrayBase<SB, nd::Ix2>,
) -> nd::Array2<C64>
where
    SA: nd::Data<Elem = C64>,
    SB: nd::Data<Elem = C64>,
{
    A.dot(B) - B.dot(A)
}

/// Compute the anti-commutator `{A, B} = A B + B A`.
pub fn anti_commutator<SA, SB>(
    A: &nd::ArrayBase<SA, nd::Ix2>,
    B: &nd::ArrayBase<SB, nd::Ix2>,
) -> nd::Array2<C64>
where
    SA: nd::Data<Elem = C64>,
    SB: nd::Data<Elem = C64>,
{
    A.dot(B) + B.dot(A)
}

/// Compute the dissipator `C ρ C† - {C† C, ρ} / 2` of a single jump operator.
pub fn dissipator<SA, SB>(
    C: &nd::ArrayBase<SA, nd::Ix2>,
    rho: &nd::ArrayBase<SB, nd::Ix2>,
) -> nd::Array2<C64>
where
    SA: nd::Data<Elem = C64>,
    SB: nd::Data<Elem = C64>,
{
    let Cd: nd::Array2<C64> = C.t().mapv(|c| c.conj());
    let CdC: nd::Array2<C64> = Cd.dot(C);
    C.dot(rho).dot(&Cd) - anti_commutator(&CdC, rho) / 2.0
}

/// Compute the full RHS of the Lindblad master equation,
/// `-i [H, ρ] + Σ_k D[C_k](ρ)`.
///
/// This is the numeric counterpart of
/// [`generate_system_of_equations_symbolic`] with every parameter bound.
pub fn lindblad_rhs<SA, SB>(
    H: &nd::ArrayBase<SA, nd::Ix2>,
    C_array: &[nd::Array2<C64>],
    rho: &nd::ArrayBase<SB, nd::Ix2>,
) -> nd::Array2<C64>
where
    SA: nd::Data<Elem = C64>,
    SB: nd::Data<Elem = C64>,
{
    let mut drho: nd::Array2<C64> = commutator(H, rho) * (-C64::i());
    C_array.iter()
        .for_each(|C| { drho += &dissipator(C, rho); });
    drho
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_level(gamma: f64) -> (nd::Array2<C64>, Vec<nd::Array2<C64>>) {
        let H = nd::array![
            [C64::from(0.0), C64::from(0.5)],
            [C64::from(0.5), C64::from(-0.2)],
        ];
        let mut C: nd::Array2<C64> = nd::Array2::zeros((2, 2));
        C[[0, 1]] = C64::from(gamma.sqrt());
        (H, vec![C])
    }

    #[test]
    fn rhs_is_traceless_and_hermitian() {
        let (H, C_array) = two_level(1.0);
        let rho = nd::array![
            [C64::from(0.3), C64::new(0.1, 0.2)],
            [C64::new(0.1, -0.2), C64::from(0.7)],
        ];
        let drho = lindblad_rhs(&H, &C_array, &rho);
        assert!(drho.diag().sum().norm() < 1e-14);
        let drho_h = drho.t().mapv(|c| c.conj());
        assert!((&drho - &drho_h).iter().all(|d| d.norm() < 1e-14));
    }

    #[test]
    fn pure_decay_empties_excited_state() {
        let (_, C_array) = two_level(2.0);
        let H: nd::Array2<C64> = nd::Array2::zeros((2, 2));
        let mut rho: nd::Array2<C64> = nd::Array2::zeros((2, 2));
        rho[[1, 1]] = C64::from(1.0);
        let drho = lindblad_rhs(&H, &C_array, &rho);
        assert!((drho[[1, 1]] - C64::from(-2.0)).norm() < 1e-14);
        assert!((drho[[0, 0]] - C64::from(2.0)).norm() < 1e-14);
    }
}
