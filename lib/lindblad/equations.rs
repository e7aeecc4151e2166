//! Symbolic expansion of the Lindblad master equation.

use ndarray as nd;
use num_complex::Complex64 as C64;
use num_traits::Zero;
use tracing::debug;
use crate::symbolic::{ Monomial, Poly, Symbol };

/// Symbolic density matrix, `ρ[i, j]` in every entry.
pub fn density_matrix_symbolic(n: usize) -> nd::Array2<Poly> {
    nd::Array2::from_shape_fn((n, n), |(i, j)| Poly::rho(i, j))
}

fn matmul_symbolic(A: &nd::Array2<Poly>, B: &nd::Array2<Poly>) -> nd::Array2<Poly> {
    let (n, m) = (A.nrows(), B.ncols());
    let mut out: nd::Array2<Poly> = nd::Array2::from_elem((n, m), Poly::zero());
    for ((i, k), a) in A.indexed_iter() {
        if a.is_zero() { continue; }
        for (j, b) in B.row(k).iter().enumerate() {
            if b.is_zero() { continue; }
            out[[i, j]] += a * b;
        }
    }
    out
}

fn to_symbolic(A: &nd::Array2<C64>) -> nd::Array2<Poly> {
    A.mapv(Poly::constant)
}

fn dagger(A: &nd::Array2<C64>) -> nd::Array2<C64> {
    A.t().mapv(|a| a.conj())
}

fn nonzero_entries(A: &nd::Array2<C64>) -> Vec<(usize, usize, C64)> {
    A.indexed_iter()
        .filter(|(_, a)| !a.is_zero())
        .map(|((i, j), a)| (i, j, *a))
        .collect()
}

// dense expansion; every product is formed before simplification
fn expand_exact(H: &nd::Array2<Poly>, C_array: &[nd::Array2<C64>])
    -> nd::Array2<Poly>
{
    let n = H.nrows();
    let rho = density_matrix_symbolic(n);
    let mut system: nd::Array2<Poly>
        = nd::Array2::from_elem((n, n), Poly::zero());
    let Hrho = matmul_symbolic(H, &rho);
    let rhoH = matmul_symbolic(&rho, H);
    nd::Zip::from(&mut system).and(&Hrho).and(&rhoH)
        .for_each(|s, hr, rh| { *s = (hr - rh).scale(-C64::i()); });
    for C in C_array.iter() {
        let C_s = to_symbolic(C);
        let Cd_s = to_symbolic(&dagger(C));
        let CdC_s = to_symbolic(&dagger(C).dot(C));
        let jump = matmul_symbolic(&matmul_symbolic(&C_s, &rho), &Cd_s);
        let left = matmul_symbolic(&CdC_s, &rho);
        let right = matmul_symbolic(&rho, &CdC_s);
        nd::Zip::from(&mut system).and(&jump).and(&left).and(&right)
            .for_each(|s, j, l, r| {
                *s += j;
                *s -= (l + r).scale(C64::from(0.5));
            });
    }
    system
}

// sparse expansion over the non-zero entries of H and each C_k
fn expand_fast(H: &nd::Array2<Poly>, C_array: &[nd::Array2<C64>])
    -> nd::Array2<Poly>
{
    let n = H.nrows();
    let mut system: nd::Array2<Poly>
        = nd::Array2::from_elem((n, n), Poly::zero());
    let minus_i = -C64::i();

    // -i [H, ρ]
    for ((a, b), h) in H.indexed_iter() {
        if h.is_zero() { continue; }
        // (H ρ)[a, j] gets H[a, b] ρ[b, j]
        for j in 0..n {
            system[[a, j]] += (h * &Poly::rho(b, j)).scale(minus_i);
        }
        // (ρ H)[i, b] gets ρ[i, a] H[a, b]
        for i in 0..n {
            system[[i, b]] -= (&Poly::rho(i, a) * h).scale(minus_i);
        }
    }

    for C in C_array.iter() {
        let entries = nonzero_entries(C);
        // C ρ C†: (i, j) gets C[i, a] ρ[a, b] conj(C[j, b])
        for &(i, a, c1) in entries.iter() {
            for &(j, b, c2) in entries.iter() {
                system[[i, j]].add_term(
                    Monomial::symbol(Symbol::rho(a, b)),
                    c1 * c2.conj(),
                );
            }
        }
        let CdC = nonzero_entries(&dagger(C).dot(C));
        for &(a, b, m) in CdC.iter() {
            let half = m * 0.5;
            for j in 0..n {
                system[[a, j]].add_term(
                    Monomial::symbol(Symbol::rho(b, j)),
                    -half,
                );
            }
            for i in 0..n {
                system[[i, b]].add_term(
                    Monomial::symbol(Symbol::rho(i, a)),
                    -half,
                );
            }
        }
    }
    system
}

/// Expand `dρ/dt = -i [H, ρ] + Σ_k (C_k ρ C_k† - {C_k† C_k, ρ}/2)` into one
/// polynomial per density matrix entry.
///
/// The fast mode only visits non-zero entries of `H` and the jump operators;
/// the exact mode multiplies out dense symbolic matrices. Both return the
/// same polynomials, in canonical term order.
pub fn generate_system_of_equations_symbolic(
    H: &nd::Array2<Poly>,
    C_array: &[nd::Array2<C64>],
    fast: bool,
) -> nd::Array2<Poly>
{
    assert_eq!(H.nrows(), H.ncols(), "hamiltonian must be square");
    C_array.iter()
        .for_each(|C| {
            assert_eq!(C.dim(), H.dim(), "jump operator dimension mismatch");
        });
    let system
        = if fast { expand_fast(H, C_array) } else { expand_exact(H, C_array) };
    let system = system.mapv(Poly::simplified);
    debug!(
        "generate_system_of_equations_symbolic: {} states, {} jump operators, {} terms",
        H.nrows(),
        C_array.len(),
        system.iter().map(Poly::len).sum::<usize>(),
    );
    system
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lindblad::lindblad_rhs;

    fn two_level() -> (nd::Array2<Poly>, Vec<nd::Array2<C64>>) {
        let mut H: nd::Array2<Poly> = nd::Array2::from_elem((2, 2), Poly::zero());
        H[[1, 1]] = -Poly::param("δ");
        H[[1, 0]] = Poly::param("Ω") * C64::from(0.5);
        H[[0, 1]] = Poly::param("Ωᶜ") * C64::from(0.5);
        let mut C: nd::Array2<C64> = nd::Array2::zeros((2, 2));
        C[[0, 1]] = C64::from(1.0);
        (H, vec![C])
    }

    fn env(rho: &nd::Array2<C64>) -> impl Fn(&Symbol) -> Option<C64> + '_ {
        move |s| match s {
            Symbol::Rho(i, j) => Some(rho[[*i, *j]]),
            Symbol::Param(name) => match name.as_str() {
                "δ" => Some(C64::from(0.3)),
                "Ω" => Some(C64::new(1.0, 0.5)),
                "Ωᶜ" => Some(C64::new(1.0, -0.5)),
                _ => None,
            },
        }
    }

    #[test]
    fn fast_and_exact_agree() {
        let (H, C_array) = two_level();
        let fast = generate_system_of_equations_symbolic(&H, &C_array, true);
        let exact = generate_system_of_equations_symbolic(&H, &C_array, false);
        for (f, e) in fast.iter().zip(exact.iter()) {
            assert!(f.approx_eq(e, 1e-14));
        }
    }

    #[test]
    fn matches_numeric_rhs() {
        let (H, C_array) = two_level();
        let rho = nd::array![
            [C64::from(0.6), C64::new(0.1, 0.2)],
            [C64::new(0.1, -0.2), C64::from(0.4)],
        ];
        let H_num = H.mapv(|h| h.eval(env(&rho)).unwrap());
        let expected = lindblad_rhs(&H_num, &C_array, &rho);
        let system = generate_system_of_equations_symbolic(&H, &C_array, true);
        for (p, x) in system.iter().zip(expected.iter()) {
            assert!((p.eval(env(&rho)).unwrap() - x).norm() < 1e-12);
        }
    }

    #[test]
    fn population_equations_conserve_trace() {
        let (H, C_array) = two_level();
        let system = generate_system_of_equations_symbolic(&H, &C_array, false);
        let trace = &system[[0, 0]] + &system[[1, 1]];
        assert!(trace.is_zero());
    }
}
