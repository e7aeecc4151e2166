//! Merging groups of uncoupled states into single representative levels.
//!
//! Large ground manifolds often contain many states that are only ever
//! populated by spontaneous decay. Such states can be lumped together, which
//! shrinks the density matrix without changing the dynamics of the coupled
//! states.

use indexmap::IndexMap;
use itertools::Itertools;
use ndarray as nd;
use num_complex::Complex64 as C64;
use num_traits::Zero;
use crate::{
    error::{ ObeError, ObeResult },
    hilbert::{ BasisState, QuantumSelector, State },
    symbolic::Poly,
};

/// Maps an uncompacted basis onto a compacted one.
///
/// Each selector gathers all matching states into one group; a state matched
/// by more than one selector belongs to the first. Levels of the compacted
/// basis keep the order of their lowest-index members.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Compaction {
    new_index: Vec<usize>,
    groups: Vec<Vec<usize>>,
}

impl Compaction {
    pub fn from_selectors<S>(QN: &[State<S>], selectors: &[QuantumSelector])
        -> Self
    where S: BasisState
    {
        let n = QN.len();
        let mut group_of: Vec<Option<usize>> = vec![None; n];
        for (k, selector) in selectors.iter().enumerate() {
            selector.select(QN).into_iter()
                .for_each(|i| { group_of[i].get_or_insert(k); });
        }

        // new levels in order of their representative (minimum) old index
        let mut new_index: Vec<usize> = vec![0; n];
        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut selector_level: IndexMap<usize, usize> = IndexMap::new();
        for i in 0..n {
            match group_of[i] {
                Some(k) => {
                    let level
                        = *selector_level.entry(k)
                        .or_insert_with(|| {
                            groups.push(Vec::new());
                            groups.len() - 1
                        });
                    groups[level].push(i);
                    new_index[i] = level;
                },
                None => {
                    groups.push(vec![i]);
                    new_index[i] = groups.len() - 1;
                },
            }
        }
        Self { new_index, groups }
    }

    /// Number of levels after compaction.
    pub fn len(&self) -> usize { self.groups.len() }

    pub fn is_empty(&self) -> bool { self.groups.is_empty() }

    /// Number of levels before compaction.
    pub fn original_len(&self) -> usize { self.new_index.len() }

    /// Return `true` if no two states are merged.
    pub fn is_trivial(&self) -> bool { self.len() == self.original_len() }

    /// New index of an old state.
    pub fn new_index(&self, old: usize) -> usize { self.new_index[old] }

    /// Old indices merged into each new level.
    pub fn groups(&self) -> &[Vec<usize>] { &self.groups }

    fn group_size_of(&self, old: usize) -> usize {
        self.groups[self.new_index[old]].len()
    }

    /// Compacted basis: each merged level is the (unnormalized) sum of its
    /// members.
    pub fn states<S>(&self, QN: &[State<S>]) -> Vec<State<S>>
    where S: BasisState
    {
        self.groups.iter()
            .map(|group| {
                group.iter()
                    .map(|&i| QN[i].clone())
                    .fold(State::new(), |acc, s| acc + s)
            })
            .collect()
    }

    /// Compact a symbolic Hamiltonian.
    ///
    /// Merged levels take the mean of their members' diagonal entries. Fails
    /// if any member of a merged group has a non-zero off-diagonal element.
    pub fn hamiltonian(&self, H: &nd::Array2<Poly>) -> ObeResult<nd::Array2<Poly>> {
        let n = self.original_len();
        if H.dim() != (n, n) {
            return Err(ObeError::Shape(format!(
                "hamiltonian is {:?} but the compaction covers {} states",
                H.dim(), n,
            )));
        }
        for group in self.groups.iter().filter(|g| g.len() > 1) {
            for &i in group.iter() {
                let coupled: Vec<usize>
                    = (0..n)
                    .filter(|&j| j != i)
                    .filter(|&j| !H[[i, j]].is_zero() || !H[[j, i]].is_zero())
                    .collect();
                if !coupled.is_empty() {
                    return Err(ObeError::CompactCoupled(format!(
                        "state {} is coupled to {:?}", i, coupled)));
                }
            }
        }

        let m = self.len();
        let mut H_new: nd::Array2<Poly> = nd::Array2::from_elem((m, m), Poly::zero());
        for ((i, j), h) in H.indexed_iter() {
            if i == j || h.is_zero() { continue; }
            H_new[[self.new_index[i], self.new_index[j]]] += h;
        }
        for (level, group) in self.groups.iter().enumerate() {
            let mut diag: Poly
                = group.iter()
                .fold(Poly::zero(), |acc, &i| acc + H[[i, i]].clone());
            if group.len() > 1 {
                diag = diag * C64::from(1.0 / group.len() as f64);
            }
            H_new[[level, level]] = diag;
        }
        Ok(H_new)
    }

    /// Compact a set of jump operators.
    ///
    /// Single-entry operators that end up connecting the same pair of levels
    /// are combined into one with the summed rate; rates out of a merged
    /// level are averaged over its members. All other operators are remapped
    /// entry by entry.
    pub fn collapse(&self, C_array: &[nd::Array2<C64>]) -> Vec<nd::Array2<C64>> {
        let m = self.len();
        let mut rates: IndexMap<(usize, usize), f64> = IndexMap::new();
        let mut general: Vec<nd::Array2<C64>> = Vec::new();
        for C in C_array.iter() {
            let nonzero: Vec<((usize, usize), C64)>
                = C.indexed_iter()
                .filter(|(_, c)| !c.is_zero())
                .map(|(ij, c)| (ij, *c))
                .collect();
            match nonzero.as_slice() {
                [] => { },
                [((i, j), c)] => {
                    let key = (self.new_index[*i], self.new_index[*j]);
                    *rates.entry(key).or_insert(0.0)
                        += c.norm_sqr() / self.group_size_of(*j) as f64;
                },
                entries => {
                    let mut C_new: nd::Array2<C64> = nd::Array2::zeros((m, m));
                    entries.iter()
                        .for_each(|((i, j), c)| {
                            C_new[[self.new_index[*i], self.new_index[*j]]] += *c;
                        });
                    general.push(C_new);
                },
            }
        }
        rates.into_iter()
            .filter(|(_, rate)| *rate > 0.0)
            .map(|((i, j), rate)| {
                let mut C_new: nd::Array2<C64> = nd::Array2::zeros((m, m));
                C_new[[i, j]] = C64::from(rate.sqrt());
                C_new
            })
            .chain(general)
            .collect()
    }

    /// Merged groups as a readable list, for logging.
    pub fn describe(&self) -> String {
        self.groups.iter()
            .filter(|g| g.len() > 1)
            .map(|g| format!("{:?} -> {}", g, self.new_index[g[0]]))
            .join(", ")
    }
}
