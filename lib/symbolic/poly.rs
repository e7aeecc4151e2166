//! Sparse polynomials with complex coefficients.
//!
//! These carry the symbolic Hamiltonian and the right-hand sides of the
//! optical Bloch equations: every entry is a sum of products of parameter
//! symbols and density matrix elements with a numeric coefficient.

use std::ops::{ Add, AddAssign, Mul, Neg, Sub, SubAssign };
use indexmap::{ IndexMap, IndexSet };
use num_complex::Complex64 as C64;
use num_traits::Zero;
use crate::error::{ ObeError, ObeResult };

/// A single indeterminate.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Symbol {
    /// A named parameter, e.g. a Rabi rate or detuning.
    Param(String),
    /// The density matrix element `ρ[i, j]` (zero-based).
    Rho(usize, usize),
}

impl Symbol {
    pub fn param<T>(name: T) -> Self
    where T: Into<String>
    {
        Self::Param(name.into())
    }

    pub fn rho(i: usize, j: usize) -> Self { Self::Rho(i, j) }
}

/// A product of symbols raised to positive powers, kept sorted.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Monomial(Vec<(Symbol, u32)>);

impl Monomial {
    /// The empty product.
    pub fn one() -> Self { Self(Vec::new()) }

    pub fn symbol(s: Symbol) -> Self { Self(vec![(s, 1)]) }

    pub fn is_one(&self) -> bool { self.0.is_empty() }

    /// Factors in ascending symbol order.
    pub fn factors(&self) -> &[(Symbol, u32)] { &self.0 }

    pub fn degree(&self) -> u32 { self.0.iter().map(|(_, p)| p).sum() }

    /// Merge two sorted factor lists.
    pub fn mul(&self, other: &Self) -> Self {
        let mut out: Vec<(Symbol, u32)>
            = Vec::with_capacity(self.0.len() + other.0.len());
        let mut a = self.0.iter().peekable();
        let mut b = other.0.iter().peekable();
        loop {
            match (a.peek(), b.peek()) {
                (Some((sa, pa)), Some((sb, pb))) => {
                    if sa == sb {
                        out.push((sa.clone(), pa + pb));
                        a.next();
                        b.next();
                    } else if sa < sb {
                        out.push((sa.clone(), *pa));
                        a.next();
                    } else {
                        out.push((sb.clone(), *pb));
                        b.next();
                    }
                },
                (Some(_), None) => { out.extend(a.cloned()); break; },
                (None, Some(_)) => { out.extend(b.cloned()); break; },
                (None, None) => { break; },
            }
        }
        Self(out)
    }
}

/// A sparse polynomial `Σ c_k m_k` over [`Monomial`]s.
///
/// Terms are kept in insertion order and no stored coefficient is exactly
/// zero.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Poly {
    terms: IndexMap<Monomial, C64>,
}

impl Poly {
    pub fn zero() -> Self { Self::default() }

    pub fn constant<T>(c: T) -> Self
    where T: Into<C64>
    {
        let mut p = Self::zero();
        p.add_term(Monomial::one(), c.into());
        p
    }

    pub fn symbol(s: Symbol) -> Self {
        let mut p = Self::zero();
        p.add_term(Monomial::symbol(s), C64::from(1.0));
        p
    }

    pub fn param<T>(name: T) -> Self
    where T: Into<String>
    {
        Self::symbol(Symbol::param(name))
    }

    pub fn rho(i: usize, j: usize) -> Self { Self::symbol(Symbol::rho(i, j)) }

    pub fn is_zero(&self) -> bool { self.terms.is_empty() }

    pub fn len(&self) -> usize { self.terms.len() }

    pub fn is_empty(&self) -> bool { self.terms.is_empty() }

    pub fn terms(&self) -> impl Iterator<Item = (&Monomial, &C64)> {
        self.terms.iter()
    }

    /// Coefficient of a monomial (zero if absent).
    pub fn coefficient(&self, m: &Monomial) -> C64 {
        self.terms.get(m).copied().unwrap_or_else(C64::zero)
    }

    /// Numeric part of the polynomial.
    pub fn constant_term(&self) -> C64 { self.coefficient(&Monomial::one()) }

    /// Accumulate `c m`, removing the term if it cancels exactly.
    pub fn add_term(&mut self, m: Monomial, c: C64) {
        if c == C64::zero() { return; }
        let entry = self.terms.entry(m);
        match entry {
            indexmap::map::Entry::Occupied(mut occ) => {
                *occ.get_mut() += c;
                if *occ.get() == C64::zero() { occ.shift_remove(); }
            },
            indexmap::map::Entry::Vacant(vac) => { vac.insert(c); },
        }
    }

    pub fn scale(&self, c: C64) -> Self {
        if c == C64::zero() { return Self::zero(); }
        Self {
            terms: self.terms.iter()
                .map(|(m, a)| (m.clone(), a * c))
                .filter(|(_, a)| *a != C64::zero())
                .collect()
        }
    }

    /// Remove terms whose coefficients have magnitude at most `tol`.
    pub fn prune(&mut self, tol: f64) {
        self.terms.retain(|_, c| c.norm() > tol);
    }

    /// Canonical form: exact zeros removed, terms sorted by monomial.
    pub fn simplified(mut self) -> Self {
        self.prune(0.0);
        self.terms.sort_keys();
        self
    }

    /// All symbols appearing in the polynomial, in order of first appearance.
    pub fn symbols(&self) -> IndexSet<&Symbol> {
        self.terms.keys()
            .flat_map(|m| m.factors().iter().map(|(s, _)| s))
            .collect()
    }

    /// Compare with another polynomial term by term, up to `tol`.
    pub fn approx_eq(&self, other: &Self, tol: f64) -> bool {
        let diff = self.clone() - other.clone();
        diff.terms.values().all(|c| c.norm() <= tol)
    }

    /// Evaluate numerically, resolving every symbol through `env`.
    pub fn eval<F>(&self, env: F) -> ObeResult<C64>
    where F: Fn(&Symbol) -> Option<C64>
    {
        let mut acc = C64::zero();
        for (m, c) in self.terms.iter() {
            let mut term = *c;
            for (s, p) in m.factors().iter() {
                let v = env(s)
                    .ok_or_else(|| ObeError::Evaluation(
                        format!("no value for symbol {s:?}")))?;
                term *= v.powu(*p);
            }
            acc += term;
        }
        Ok(acc)
    }
}

impl From<C64> for Poly {
    fn from(c: C64) -> Self { Self::constant(c) }
}

impl From<f64> for Poly {
    fn from(x: f64) -> Self { Self::constant(x) }
}

impl From<Symbol> for Poly {
    fn from(s: Symbol) -> Self { Self::symbol(s) }
}

impl AddAssign<&Poly> for Poly {
    fn add_assign(&mut self, rhs: &Poly) {
        rhs.terms.iter().for_each(|(m, c)| self.add_term(m.clone(), *c));
    }
}

impl AddAssign<Poly> for Poly {
    fn add_assign(&mut self, rhs: Poly) {
        rhs.terms.into_iter().for_each(|(m, c)| self.add_term(m, c));
    }
}

impl SubAssign<&Poly> for Poly {
    fn sub_assign(&mut self, rhs: &Poly) {
        rhs.terms.iter().for_each(|(m, c)| self.add_term(m.clone(), -*c));
    }
}

impl SubAssign<Poly> for Poly {
    fn sub_assign(&mut self, rhs: Poly) {
        rhs.terms.into_iter().for_each(|(m, c)| self.add_term(m, -c));
    }
}

impl Add for Poly {
    type Output = Poly;

    fn add(mut self, rhs: Poly) -> Poly {
        self += rhs;
        self
    }
}

impl Add<&Poly> for &Poly {
    type Output = Poly;

    fn add(self, rhs: &Poly) -> Poly {
        let mut out = self.clone();
        out += rhs;
        out
    }
}

impl Sub for Poly {
    type Output = Poly;

    fn sub(mut self, rhs: Poly) -> Poly {
        self -= rhs;
        self
    }
}

impl Sub<&Poly> for &Poly {
    type Output = Poly;

    fn sub(self, rhs: &Poly) -> Poly {
        let mut out = self.clone();
        out -= rhs;
        out
    }
}

impl Neg for Poly {
    type Output = Poly;

    fn neg(self) -> Poly { self.scale(C64::from(-1.0)) }
}

impl Mul<&Poly> for &Poly {
    type Output = Poly;

    fn mul(self, rhs: &Poly) -> Poly {
        let mut out = Poly::zero();
        for (ma, ca) in self.terms.iter() {
            for (mb, cb) in rhs.terms.iter() {
                out.add_term(ma.mul(mb), ca * cb);
            }
        }
        out
    }
}

impl Mul for Poly {
    type Output = Poly;

    fn mul(self, rhs: Poly) -> Poly { &self * &rhs }
}

impl Mul<C64> for Poly {
    type Output = Poly;

    fn mul(self, rhs: C64) -> Poly { self.scale(rhs) }
}

impl Mul<C64> for &Poly {
    type Output = Poly;

    fn mul(self, rhs: C64) -> Poly { self.scale(rhs) }
}
