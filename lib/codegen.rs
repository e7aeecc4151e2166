//! Rendering of a symbolic OBE system into a Julia right-hand-side kernel.
//!
//! Code is first built as a list of [`Statement`]s, then rendered by an
//! [`Emitter`]. The only backend is [`Julia`], which targets the in-place
//! `f(du, ρ, p, t)` convention of DifferentialEquations.jl.

use std::fmt;
use indexmap::IndexSet;
use ndarray as nd;
use num_complex::Complex64 as C64;
use rayon::iter::{ IntoParallelIterator, ParallelIterator };
use tracing::{ debug, warn };
use crate::{
    couplings::TransitionSelector,
    error::{ ObeError, ObeResult },
    hilbert::BasisState,
    lindblad::hamiltonian::conjugate_symbol,
    parameters::OdeParameters,
    symbolic::{ Expr, Poly, Symbol },
};

/// Name of the generated kernel.
pub const KERNEL_NAME: &str = "Lindblad_rhs!";

/// Indexing convention.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum IndexMode {
    /// Zero-based.
    #[default]
    Native,
    /// One-based, as in Julia.
    Julia,
}

impl IndexMode {
    pub fn offset(self) -> usize {
        match self {
            Self::Native => 0,
            Self::Julia => 1,
        }
    }
}

/* IR *************************************************************************/

/// Left-hand side of an assignment.
#[derive(Clone, Debug, PartialEq)]
pub enum Target {
    /// A local variable of the kernel.
    Local(String),
    /// The output element `du[i, j]` (zero-based).
    Derivative(usize, usize),
}

/// Right-hand side of an assignment.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Element `k` (zero-based) of the parameter vector.
    Load(usize),
    Expression(Expr),
    Polynomial(Poly),
    /// Complex conjugate of a previously assigned target.
    Conjugate(Target),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Statement {
    pub target: Target,
    pub value: Value,
}

impl Statement {
    pub fn new(target: Target, value: Value) -> Self { Self { target, value } }
}

/// Renders IR into source text for some target language.
pub trait Emitter {
    fn target(&self, target: &Target) -> String;

    fn value(&self, value: &Value) -> String;

    fn statement(&self, statement: &Statement) -> String {
        format!("{} = {}", self.target(&statement.target), self.value(&statement.value))
    }
}

/// Julia backend.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Julia;

/// Render a real number as a Julia float literal.
pub fn julia_real(x: f64) -> String {
    if x.is_nan() {
        "NaN".into()
    } else if x.is_infinite() {
        if x > 0.0 { "Inf".into() } else { "-Inf".into() }
    } else {
        format!("{x:?}")
    }
}

/// Render a complex number as a Julia literal.
pub fn julia_complex(z: C64) -> String {
    match (z.re == 0.0, z.im == 0.0) {
        (_, true) => julia_real(z.re),
        (true, false) => format!("{}im", julia_real(z.im)),
        (false, false) => {
            let sign = if z.im < 0.0 { "-" } else { "+" };
            format!("({} {} {}im)", julia_real(z.re), sign, julia_real(z.im.abs()))
        },
    }
}

impl Julia {
    fn symbol(&self, s: &Symbol) -> String {
        match s {
            Symbol::Param(name) => name.clone(),
            Symbol::Rho(i, j) => format!("ρ[{},{}]", i + 1, j + 1),
        }
    }

    /// Render a polynomial as a sum of products.
    pub fn poly(&self, p: &Poly) -> String {
        if p.is_zero() { return "0.0".into(); }
        let mut out = String::new();
        for (k, (m, c)) in p.terms().enumerate() {
            let factors: Vec<String>
                = m.factors().iter()
                .map(|(s, pow)| {
                    if *pow == 1 {
                        self.symbol(s)
                    } else {
                        format!("{}^{}", self.symbol(s), pow)
                    }
                })
                .collect();
            let product = factors.join("*");
            let term
                = if m.is_one() {
                    julia_complex(*c)
                } else if *c == C64::from(1.0) {
                    product
                } else if *c == C64::from(-1.0) {
                    format!("-{product}")
                } else {
                    format!("{}*{}", julia_complex(*c), product)
                };
            match (k, term.strip_prefix('-')) {
                (0, _) => out.push_str(&term),
                (_, Some(rest)) => { out.push_str(" - "); out.push_str(rest); },
                (_, None) => { out.push_str(" + "); out.push_str(&term); },
            }
        }
        out
    }
}

impl Emitter for Julia {
    fn target(&self, target: &Target) -> String {
        match target {
            Target::Local(name) => name.clone(),
            Target::Derivative(i, j) => format!("du[{},{}]", i + 1, j + 1),
        }
    }

    fn value(&self, value: &Value) -> String {
        match value {
            Value::Load(k) => format!("p[{}]", k + 1),
            Value::Expression(expr) => expr.to_string(),
            Value::Polynomial(p) => self.poly(p),
            Value::Conjugate(target) => format!("conj({})", self.target(target)),
        }
    }
}

/* Preamble *******************************************************************/

/// Kernel header and parameter bindings.
#[derive(Clone, Debug, PartialEq)]
pub struct Preamble {
    pub name: String,
    pub statements: Vec<Statement>,
}

impl Preamble {
    pub fn render<E>(&self, emitter: &E) -> String
    where E: Emitter
    {
        let mut out = format!("function {}(du, ρ, p, t)\n\t@inbounds begin\n", self.name);
        for statement in self.statements.iter() {
            out.push_str("\t\t");
            out.push_str(&emitter.statement(statement));
            out.push('\n');
        }
        out
    }
}

impl fmt::Display for Preamble {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render(&Julia))
    }
}

/// Build the kernel preamble.
///
/// Every leaf parameter is loaded from `p` in vector order, then every
/// compound is assigned in the registry's evaluation order, then the
/// conjugate Rabi rate `Ωᶜ = conj(Ω)` of every transition is bound. The
/// symbols of all transitions are checked against the registry first.
pub fn generate_preamble<S>(
    ode_parameters: &OdeParameters,
    transitions: &[TransitionSelector<S>],
) -> ObeResult<Preamble>
where S: BasisState
{
    ode_parameters.check_transition_symbols(transitions)?;
    let mut statements: Vec<Statement> = Vec::new();
    for (k, (name, _)) in ode_parameters.leaves().enumerate() {
        statements.push(Statement::new(Target::Local(name.clone()), Value::Load(k)));
    }
    for (name, expr) in ode_parameters.compounds() {
        statements.push(
            Statement::new(Target::Local(name.clone()), Value::Expression(expr.clone())));
    }
    let rabi: IndexSet<&str>
        = transitions.iter().map(|tr| tr.rabi.as_str()).collect();
    for r in rabi.into_iter() {
        let conj = conjugate_symbol(r);
        if ode_parameters.contains(&conj) {
            return Err(ObeError::InvalidConfig(format!(
                "`{conj}` is generated from `{r}` and cannot be a parameter")));
        }
        statements.push(Statement::new(
            Target::Local(conj),
            Value::Expression(Expr::Call("conj".into(), vec![Expr::symbol(r)])),
        ));
    }
    Ok(Preamble { name: KERNEL_NAME.to_string(), statements })
}

/* Body ***********************************************************************/

/// Statements computing every element of `dρ/dt`.
///
/// Elements on and above the diagonal are assigned their polynomials; those
/// below are the conjugates of their mirror images.
pub fn system_of_equations_to_statements(system: &nd::Array2<Poly>) -> Vec<Statement> {
    let n = system.nrows();
    let upper
        = (0..n)
        .flat_map(|i| (i..n).map(move |j| (i, j)))
        .map(|(i, j)| {
            Statement::new(
                Target::Derivative(i, j),
                Value::Polynomial(system[[i, j]].clone()),
            )
        });
    let lower
        = (0..n)
        .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
        .map(|(i, j)| {
            Statement::new(
                Target::Derivative(j, i),
                Value::Conjugate(Target::Derivative(i, j)),
            )
        });
    upper.chain(lower).collect()
}

/// Render the kernel body, one line per statement, using up to `nprocs`
/// threads.
pub fn system_of_equations_to_lines(system: &nd::Array2<Poly>, nprocs: usize)
    -> Vec<String>
{
    let statements = system_of_equations_to_statements(system);
    let emitter = Julia;
    let render = || -> Vec<String> {
        statements.clone().into_par_iter()
            .map(|s| emitter.statement(&s))
            .collect()
    };
    let lines
        = match rayon::ThreadPoolBuilder::new().num_threads(nprocs.max(1)).build() {
            Ok(pool) => pool.install(render),
            Err(err) => {
                warn!("system_of_equations_to_lines: falling back to one thread: {err}");
                statements.iter().map(|s| emitter.statement(s)).collect()
            },
        };
    debug!("system_of_equations_to_lines: {} lines", lines.len());
    lines
}

/// Assemble the full kernel definition.
pub fn generate_ode_fun_julia<T>(preamble: &Preamble, code_lines: &[T]) -> String
where T: AsRef<str>
{
    let mut ode_fun = preamble.to_string();
    for line in code_lines.iter() {
        ode_fun.push_str("\t\t");
        ode_fun.push_str(line.as_ref());
        ode_fun.push('\n');
    }
    ode_fun.push_str("\tend\n\tnothing\nend");
    ode_fun
}

/* Index helpers **************************************************************/

/// Positions of the diagonal elements of an `n × n` matrix flattened into a
/// vector (`i (n + 1)`, the same for either memory order).
pub fn get_indices_diag_flattened(n: usize, mode: IndexMode) -> Vec<usize> {
    (0..n).map(|i| i * (n + 1) + mode.offset()).collect()
}

/// Positions of the diagonal elements in the packed upper triangle produced
/// by [`flatten_hermitian`].
pub fn get_indices_diag_packed(n: usize, mode: IndexMode) -> Vec<usize> {
    (0..n).map(|i| i * n - i * (i.saturating_sub(1)) / 2 + mode.offset()).collect()
}

/// Pack the upper triangle (including the diagonal) of a square matrix,
/// row by row.
pub fn flatten_hermitian<S>(rho: &nd::ArrayBase<S, nd::Ix2>) -> ObeResult<nd::Array1<C64>>
where S: nd::Data<Elem = C64>
{
    let (n, m) = rho.dim();
    if n != m {
        return Err(ObeError::Shape(format!("cannot flatten a {n} × {m} matrix")));
    }
    Ok(
        (0..n)
        .flat_map(|i| (i..n).map(move |j| (i, j)))
        .map(|(i, j)| rho[[i, j]])
        .collect()
    )
}

/// Inverse of [`flatten_hermitian`]; the lower triangle is filled with
/// conjugates.
pub fn unflatten_hermitian<S>(packed: &nd::ArrayBase<S, nd::Ix1>)
    -> ObeResult<nd::Array2<C64>>
where S: nd::Data<Elem = C64>
{
    let len = packed.len();
    let n = ((((8 * len + 1) as f64).sqrt() - 1.0) / 2.0).round() as usize;
    if n * (n + 1) / 2 != len {
        return Err(ObeError::Shape(format!(
            "{len} is not the length of a packed triangular matrix")));
    }
    let mut rho: nd::Array2<C64> = nd::Array2::zeros((n, n));
    let mut k: usize = 0;
    for i in 0..n {
        for j in i..n {
            rho[[i, j]] = packed[k];
            rho[[j, i]] = packed[k].conj();
            k += 1;
        }
    }
    Ok(rho)
}
