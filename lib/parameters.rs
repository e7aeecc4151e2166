//! The ODE parameter registry.
//!
//! Parameters are either *leaves*, numeric values passed to the kernel
//! through its parameter vector `p`, or *compounds*, expressions over other
//! parameters and the time `t` that the kernel evaluates itself. The set of
//! names and every compound expression are fixed at construction; afterwards
//! only leaf values may change.

use std::{ collections::BTreeSet, fmt };
use indexmap::IndexMap;
use num_complex::Complex64 as C64;
use crate::{
    codegen::{ IndexMode, julia_complex, julia_real },
    couplings::TransitionSelector,
    error::{ ObeError, ObeResult, undefined },
    hilbert::BasisState,
    symbolic::Expr,
};

/// Name of the time variable, available to every compound expression.
pub const TIME: &str = "t";

/// Names that can never be parameters: the time variable and the constants
/// understood by the expression parser.
pub const RESERVED: [&str; 4] = [TIME, "pi", "π", "im"];

/// Numeric value of a leaf parameter.
#[derive(Clone, Debug, PartialEq)]
pub enum LeafValue {
    Real(f64),
    Complex(C64),
    Array(Vec<f64>),
}

impl LeafValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Real(_) => "real",
            Self::Complex(_) => "complex",
            Self::Array(_) => "array",
        }
    }

    /// Scalar value, if the leaf is not an array.
    pub fn as_scalar(&self) -> Option<C64> {
        match self {
            Self::Real(x) => Some(C64::from(*x)),
            Self::Complex(z) => Some(*z),
            Self::Array(_) => None,
        }
    }

    /// Render as a Julia literal.
    pub fn to_julia(&self) -> String {
        match self {
            Self::Real(x) => julia_real(*x),
            Self::Complex(z) => julia_complex(*z),
            Self::Array(xs) => {
                let items: Vec<String> = xs.iter().map(|x| julia_real(*x)).collect();
                format!("[{}]", items.join(", "))
            },
        }
    }
}

impl From<f64> for LeafValue {
    fn from(x: f64) -> Self { Self::Real(x) }
}

impl From<C64> for LeafValue {
    fn from(z: C64) -> Self { Self::Complex(z) }
}

impl From<Vec<f64>> for LeafValue {
    fn from(xs: Vec<f64>) -> Self { Self::Array(xs) }
}

/// A value supplied by the caller, either for construction or as an update.
#[derive(Clone, Debug, PartialEq)]
pub enum ParameterValue {
    Leaf(LeafValue),
    Compound(String),
}

impl ParameterValue {
    fn kind(&self) -> &'static str {
        match self {
            Self::Leaf(_) => "leaf",
            Self::Compound(_) => "compound",
        }
    }
}

impl From<LeafValue> for ParameterValue {
    fn from(v: LeafValue) -> Self { Self::Leaf(v) }
}

impl From<f64> for ParameterValue {
    fn from(x: f64) -> Self { Self::Leaf(LeafValue::Real(x)) }
}

impl From<C64> for ParameterValue {
    fn from(z: C64) -> Self { Self::Leaf(LeafValue::Complex(z)) }
}

impl From<Vec<f64>> for ParameterValue {
    fn from(xs: Vec<f64>) -> Self { Self::Leaf(LeafValue::Array(xs)) }
}

impl From<&str> for ParameterValue {
    fn from(s: &str) -> Self { Self::Compound(s.to_string()) }
}

impl From<String> for ParameterValue {
    fn from(s: String) -> Self { Self::Compound(s) }
}

/// A registered parameter.
#[derive(Clone, Debug, PartialEq)]
pub enum Parameter {
    Leaf(LeafValue),
    Compound { source: String, expr: Expr },
}

impl Parameter {
    pub fn is_leaf(&self) -> bool { matches!(self, Self::Leaf(_)) }

    pub fn is_compound(&self) -> bool { matches!(self, Self::Compound { .. }) }

    fn kind(&self) -> &'static str {
        match self {
            Self::Leaf(_) => "leaf",
            Self::Compound { .. } => "compound",
        }
    }
}

/// Ordered, type-locked collection of ODE parameters.
///
/// Leaves keep their declaration order, which is also their order in the
/// parameter vector. Compounds are kept in a topological order of their
/// dependencies, computed once at construction.
#[derive(Clone, Debug, PartialEq)]
pub struct OdeParameters {
    parameters: IndexMap<String, Parameter>,
    order: Vec<String>,
}

fn is_identifier(name: &str) -> bool {
    matches!(Expr::parse(name), Ok(Expr::Symbol(s)) if s == name)
}

impl OdeParameters {
    /// Build a registry from `(name, value)` pairs, where string values are
    /// compound expressions.
    ///
    /// Fails if a name is reserved, invalid, or repeated; if any compound
    /// does not parse; if any compound refers to symbols that are neither
    /// parameters nor `t` (all such symbols are reported at once); or if the
    /// compounds depend on each other cyclically.
    pub fn new<I, K, V>(parameters: I) -> ObeResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<ParameterValue>,
    {
        let mut params: IndexMap<String, Parameter> = IndexMap::new();
        for (name, value) in parameters.into_iter() {
            let name: String = name.into();
            if RESERVED.contains(&name.as_str()) {
                return Err(ObeError::ReservedName(name));
            }
            if !is_identifier(&name) {
                return Err(ObeError::InvalidConfig(
                    format!("`{name}` is not a valid parameter name")));
            }
            if params.contains_key(&name) {
                return Err(ObeError::DuplicateParameter(name));
            }
            let param
                = match value.into() {
                    ParameterValue::Leaf(leaf) => Parameter::Leaf(leaf),
                    ParameterValue::Compound(source) => {
                        let expr = Expr::parse(&source)?;
                        Parameter::Compound { source, expr }
                    },
                };
            params.insert(name, param);
        }

        let missing: Vec<String>
            = params.values()
            .filter_map(|p| match p {
                Parameter::Compound { expr, .. } => Some(expr.free_symbols()),
                Parameter::Leaf(_) => None,
            })
            .flatten()
            .filter(|s| s != TIME && !params.contains_key(s))
            .collect();
        if !missing.is_empty() {
            return Err(undefined("compound parameters", missing));
        }

        let order = topological_order(&params)?;
        Ok(Self { parameters: params, order })
    }

    pub fn len(&self) -> usize { self.parameters.len() }

    pub fn is_empty(&self) -> bool { self.parameters.is_empty() }

    pub fn contains(&self, name: &str) -> bool { self.parameters.contains_key(name) }

    pub fn get(&self, name: &str) -> Option<&Parameter> { self.parameters.get(name) }

    /// Iterate over all parameters in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Parameter)> {
        self.parameters.iter()
    }

    /// Iterate over leaf parameters in parameter-vector order.
    pub fn leaves(&self) -> impl Iterator<Item = (&String, &LeafValue)> {
        self.parameters.iter()
            .filter_map(|(name, p)| match p {
                Parameter::Leaf(v) => Some((name, v)),
                Parameter::Compound { .. } => None,
            })
    }

    /// Iterate over compound parameters in evaluation order.
    pub fn compounds(&self) -> impl Iterator<Item = (&String, &Expr)> {
        self.order.iter()
            .filter_map(|name| match self.parameters.get(name) {
                Some(Parameter::Compound { expr, .. }) => Some((name, expr)),
                _ => None,
            })
    }

    /// Names of compound parameters in evaluation order.
    pub fn compound_order(&self) -> &[String] { &self.order }

    pub fn leaf(&self, name: &str) -> ObeResult<&LeafValue> {
        match self.parameters.get(name) {
            Some(Parameter::Leaf(v)) => Ok(v),
            Some(Parameter::Compound { .. }) => Err(ObeError::NotALeaf(name.to_string())),
            None => Err(ObeError::UnknownParameter(name.to_string())),
        }
    }

    /// Update a parameter.
    ///
    /// Leaves accept any numeric value but never an expression; compounds
    /// cannot be changed at all.
    pub fn set<V>(&mut self, name: &str, value: V) -> ObeResult<()>
    where V: Into<ParameterValue>
    {
        let value: ParameterValue = value.into();
        let param
            = self.parameters.get_mut(name)
            .ok_or_else(|| ObeError::UnknownParameter(name.to_string()))?;
        match (param, value) {
            (Parameter::Leaf(v), ParameterValue::Leaf(new)) => {
                *v = new;
                Ok(())
            },
            (Parameter::Compound { .. }, ParameterValue::Compound(_)) => {
                Err(ObeError::FrozenCompound(name.to_string()))
            },
            (param, value) => Err(ObeError::TypeLock {
                name: name.to_string(),
                expected: param.kind(),
                found: value.kind(),
            }),
        }
    }

    /// Update a leaf parameter.
    pub fn set_leaf<V>(&mut self, name: &str, value: V) -> ObeResult<()>
    where V: Into<LeafValue>
    {
        self.set(name, ParameterValue::Leaf(value.into()))
    }

    /// Leaf values in parameter-vector order.
    pub fn generate_p(&self) -> Vec<LeafValue> {
        self.leaves().map(|(_, v)| v.clone()).collect()
    }

    /// Alias for [`Self::generate_p`].
    pub fn p(&self) -> Vec<LeafValue> { self.generate_p() }

    /// Position of a leaf parameter in the parameter vector.
    pub fn get_index_parameter(&self, name: &str, mode: IndexMode) -> ObeResult<usize> {
        self.leaf(name)?;
        let k = self.leaves()
            .position(|(n, _)| n == name)
            .ok_or_else(|| ObeError::UnknownParameter(name.to_string()))?;
        Ok(k + mode.offset())
    }

    /// Check that every symbol is a parameter or `t`, reporting all that are
    /// not.
    pub fn check_symbols_in_parameters<I, T>(&self, symbols: I) -> ObeResult<()>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let missing: Vec<String>
            = symbols.into_iter()
            .filter(|s| s.as_ref() != TIME && !self.contains(s.as_ref()))
            .map(|s| s.as_ref().to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(undefined("parameters", missing))
        }
    }

    /// Check that the Rabi rate, detuning, and polarization symbols of every
    /// transition are parameters, reporting all that are not.
    pub fn check_transition_symbols<S>(&self, transitions: &[TransitionSelector<S>])
        -> ObeResult<()>
    where S: BasisState
    {
        let missing: Vec<String>
            = transitions.iter()
            .flat_map(|tr| tr.symbols())
            .filter(|s| !self.contains(s))
            .map(String::from)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(undefined("transitions", missing))
        }
    }

    /// Expand every compound parameter in `expr` into its defining
    /// expression, recursively.
    pub fn inline(&self, expr: &Expr) -> Expr {
        expr.substitute(&|name: &str| match self.parameters.get(name) {
            Some(Parameter::Compound { expr, .. }) => Some(self.inline(expr)),
            _ => None,
        })
    }

    /// Evaluate a parameter numerically at time `t`.
    pub fn get_parameter_evaluation(&self, name: &str, t: f64) -> ObeResult<C64> {
        match self.parameters.get(name) {
            Some(Parameter::Leaf(v)) => v.as_scalar()
                .ok_or_else(|| ObeError::Evaluation(
                    format!("`{name}` is an array parameter"))),
            Some(Parameter::Compound { expr, .. }) => self.evaluate(expr, t),
            None => Err(ObeError::UnknownParameter(name.to_string())),
        }
    }

    /// Evaluate an arbitrary expression over the registry at time `t`.
    pub fn evaluate(&self, expr: &Expr, t: f64) -> ObeResult<C64> {
        self.check_symbols_in_parameters(expr.free_symbols())?;
        let inlined = self.inline(expr);
        inlined.eval(&|name: &str| {
            if name == TIME {
                Some(C64::from(t))
            } else {
                self.parameters.get(name)
                    .and_then(|p| match p {
                        Parameter::Leaf(v) => v.as_scalar(),
                        Parameter::Compound { .. } => None,
                    })
            }
        })
    }

    /// Julia assignment of the parameter vector, `p = [...]`.
    pub fn to_julia(&self) -> String {
        let items: Vec<String>
            = self.leaves().map(|(_, v)| v.to_julia()).collect();
        format!("p = [{}]", items.join(", "))
    }
}

fn topological_order(params: &IndexMap<String, Parameter>) -> ObeResult<Vec<String>> {
    // compound -> compounds it depends on, by declaration index
    let compounds: Vec<(usize, &Expr)>
        = params.values().enumerate()
        .filter_map(|(k, p)| match p {
            Parameter::Compound { expr, .. } => Some((k, expr)),
            Parameter::Leaf(_) => None,
        })
        .collect();
    let deps: IndexMap<usize, Vec<usize>>
        = compounds.iter()
        .map(|(k, expr)| {
            let d: Vec<usize>
                = expr.free_symbols().iter()
                .filter_map(|s| params.get_index_of(s.as_str()))
                .filter(|j| params[*j].is_compound())
                .collect();
            (*k, d)
        })
        .collect();
    let mut remaining: IndexMap<usize, usize>
        = deps.iter().map(|(k, d)| (*k, d.len())).collect();
    let mut ready: BTreeSet<usize>
        = remaining.iter().filter(|(_, n)| **n == 0).map(|(k, _)| *k).collect();
    let mut order: Vec<String> = Vec::with_capacity(deps.len());
    while let Some(k) = ready.pop_first() {
        remaining.shift_remove(&k);
        order.push(params.get_index(k).map(|(n, _)| n.clone()).unwrap_or_default());
        for (j, d) in deps.iter() {
            if !d.contains(&k) { continue; }
            if let Some(n) = remaining.get_mut(j) {
                *n -= d.iter().filter(|x| **x == k).count();
                if *n == 0 { ready.insert(*j); }
            }
        }
    }
    if remaining.is_empty() {
        Ok(order)
    } else {
        let cycle: Vec<String>
            = remaining.keys()
            .filter_map(|k| params.get_index(*k).map(|(n, _)| n.clone()))
            .collect();
        Err(ObeError::CyclicDependency(cycle))
    }
}

impl fmt::Display for OdeParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OdeParameters(")?;
        let n = self.parameters.len();
        for (k, (name, p)) in self.parameters.iter().enumerate() {
            match p {
                Parameter::Leaf(LeafValue::Real(x)) => write!(f, "{name}: {x:.2e}")?,
                Parameter::Leaf(LeafValue::Complex(z)) => write!(f, "{name}: {z:.2e}")?,
                Parameter::Leaf(LeafValue::Array(xs)) => write!(f, "{name}: [{} values]", xs.len())?,
                Parameter::Compound { source, .. } => write!(f, "{name} = {source}")?,
            }
            if k + 1 < n { write!(f, ", ")?; }
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> OdeParameters {
        OdeParameters::new([
            ("Ω", ParameterValue::from(1.0)),
            ("δ", ParameterValue::from(0.0)),
            ("Γ", ParameterValue::from(1.0)),
            ("ϕ", ParameterValue::from("Ω*0+δ")),
        ])
        .unwrap()
    }

    #[test]
    fn registry_scenario() {
        let mut par = scenario();
        assert_eq!(par.compound_order(), &["ϕ".to_string()]);
        assert_eq!(
            par.p(),
            vec![LeafValue::Real(1.0), LeafValue::Real(0.0), LeafValue::Real(1.0)],
        );
        assert!(matches!(par.set("Ω", "2*δ"), Err(ObeError::TypeLock { .. })));
        par.set("Ω", 2.0).unwrap();
        assert_eq!(par.p()[0], LeafValue::Real(2.0));
        assert!(matches!(par.set("ϕ", 3.0), Err(ObeError::TypeLock { .. })));
        assert!(matches!(par.set("ϕ", "δ"), Err(ObeError::FrozenCompound(_))));
    }

    #[test]
    fn compounds_are_topologically_ordered() {
        let par = OdeParameters::new([
            ("c", ParameterValue::from("b + a")),
            ("a", ParameterValue::from(1.0)),
            ("b", ParameterValue::from("2*a + d")),
            ("d", ParameterValue::from("a*t")),
        ])
        .unwrap();
        assert_eq!(par.compound_order(), &["d", "b", "c"].map(String::from));
        assert!((par.get_parameter_evaluation("c", 2.0).unwrap() - C64::from(5.0)).norm() < 1e-12);
    }

    #[test]
    fn closure_errors_are_batched() {
        let res = OdeParameters::new([
            ("a", ParameterValue::from(1.0)),
            ("b", ParameterValue::from("x + a*y")),
            ("c", ParameterValue::from("sin(y) + z + t")),
        ]);
        match res {
            Err(ObeError::UndefinedSymbols { symbols, .. }) => {
                assert_eq!(symbols, vec!["x", "y", "z"]);
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cycles_are_rejected() {
        let res = OdeParameters::new([
            ("a", ParameterValue::from("b + 1")),
            ("b", ParameterValue::from("a - 1")),
            ("c", ParameterValue::from(1.0)),
        ]);
        assert!(matches!(res, Err(ObeError::CyclicDependency(names)) if names == ["a", "b"]));
    }

    #[test]
    fn reserved_and_duplicate_names() {
        assert!(matches!(
            OdeParameters::new([("t", 1.0)]),
            Err(ObeError::ReservedName(_)),
        ));
        assert!(matches!(
            OdeParameters::new([("a", 1.0), ("a", 2.0)]),
            Err(ObeError::DuplicateParameter(_)),
        ));
        assert!(matches!(
            OdeParameters::new([("2a", 1.0)]),
            Err(ObeError::InvalidConfig(_)),
        ));
    }

    #[test]
    fn indices_follow_leaf_order() {
        let par = scenario();
        assert_eq!(par.get_index_parameter("δ", IndexMode::Native).unwrap(), 1);
        assert_eq!(par.get_index_parameter("Γ", IndexMode::Julia).unwrap(), 3);
        assert!(matches!(
            par.get_index_parameter("ϕ", IndexMode::Native),
            Err(ObeError::NotALeaf(_)),
        ));
        assert_eq!(par.to_julia(), "p = [1.0, 0.0, 1.0]");
    }

    #[test]
    fn symbol_checks_report_everything() {
        let par = scenario();
        assert!(par.check_symbols_in_parameters(["Ω", "t", "ϕ"]).is_ok());
        match par.check_symbols_in_parameters(["q", "Ω", "a", "q"]) {
            Err(ObeError::UndefinedSymbols { symbols, .. }) => {
                assert_eq!(symbols, vec!["a", "q"]);
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn inline_expands_compounds() {
        let par = OdeParameters::new([
            ("a", ParameterValue::from(1.0)),
            ("b", ParameterValue::from("a + 1")),
            ("c", ParameterValue::from("2*b")),
        ])
        .unwrap();
        let e = par.inline(&Expr::parse("c*t").unwrap());
        assert_eq!(e.to_string(), "2.0*(a + 1.0)*t");
    }
}
