//! Handles to the external Julia runtime.
//!
//! Everything that talks to Julia goes through a [`Session`], owned by a
//! [`SolverContext`] that is opened once and closed on teardown. The
//! [`ScriptSession`] backend records the emitted program instead of running
//! it, e.g. for submission as a batch job.

use std::{ fs, path::Path };
use ndarray as nd;
use num_complex::Complex64 as C64;
use thiserror::Error;
use tracing::{ info, warn };
use crate::{
    codegen::{ julia_complex, julia_real },
    config::SolverConfig,
    error::ObeResult,
    parameters::OdeParameters,
};

/// Opaque failure reported by the external runtime.
#[derive(Debug, Error)]
#[error("julia session: {0}")]
pub struct SessionError(pub String);

/// An interpreter that evaluates Julia code and exchanges arrays with it.
pub trait Session {
    /// Evaluate code in the global scope.
    fn eval(&mut self, code: &str) -> Result<(), SessionError>;

    /// Bind a real array to a global name.
    fn set_real(&mut self, name: &str, value: nd::ArrayViewD<'_, f64>)
        -> Result<(), SessionError>;

    /// Bind a complex array to a global name.
    fn set_complex(&mut self, name: &str, value: nd::ArrayViewD<'_, C64>)
        -> Result<(), SessionError>;

    /// Evaluate an expression and return its value as a real array.
    fn get_real(&mut self, expr: &str) -> Result<nd::ArrayD<f64>, SessionError>;

    /// Evaluate an expression and return its value as a complex array.
    fn get_complex(&mut self, expr: &str) -> Result<nd::ArrayD<C64>, SessionError>;
}

/// Render an array as a Julia literal. Arrays of two or more dimensions are
/// written in column-major order and reshaped.
pub fn julia_array<A, F>(value: &nd::ArrayViewD<'_, A>, render: F) -> String
where F: Fn(&A) -> String
{
    match value.ndim() {
        0 => value.iter().next().map(&render).unwrap_or_default(),
        1 => {
            let items: Vec<String> = value.iter().map(&render).collect();
            format!("[{}]", items.join(", "))
        },
        _ => {
            let items: Vec<String> = value.t().iter().map(&render).collect();
            let dims: Vec<String>
                = value.shape().iter().map(|d| d.to_string()).collect();
            format!("reshape([{}], {})", items.join(", "), dims.join(", "))
        },
    }
}

/// A session that only records the code it is given.
#[derive(Clone, Debug, Default)]
pub struct ScriptSession {
    lines: Vec<String>,
}

impl ScriptSession {
    pub fn new() -> Self { Self::default() }

    /// Everything recorded so far.
    pub fn lines(&self) -> &[String] { &self.lines }

    /// The recorded program.
    pub fn script(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }

    /// Write the recorded program to a file.
    pub fn write<P>(&self, path: P) -> ObeResult<()>
    where P: AsRef<Path>
    {
        fs::write(path, self.script())?;
        Ok(())
    }
}

impl Session for ScriptSession {
    fn eval(&mut self, code: &str) -> Result<(), SessionError> {
        self.lines.push(code.to_string());
        Ok(())
    }

    fn set_real(&mut self, name: &str, value: nd::ArrayViewD<'_, f64>)
        -> Result<(), SessionError>
    {
        let lit = julia_array(&value, |x| julia_real(*x));
        self.lines.push(format!("{name} = {lit}"));
        Ok(())
    }

    fn set_complex(&mut self, name: &str, value: nd::ArrayViewD<'_, C64>)
        -> Result<(), SessionError>
    {
        let lit = julia_array(&value, |z| julia_complex(*z));
        self.lines.push(format!("{name} = ComplexF64.({lit})"));
        Ok(())
    }

    fn get_real(&mut self, expr: &str) -> Result<nd::ArrayD<f64>, SessionError> {
        Err(SessionError(format!("cannot fetch `{expr}` from a script session")))
    }

    fn get_complex(&mut self, expr: &str) -> Result<nd::ArrayD<C64>, SessionError> {
        Err(SessionError(format!("cannot fetch `{expr}` from a script session")))
    }
}

/// An open connection to the solver runtime together with its settings.
#[derive(Debug)]
pub struct SolverContext<S>
where S: Session
{
    session: S,
    config: SolverConfig,
}

impl<S> SolverContext<S>
where S: Session
{
    /// Validate `config`, then load logging, worker processes, and solver
    /// packages.
    pub fn open(mut session: S, config: SolverConfig) -> ObeResult<Self> {
        config.validate()?;
        let n = config.nprocs;
        session.eval(&format!(
            "using Logging: global_logger\n\
            using TerminalLoggers: TerminalLogger\n\
            global_logger(TerminalLogger())\n\
            using Distributed\n\
            if nprocs() < {n}\n\
            \taddprocs({n} - nprocs())\n\
            elseif nprocs() > {n}\n\
            \trmprocs(procs()[{n} + 1:end])\n\
            end\n\
            @everywhere begin\n\
            \tusing LinearAlgebra\n\
            \tusing Trapz\n\
            \tusing DifferentialEquations\n\
            end"
        ))?;
        info!("initialized julia with {n} processes");
        Ok(Self { session, config })
    }

    pub fn config(&self) -> &SolverConfig { &self.config }

    pub fn config_mut(&mut self) -> &mut SolverConfig { &mut self.config }

    pub fn session(&self) -> &S { &self.session }

    pub fn session_mut(&mut self) -> &mut S { &mut self.session }

    pub fn eval(&mut self, code: &str) -> ObeResult<()> {
        Ok(self.session.eval(code)?)
    }

    /// Evaluate code on every worker.
    pub fn eval_everywhere(&mut self, code: &str) -> ObeResult<()> {
        self.eval(&format!("@everywhere {code}"))
    }

    /// Define the kernel on every worker.
    pub fn define_ode_fun(&mut self, ode_fun: &str) -> ObeResult<()> {
        self.eval_everywhere(ode_fun)
    }

    /// Bind the parameter vector `p`.
    pub fn load_parameters(&mut self, ode_parameters: &OdeParameters) -> ObeResult<()> {
        self.eval(&ode_parameters.to_julia())
    }

    /// Bind a real scalar on every worker.
    pub fn bind_everywhere(&mut self, name: &str, value: f64) -> ObeResult<()> {
        self.eval_everywhere(&format!("{name} = {}", julia_real(value)))
    }

    pub fn set_real<D>(&mut self, name: &str, value: nd::ArrayView<'_, f64, D>)
        -> ObeResult<()>
    where D: nd::Dimension
    {
        Ok(self.session.set_real(name, value.into_dyn())?)
    }

    pub fn set_complex<D>(&mut self, name: &str, value: nd::ArrayView<'_, C64, D>)
        -> ObeResult<()>
    where D: nd::Dimension
    {
        Ok(self.session.set_complex(name, value.into_dyn())?)
    }

    pub fn get_real(&mut self, expr: &str) -> ObeResult<nd::ArrayD<f64>> {
        Ok(self.session.get_real(expr)?)
    }

    pub fn get_complex(&mut self, expr: &str) -> ObeResult<nd::ArrayD<C64>> {
        Ok(self.session.get_complex(expr)?)
    }

    /// Release worker processes and hand back the session.
    pub fn close(mut self) -> S {
        if self.config.nprocs > 1 {
            if let Err(err) = self.session.eval("rmprocs(workers())") {
                warn!("failed to release workers: {err}");
            }
        }
        self.session
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use super::*;

    /// Session returning canned values and recording evaluated code.
    #[derive(Debug, Default)]
    pub(crate) struct MockSession {
        pub code: Vec<String>,
        pub reals: HashMap<String, nd::ArrayD<f64>>,
        pub complexes: HashMap<String, nd::ArrayD<C64>>,
    }

    impl Session for MockSession {
        fn eval(&mut self, code: &str) -> Result<(), SessionError> {
            self.code.push(code.to_string());
            Ok(())
        }

        fn set_real(&mut self, name: &str, value: nd::ArrayViewD<'_, f64>)
            -> Result<(), SessionError>
        {
            self.reals.insert(name.to_string(), value.to_owned());
            Ok(())
        }

        fn set_complex(&mut self, name: &str, value: nd::ArrayViewD<'_, C64>)
            -> Result<(), SessionError>
        {
            self.complexes.insert(name.to_string(), value.to_owned());
            Ok(())
        }

        fn get_real(&mut self, expr: &str) -> Result<nd::ArrayD<f64>, SessionError> {
            self.reals.get(expr).cloned()
                .ok_or_else(|| SessionError(format!("UndefVarError: {expr}")))
        }

        fn get_complex(&mut self, expr: &str) -> Result<nd::ArrayD<C64>, SessionError> {
            self.complexes.get(expr).cloned()
                .ok_or_else(|| SessionError(format!("UndefVarError: {expr}")))
        }
    }

    #[test]
    fn arrays_render_column_major() {
        let a = nd::array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]].into_dyn();
        let lit = julia_array(&a.view(), |x| julia_real(*x));
        assert_eq!(lit, "reshape([1.0, 4.0, 2.0, 5.0, 3.0, 6.0], 2, 3)");
        let v = nd::array![0.5, 1.5].into_dyn();
        assert_eq!(julia_array(&v.view(), |x| julia_real(*x)), "[0.5, 1.5]");
    }

    #[test]
    fn context_records_initialization() {
        let config = SolverConfig { nprocs: 4, ..SolverConfig::default() };
        let mut ctx = SolverContext::open(ScriptSession::new(), config).unwrap();
        ctx.bind_everywhere("Γ", 1.0).unwrap();
        let session = ctx.close();
        let script = session.script();
        assert!(script.contains("addprocs(4 - nprocs())"));
        assert!(script.contains("@everywhere Γ = 1.0"));
        assert!(script.ends_with("rmprocs(workers())\n"));
        assert!(ScriptSession::new().get_real("x").is_err());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = SolverConfig { nprocs: 0, ..SolverConfig::default() };
        assert!(SolverContext::open(ScriptSession::new(), config).is_err());
    }
}
