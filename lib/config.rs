//! Explicit configuration objects, loadable from TOML.

use std::{ fs, path::Path };
use serde::{ Deserialize, Serialize };
use crate::{
    error::{ ObeError, ObeResult },
    hamiltonian::{ EffectiveRotor, JWindow },
    hilbert::QuantumSelector,
};

/// Settings passed to the external solver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Integrator, as a Julia expression.
    pub method: String,
    pub abstol: f64,
    pub reltol: f64,
    /// Initial step size.
    pub dt: f64,
    /// Maximum step size, if any.
    pub dtmax: Option<f64>,
    pub save_everystep: bool,
    /// Ensemble execution strategy, as a Julia expression.
    pub distributed_method: String,
    /// Number of Julia processes.
    pub nprocs: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            method: "Tsit5()".into(),
            abstol: 1e-7,
            reltol: 1e-4,
            dt: 1e-8,
            dtmax: None,
            save_everystep: true,
            distributed_method: "EnsembleDistributed()".into(),
            nprocs: 1,
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> ObeResult<()> {
        let bad = |msg: String| Err(ObeError::InvalidConfig(msg));
        if self.method.trim().is_empty() {
            return bad("solver method is empty".into());
        }
        if self.distributed_method.trim().is_empty() {
            return bad("ensemble strategy is empty".into());
        }
        if !(self.abstol > 0.0) || !(self.reltol > 0.0) {
            return bad(format!(
                "tolerances must be positive, got abstol = {}, reltol = {}",
                self.abstol, self.reltol,
            ));
        }
        if !(self.dt > 0.0) || self.dtmax.is_some_and(|m| !(m >= self.dt)) {
            return bad(format!("invalid step sizes dt = {}, dtmax = {:?}", self.dt, self.dtmax));
        }
        if self.nprocs == 0 {
            return bad("at least one process is required".into());
        }
        Ok(())
    }
}

/// Physical and computational parameters of the molecular system.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemParameters {
    /// Number of threads used for code generation.
    pub nprocs: usize,
    /// Natural linewidth of the excited manifold.
    #[serde(alias = "Γ")]
    pub gamma: f64,
    /// Ground states included in the system.
    pub ground: QuantumSelector,
    /// Excited states included in the system.
    pub excited: QuantumSelector,
}

impl Default for SystemParameters {
    fn default() -> Self {
        Self {
            nprocs: 1,
            gamma: 1.0,
            ground: QuantumSelector::default(),
            excited: QuantumSelector::default(),
        }
    }
}

impl SystemParameters {
    pub fn validate(&self) -> ObeResult<()> {
        if self.nprocs == 0 {
            return Err(ObeError::InvalidConfig("at least one process is required".into()));
        }
        if !(self.gamma > 0.0) {
            return Err(ObeError::InvalidConfig(
                format!("decay rate must be positive, got {}", self.gamma)));
        }
        if self.ground.J.is_none() || self.excited.J.is_none() {
            return Err(ObeError::InvalidConfig(
                "ground and excited selectors must bound J".into()));
        }
        Ok(())
    }
}

/// Everything needed to build and run one system.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObeConfig {
    pub solver: SolverConfig,
    pub system: SystemParameters,
    pub model: EffectiveRotor,
    pub window: JWindow,
}

impl ObeConfig {
    pub fn from_toml_str(s: &str) -> ObeResult<Self> {
        let config: Self = toml::from_str(s)?;
        config.solver.validate()?;
        config.system.validate()?;
        Ok(config)
    }

    pub fn load<P>(path: P) -> ObeResult<Self>
    where P: AsRef<Path>
    {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hilbert::{ Electronic, QnFilter };

    const CONFIG: &str = r#"
        [solver]
        method = "Vern7()"
        abstol = 1e-9
        nprocs = 6

        [system]
        "Γ" = 1.5615e8
        ground = { electronic = "X", J = [0, 1, 2, 3] }
        excited = { electronic = "B", J = 1, F1 = 1.5, F = 1, P = "+" }

        [model.B]
        offset = 1.0e15
        B_rot = 6.7e9

        [window]
        Jmax = 3
    "#;

    #[test]
    fn loads_partial_config_with_defaults() {
        let config = ObeConfig::from_toml_str(CONFIG).unwrap();
        assert_eq!(config.solver.method, "Vern7()");
        assert_eq!(config.solver.nprocs, 6);
        assert_eq!(config.solver.reltol, 1e-4);
        assert_eq!(config.system.gamma, 1.5615e8);
        assert_eq!(config.system.ground.electronic, Some(Electronic::X));
        assert_eq!(config.system.ground.J, Some(QnFilter::Among(vec![0.0, 1.0, 2.0, 3.0])));
        assert_eq!(config.system.excited.F1, Some(QnFilter::Exact(1.5)));
        assert_eq!(config.model.B.B_rot, 6.7e9);
        assert_eq!(config.model.X.B_rot, 0.0);
        assert_eq!(config.window.Jmax, Some(3));
        assert_eq!(config.window.Jmin, None);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(ObeConfig::from_toml_str("[solver]\nabstol = -1.0\n").is_err());
        assert!(ObeConfig::from_toml_str("[solver]\nnprocs = \"many\"\n").is_err());
        let unbounded = "[system]\nground = { electronic = \"X\" }\n\
            excited = { electronic = \"B\", J = 1 }\n";
        assert!(matches!(
            ObeConfig::from_toml_str(unbounded),
            Err(ObeError::InvalidConfig(_)),
        ));
    }
}
