//! Construction, solution, and retrieval of single and ensemble solves.
//!
//! A solve moves through the stages *configured → problem-built → solved →
//! results-retrieved*. Each stage is driven through a [`SolverContext`]; the
//! values returned here are receipts naming the objects bound in the
//! external runtime.

use std::{ fs::File, path::Path };
use itertools::Itertools;
use ndarray as nd;
use ndarray_npy::NpzWriter;
use num_complex::Complex64 as C64;
use rand::{ seq::SliceRandom, RngCore };
use tracing::{ debug, info };
use crate::{
    codegen::{ julia_real, IndexMode, KERNEL_NAME },
    config::SolverConfig,
    error::{ ObeError, ObeResult },
    parameters::{ LeafValue, OdeParameters, TIME },
    session::{ Session, SolverContext },
    symbolic::Expr,
};

/* Single problems ************************************************************/

/// A problem bound in the external runtime.
#[derive(Clone, Debug, PartialEq)]
pub struct Problem {
    pub name: String,
    pub tspan: (f64, f64),
    pub n_states: usize,
}

/// Bind the parameter vector, initial density matrix `rho`, and time span into
/// an `ODEProblem` called `name`.
pub fn setup_problem<S>(
    ctx: &mut SolverContext<S>,
    ode_parameters: &OdeParameters,
    rho: nd::ArrayView2<'_, C64>,
    tspan: (f64, f64),
    name: &str,
) -> ObeResult<Problem>
where S: Session
{
    let (n, m) = rho.dim();
    if n != m {
        return Err(ObeError::Shape(
            format!("initial density matrix must be square, got {n}×{m}")));
    }
    if !(tspan.1 > tspan.0) {
        return Err(ObeError::InvalidConfig(
            format!("empty time span {tspan:?}")));
    }
    ctx.load_parameters(ode_parameters)?;
    ctx.set_complex("ρ", rho)?;
    ctx.eval_everywhere("ρ = $ρ")?;
    ctx.eval(&format!(
        "tspan = ({}, {})", julia_real(tspan.0), julia_real(tspan.1)))?;
    ctx.eval(&format!("{name} = ODEProblem({KERNEL_NAME}, ρ, tspan, p)"))?;
    debug!("setup_problem: {name} over {n} states");
    Ok(Problem { name: name.to_string(), tspan, n_states: n })
}

/* Scans **********************************************************************/

/// One dimension of a parameter scan. Every parameter on an axis takes the
/// same value in a given trajectory.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanAxis {
    pub parameters: Vec<String>,
    pub values: Vec<f64>,
}

impl ScanAxis {
    pub fn new<I, T>(parameters: I, values: Vec<f64>) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self { parameters: parameters.into_iter().map(Into::into).collect(), values }
    }

    pub fn len(&self) -> usize { self.values.len() }

    pub fn is_empty(&self) -> bool { self.values.is_empty() }
}

/// The trajectories of an ensemble solve.
///
/// `grid` holds one row per trajectory, in the order submitted to the solver,
/// and one column per axis. Initial-condition scans carry no axes and a grid
/// with zero columns.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanRequest {
    pub axes: Vec<ScanAxis>,
    pub grid: nd::Array2<f64>,
    pub shape: Vec<usize>,
    /// Row `j` of `grid` is row `permutation[j]` of the unshuffled grid.
    pub permutation: Option<Vec<usize>>,
}

impl ScanRequest {
    /// Build the outer-product grid over `axes`, with the last axis varying
    /// fastest.
    pub fn outer_product(axes: Vec<ScanAxis>) -> ObeResult<Self> {
        if axes.is_empty() {
            return Err(ObeError::InvalidConfig("scan needs at least one axis".into()));
        }
        if let Some(axis) = axes.iter().find(|a| a.is_empty() || a.parameters.is_empty()) {
            return Err(ObeError::InvalidConfig(format!(
                "scan axis over {:?} has no values or no parameters", axis.parameters)));
        }
        let shape: Vec<usize> = axes.iter().map(ScanAxis::len).collect();
        let N: usize = shape.iter().product();
        let d = axes.len();
        let flat: Vec<f64>
            = axes.iter()
            .map(|a| a.values.iter().copied())
            .multi_cartesian_product()
            .flatten()
            .collect();
        let grid = nd::Array2::from_shape_vec((N, d), flat)?;
        Ok(Self { axes, grid, shape, permutation: None })
    }

    /// Shuffle trajectory order, recording the permutation.
    pub fn shuffled(mut self, rng: &mut dyn RngCore) -> Self {
        let mut perm: Vec<usize> = (0..self.len()).collect();
        perm.shuffle(rng);
        self.grid = permute(&self.grid, &perm);
        self.permutation = Some(perm);
        self
    }

    /// Number of trajectories.
    pub fn len(&self) -> usize { self.grid.nrows() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn is_randomized(&self) -> bool { self.permutation.is_some() }

    /// Grid rows in unshuffled order.
    pub fn ordered_grid(&self) -> nd::Array2<f64> {
        match &self.permutation {
            Some(perm) => restore_permutation(&self.grid, perm),
            None => self.grid.clone(),
        }
    }

    /// Coordinate meshes over the scan shape, with matrix (`ij`) indexing.
    pub fn coordinates(&self) -> Vec<nd::ArrayD<f64>> {
        let shape = nd::IxDyn(&self.shape);
        self.axes.iter().enumerate()
            .map(|(d, axis)| {
                nd::ArrayD::from_shape_fn(shape.clone(), |idx| axis.values[idx[d]])
            })
            .collect()
    }
}

/// Reorder along the first axis so that element `j` is `x[permutation[j]]`.
pub fn permute<A, S, D>(x: &nd::ArrayBase<S, D>, permutation: &[usize]) -> nd::Array<A, D>
where
    A: Clone,
    S: nd::Data<Elem = A>,
    D: nd::RemoveAxis,
{
    x.select(nd::Axis(0), permutation)
}

/// Invert [`permute`].
pub fn restore_permutation<A, S, D>(x: &nd::ArrayBase<S, D>, permutation: &[usize])
    -> nd::Array<A, D>
where
    A: Clone,
    S: nd::Data<Elem = A>,
    D: nd::RemoveAxis,
{
    let mut inverse: Vec<usize> = vec![0; permutation.len()];
    permutation.iter().enumerate()
        .for_each(|(j, &k)| { inverse[k] = j; });
    x.select(nd::Axis(0), &inverse)
}

/// Julia `prob_func` replacing the swept leaves of `p` with row `i` of
/// `params`.
fn prob_func_parameters(ode_parameters: &OdeParameters, axes: &[ScanAxis])
    -> ObeResult<String>
{
    let mut entries: Vec<String>
        = (1..=ode_parameters.leaves().count())
        .map(|k| format!("prob.p[{k}]"))
        .collect();
    for (d, axis) in axes.iter().enumerate() {
        for name in axis.parameters.iter() {
            match ode_parameters.leaf(name)? {
                LeafValue::Real(_) => {},
                other => {
                    return Err(ObeError::TypeLock {
                        name: name.clone(),
                        expected: other.kind(),
                        found: "real",
                    });
                },
            }
            let k = ode_parameters.get_index_parameter(name, IndexMode::Native)?;
            entries[k] = format!("params[i, {}]", d + 1);
        }
    }
    Ok(format!(
        "function prob_func(prob, i, repeat)\n\
        \tremake(prob, p = [{}])\n\
        end",
        entries.join(", "),
    ))
}

fn bind_parameter_scan<S>(
    ctx: &mut SolverContext<S>,
    ode_parameters: &OdeParameters,
    request: &ScanRequest,
) -> ObeResult<()>
where S: Session
{
    let prob_func = prob_func_parameters(ode_parameters, &request.axes)?;
    ctx.set_real("params", request.grid.view())?;
    ctx.eval_everywhere("params = $params")?;
    ctx.eval_everywhere(&prob_func)?;
    info!(
        "parameter scan over {} trajectories, shape {:?}{}",
        request.len(), request.shape,
        if request.is_randomized() { ", randomized" } else { "" },
    );
    Ok(())
}

/// Sweep one or more leaf parameters together over `values`.
pub fn setup_parameter_scan_1d<S, T>(
    ctx: &mut SolverContext<S>,
    ode_parameters: &OdeParameters,
    parameters: &[T],
    values: &[f64],
) -> ObeResult<ScanRequest>
where
    S: Session,
    T: AsRef<str>,
{
    let axis = ScanAxis::new(parameters.iter().map(|p| p.as_ref()), values.to_vec());
    let request = ScanRequest::outer_product(vec![axis])?;
    bind_parameter_scan(ctx, ode_parameters, &request)?;
    Ok(request)
}

/// Sweep leaf parameters over the outer product of `axes`, optionally
/// shuffling trajectory order with `rng`.
pub fn setup_parameter_scan_nd<S>(
    ctx: &mut SolverContext<S>,
    ode_parameters: &OdeParameters,
    axes: Vec<ScanAxis>,
    rng: Option<&mut dyn RngCore>,
) -> ObeResult<ScanRequest>
where S: Session
{
    let mut request = ScanRequest::outer_product(axes)?;
    if let Some(rng) = rng {
        request = request.shuffled(rng);
    }
    bind_parameter_scan(ctx, ode_parameters, &request)?;
    Ok(request)
}

/// Solve once per initial density matrix in `values`.
pub fn setup_initial_condition_scan<S>(
    ctx: &mut SolverContext<S>,
    values: &[nd::Array2<C64>],
) -> ObeResult<ScanRequest>
where S: Session
{
    let Some(first) = values.first() else {
        return Err(ObeError::InvalidConfig("no initial conditions given".into()));
    };
    let (n, m) = first.dim();
    if n != m || values.iter().any(|rho| rho.dim() != (n, m)) {
        return Err(ObeError::Shape(
            "initial conditions must be square and of equal size".into()));
    }
    let N = values.len();
    let params: nd::Array3<C64>
        = nd::Array3::from_shape_fn((n, n, N), |(i, j, k)| values[k][[i, j]]);
    ctx.set_complex("params", params.view())?;
    ctx.eval_everywhere("params = $params")?;
    ctx.eval_everywhere(
        "function prob_func(prob, i, repeat)\n\
        \tremake(prob, u0 = params[:, :, i])\n\
        end"
    )?;
    info!("initial condition scan over {N} trajectories");
    Ok(ScanRequest {
        axes: Vec::new(),
        grid: nd::Array2::zeros((N, 0)),
        shape: vec![N],
        permutation: None,
    })
}

/// Reduction applied to each trajectory of an ensemble solve.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputFunction {
    /// Time integral of the total population of the given states.
    StateIntegral(Vec<usize>),
    /// Final-to-initial ratios of the first state's population and of the
    /// total population of the given states. Requires a solve saving exactly
    /// two time points.
    Ratio(Vec<usize>),
}

impl OutputFunction {
    pub fn to_julia(&self) -> String {
        let states = |idx: &[usize]| -> String {
            format!("[{}]", idx.iter().map(|k| k + 1).join(", "))
        };
        match self {
            Self::StateIntegral(idx) => format!(
                "function output_func(sol, i)\n\
                \treturn trapz(sol.t, [real(sum(diag(sol.u[j])[{s}])) for j in 1:size(sol)[3]]), false\n\
                end",
                s = states(idx),
            ),
            Self::Ratio(idx) => format!(
                "function output_func(sol, i)\n\
                \tif size(sol.u)[1] != 2\n\
                \t\treturn NaN, false\n\
                \telse\n\
                \t\tval = [\n\
                \t\t\treal(sol.u[2][1, 1]) / real(sol.u[1][1, 1]),\n\
                \t\t\tsum(real(diag(sol.u[2])[{s}])) / sum(real(diag(sol.u[1])[{s}])),\n\
                \t\t]\n\
                \t\treturn val, false\n\
                \tend\n\
                end",
                s = states(idx),
            ),
        }
    }

    fn states(&self) -> &[usize] {
        match self {
            Self::StateIntegral(idx) | Self::Ratio(idx) => idx,
        }
    }
}

/// Define `output_func` on every worker.
pub fn setup_output_function<S>(
    ctx: &mut SolverContext<S>,
    output: &OutputFunction,
    n_states: usize,
) -> ObeResult<()>
where S: Session
{
    if output.states().is_empty() {
        return Err(ObeError::InvalidConfig("output function selects no states".into()));
    }
    if let Some(k) = output.states().iter().find(|k| **k >= n_states) {
        return Err(ObeError::Shape(format!(
            "output state index {k} out of bounds for {n_states} states")));
    }
    ctx.eval_everywhere(&output.to_julia())
}

/// An ensemble problem bound in the external runtime.
#[derive(Clone, Debug, PartialEq)]
pub struct EnsembleProblem {
    pub name: String,
    pub problem: String,
    pub trajectories: usize,
    pub output: Option<OutputFunction>,
}

/// Wrap `problem` into an `EnsembleProblem` over the trajectories of
/// `request`.
pub fn setup_problem_parameter_scan<S>(
    ctx: &mut SolverContext<S>,
    problem: &Problem,
    request: &ScanRequest,
    output: Option<OutputFunction>,
    name: &str,
) -> ObeResult<EnsembleProblem>
where S: Session
{
    let code = match &output {
        Some(out) => {
            setup_output_function(ctx, out, problem.n_states)?;
            format!(
                "{name} = EnsembleProblem({}, prob_func = prob_func, output_func = output_func)",
                problem.name,
            )
        },
        None => format!("{name} = EnsembleProblem({}, prob_func = prob_func)", problem.name),
    };
    ctx.eval(&code)?;
    Ok(EnsembleProblem {
        name: name.to_string(),
        problem: problem.name.clone(),
        trajectories: request.len(),
        output,
    })
}

/* Callbacks ******************************************************************/

/// A termination callback bound on every worker.
#[derive(Clone, Debug, PartialEq)]
pub struct Callback {
    pub name: String,
    /// The stopping condition in terms of `integrator.p` and `t`.
    pub condition: Expr,
}

/// Compile `expression` into a `DiscreteCallback` that terminates the
/// integrator as soon as it holds.
///
/// Compound parameters are inlined and leaves are read from the integrator's
/// parameter vector, so the condition follows per-trajectory remapping.
pub fn setup_discrete_callback_terminate<S>(
    ctx: &mut SolverContext<S>,
    ode_parameters: &OdeParameters,
    expression: &str,
    name: &str,
) -> ObeResult<Callback>
where S: Session
{
    let expr = Expr::parse(expression)?;
    ode_parameters.check_symbols_in_parameters(expr.free_symbols())?;
    let inlined = ode_parameters.inline(&expr);
    let leaf_indices: Vec<(String, usize)>
        = inlined.free_symbols().into_iter()
        .filter(|s| s != TIME)
        .map(|s| {
            let k = ode_parameters.get_index_parameter(&s, IndexMode::Julia)?;
            Ok((s, k))
        })
        .collect::<ObeResult<_>>()?;
    let condition = inlined.substitute(&|s: &str| {
        leaf_indices.iter()
            .find(|(name, _)| name == s)
            .map(|(_, k)| Expr::Index("integrator.p".into(), *k))
    });
    ctx.eval_everywhere(&format!("condition(u, t, integrator) = {condition}"))?;
    ctx.eval_everywhere("affect!(integrator) = terminate!(integrator)")?;
    ctx.eval_everywhere(&format!("{name} = DiscreteCallback(condition, affect!)"))?;
    debug!("setup_discrete_callback_terminate: {name} on {condition}");
    Ok(Callback { name: name.to_string(), condition })
}

/* Solving ********************************************************************/

/// Keyword arguments of a solve call.
#[derive(Clone, Debug, PartialEq)]
pub struct SolveOptions {
    pub method: String,
    pub abstol: f64,
    pub reltol: f64,
    pub dt: f64,
    pub dtmax: Option<f64>,
    pub save_everystep: bool,
    pub distributed_method: String,
    /// Name of a bound callback.
    pub callback: Option<String>,
    /// Times at which to save, in place of every step.
    pub saveat: Option<Vec<f64>>,
}

impl From<&SolverConfig> for SolveOptions {
    fn from(config: &SolverConfig) -> Self {
        Self {
            method: config.method.clone(),
            abstol: config.abstol,
            reltol: config.reltol,
            dt: config.dt,
            dtmax: config.dtmax,
            save_everystep: config.save_everystep,
            distributed_method: config.distributed_method.clone(),
            callback: None,
            saveat: None,
        }
    }
}

impl SolveOptions {
    pub fn with_callback(mut self, callback: &Callback) -> Self {
        self.callback = Some(callback.name.clone());
        self
    }

    pub fn with_saveat(mut self, saveat: Vec<f64>) -> Self {
        self.saveat = Some(saveat);
        self
    }

    fn keywords(&self) -> String {
        let mut kw: Vec<String> = vec![
            format!("abstol = {}", julia_real(self.abstol)),
            format!("reltol = {}", julia_real(self.reltol)),
            format!("dt = {}", julia_real(self.dt)),
            format!("save_everystep = {}", self.save_everystep),
        ];
        if let Some(dtmax) = self.dtmax {
            kw.push(format!("dtmax = {}", julia_real(dtmax)));
        }
        if let Some(saveat) = &self.saveat {
            kw.push(format!("saveat = [{}]", saveat.iter().map(|t| julia_real(*t)).join(", ")));
        }
        if let Some(cb) = &self.callback {
            kw.push(format!("callback = {cb}"));
        }
        kw.join(", ")
    }
}

/// A solution bound in the external runtime.
#[derive(Clone, Debug, PartialEq)]
pub struct Solution {
    pub name: String,
    pub n_states: usize,
}

/// Solve a single problem, binding the result to `sol`.
pub fn solve_problem<S>(
    ctx: &mut SolverContext<S>,
    problem: &Problem,
    options: &SolveOptions,
) -> ObeResult<Solution>
where S: Session
{
    info!("solving {} with {}", problem.name, options.method);
    ctx.eval(&format!(
        "sol = solve({}, {}; {})",
        problem.name, options.method, options.keywords(),
    ))?;
    Ok(Solution { name: "sol".into(), n_states: problem.n_states })
}

/// Solve an ensemble problem with the distributed strategy of `options`,
/// binding the result to `sol`.
pub fn solve_problem_parameter_scan<S>(
    ctx: &mut SolverContext<S>,
    problem: &Problem,
    ensemble: &EnsembleProblem,
    options: &SolveOptions,
) -> ObeResult<Solution>
where S: Session
{
    info!(
        "solving {} over {} trajectories with {}",
        ensemble.name, ensemble.trajectories, options.distributed_method,
    );
    ctx.eval(&format!(
        "sol = solve({}, {}, {}; trajectories = {}, {})",
        ensemble.name, options.method, options.distributed_method,
        ensemble.trajectories, options.keywords(),
    ))?;
    Ok(Solution { name: "sol".into(), n_states: problem.n_states })
}

/* Results ********************************************************************/

/// Fetch the time points and the populations `[state, time]` of a single
/// solution.
pub fn get_results<S>(ctx: &mut SolverContext<S>, solution: &Solution)
    -> ObeResult<(nd::Array1<f64>, nd::Array2<f64>)>
where S: Session
{
    let t: nd::Array1<f64>
        = ctx.get_real(&format!("{}.t", solution.name))?
        .into_dimensionality::<nd::Ix1>()?;
    let rho: nd::Array3<C64>
        = ctx.get_complex(&format!("cat({}.u..., dims = 3)", solution.name))?
        .into_dimensionality::<nd::Ix3>()?;
    let (n, m, nt) = rho.dim();
    if n != solution.n_states || m != n || nt != t.len() {
        return Err(ObeError::Shape(format!(
            "solution is {n}×{m}×{nt} for {} states and {} time points",
            solution.n_states, t.len(),
        )));
    }
    let populations: nd::Array2<f64>
        = nd::Array2::from_shape_fn((n, nt), |(i, k)| rho[[i, i, k]].re);
    Ok((t, populations))
}

/// Ensemble results reshaped onto the scan grid.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanResults {
    /// Parameters swept along each axis.
    pub parameters: Vec<Vec<String>>,
    /// One coordinate mesh per axis, each of the scan shape.
    pub coordinates: Vec<nd::ArrayD<f64>>,
    /// Shape is the scan shape followed by the shape of each trajectory's
    /// output.
    pub values: nd::ArrayD<f64>,
}

impl ScanResults {
    /// Save coordinates and values as `.npy` arrays in an `.npz` archive.
    pub fn write_npz<P>(&self, path: P) -> ObeResult<()>
    where P: AsRef<Path>
    {
        let mut npz = NpzWriter::new(File::create(path)?);
        for (names, coords) in self.parameters.iter().zip(self.coordinates.iter()) {
            npz.add_array(names.join("_"), coords)?;
        }
        npz.add_array("values", &self.values)?;
        npz.finish()?;
        Ok(())
    }
}

/// Restore the original trajectory order of a shuffled scan, for both the
/// parameter grid and the trajectory-major `values`.
pub fn handle_randomized_ensemble_solution(
    request: &ScanRequest,
    values: &nd::ArrayD<f64>,
) -> ObeResult<(nd::Array2<f64>, nd::ArrayD<f64>)>
{
    if values.ndim() == 0 || values.shape()[0] != request.len() {
        return Err(ObeError::Shape(format!(
            "expected {} trajectories, got shape {:?}", request.len(), values.shape())));
    }
    match &request.permutation {
        Some(perm) => Ok((
            restore_permutation(&request.grid, perm),
            restore_permutation(values, perm),
        )),
        None => Ok((request.grid.clone(), values.clone())),
    }
}

/// Fetch the reduced output of every trajectory and reshape it onto the scan
/// grid, undoing any shuffling.
pub fn get_results_parameter_scan<S>(
    ctx: &mut SolverContext<S>,
    solution: &Solution,
    request: &ScanRequest,
) -> ObeResult<ScanResults>
where S: Session
{
    let raw = ctx.get_real(&format!("{}.u", solution.name))?;
    let (_, values) = handle_randomized_ensemble_solution(request, &raw)?;
    let shape: Vec<usize>
        = request.shape.iter().chain(values.shape()[1..].iter()).copied().collect();
    let values
        = nd::ArrayD::from_shape_vec(nd::IxDyn(&shape), values.iter().copied().collect())?;
    Ok(ScanResults {
        parameters: request.axes.iter().map(|a| a.parameters.clone()).collect(),
        coordinates: request.coordinates(),
        values,
    })
}

#[cfg(test)]
mod tests {
    use rand::{ rngs::StdRng, SeedableRng };
    use super::*;
    use crate::{
        parameters::ParameterValue,
        session::{ tests::MockSession, ScriptSession },
    };

    fn registry() -> OdeParameters {
        OdeParameters::new([
            ("Ω", ParameterValue::from(1.0)),
            ("δ", ParameterValue::from(0.0)),
            ("Γ", ParameterValue::from(1.0)),
            ("ϕ", ParameterValue::from("Ω*0 + δ")),
        ])
        .unwrap()
    }

    fn context() -> SolverContext<MockSession> {
        SolverContext::open(MockSession::default(), SolverConfig::default()).unwrap()
    }

    #[test]
    fn grid_is_row_major_outer_product() {
        let request = ScanRequest::outer_product(vec![
            ScanAxis::new(["Ω"], vec![1.0, 2.0]),
            ScanAxis::new(["δ"], vec![-1.0, 0.0, 1.0]),
        ]).unwrap();
        assert_eq!(request.len(), 6);
        assert_eq!(request.shape, vec![2, 3]);
        assert_eq!(request.grid.row(1).to_vec(), vec![1.0, 0.0]);
        assert_eq!(request.grid.row(3).to_vec(), vec![2.0, -1.0]);
        let coords = request.coordinates();
        assert_eq!(coords[0][[1, 2]], 2.0);
        assert_eq!(coords[1][[1, 2]], 1.0);
    }

    #[test]
    fn shuffled_grid_restores() {
        let request = ScanRequest::outer_product(vec![
            ScanAxis::new(["Ω"], vec![1.0, 2.0, 3.0]),
            ScanAxis::new(["δ"], vec![-1.0, 1.0]),
        ]).unwrap();
        let mut rng = StdRng::seed_from_u64(10546);
        let shuffled = request.clone().shuffled(&mut rng);
        let perm = shuffled.permutation.clone().unwrap();
        for (j, &k) in perm.iter().enumerate() {
            assert_eq!(shuffled.grid.row(j), request.grid.row(k));
        }
        assert_eq!(shuffled.ordered_grid(), request.grid);
    }

    #[test]
    fn scan_remaps_swept_leaves() {
        let par = registry();
        let mut ctx = context();
        let request = setup_parameter_scan_nd(
            &mut ctx,
            &par,
            vec![
                ScanAxis::new(["δ"], vec![0.0, 1.0]),
                ScanAxis::new(["Ω", "Γ"], vec![0.5, 1.0, 1.5]),
            ],
            None,
        ).unwrap();
        assert_eq!(request.len(), 6);
        let session = ctx.close();
        assert_eq!(session.reals["params"].shape(), &[6, 2]);
        assert!(session.code.iter().any(|c| {
            c.contains("remake(prob, p = [params[i, 2], params[i, 1], params[i, 2]])")
        }));
    }

    #[test]
    fn compound_parameters_cannot_be_swept() {
        let par = registry();
        let mut ctx = context();
        let res = setup_parameter_scan_1d(&mut ctx, &par, &["ϕ"], &[0.0, 1.0]);
        assert!(matches!(res, Err(ObeError::NotALeaf(_))));
    }

    #[test]
    fn callback_reads_integrator_parameters() {
        let par = registry();
        let mut ctx = context();
        let cb = setup_discrete_callback_terminate(&mut ctx, &par, "ϕ > 0.5 && t > Γ", "cb")
            .unwrap();
        let rendered = cb.condition.to_string();
        assert!(rendered.contains("integrator.p[2]"));
        assert!(rendered.contains("integrator.p[3]"));
        assert!(!rendered.contains('ϕ'));
        let bad = setup_discrete_callback_terminate(&mut ctx, &par, "x > y + Ω", "cb");
        match bad {
            Err(ObeError::UndefinedSymbols { symbols, .. })
                => assert_eq!(symbols, vec!["x".to_string(), "y".to_string()]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn solve_uses_configured_keywords() {
        let par = registry();
        let mut ctx = SolverContext::open(ScriptSession::new(), SolverConfig::default())
            .unwrap();
        let rho: nd::Array2<C64> = nd::Array2::eye(2);
        let problem = setup_problem(&mut ctx, &par, rho.view(), (0.0, 1e-6), "prob").unwrap();
        let request = setup_parameter_scan_1d(&mut ctx, &par, &["δ"], &[0.0, 1.0]).unwrap();
        let ens = setup_problem_parameter_scan(
            &mut ctx, &problem, &request, Some(OutputFunction::StateIntegral(vec![1])), "ens_prob",
        ).unwrap();
        let options = SolveOptions::from(ctx.config());
        solve_problem_parameter_scan(&mut ctx, &problem, &ens, &options).unwrap();
        let script = ctx.close().script();
        assert!(script.contains("prob = ODEProblem(Lindblad_rhs!, ρ, tspan, p)"));
        assert!(script.contains("diag(sol.u[j])[[2]]"));
        assert!(script.contains(
            "sol = solve(ens_prob, Tsit5(), EnsembleDistributed(); trajectories = 2, "));
        assert!(script.contains("save_everystep = true"));
    }

    #[test]
    fn results_are_reshaped_and_unshuffled() {
        let par = registry();
        let mut ctx = context();
        let mut rng = StdRng::seed_from_u64(7);
        let request = setup_parameter_scan_nd(
            &mut ctx,
            &par,
            vec![
                ScanAxis::new(["Ω"], vec![1.0, 2.0]),
                ScanAxis::new(["δ"], vec![10.0, 20.0, 30.0]),
            ],
            Some(&mut rng),
        ).unwrap();
        // each trajectory reports Ω + δ
        let raw: nd::ArrayD<f64>
            = request.grid.map_axis(nd::Axis(1), |row| row.sum()).into_dyn();
        ctx.session_mut().reals.insert("sol.u".into(), raw);
        let solution = Solution { name: "sol".into(), n_states: 2 };
        let results = get_results_parameter_scan(&mut ctx, &solution, &request).unwrap();
        assert_eq!(results.values.shape(), &[2, 3]);
        assert_eq!(results.values[[1, 0]], 12.0);
        assert_eq!(results.values[[0, 2]], 31.0);
        assert_eq!(results.parameters, vec![vec!["Ω".to_string()], vec!["δ".to_string()]]);
    }

    #[test]
    fn single_results_extract_populations() {
        let mut ctx = context();
        let t = nd::array![0.0, 1.0, 2.0].into_dyn();
        let rho: nd::Array3<C64> = nd::Array3::from_shape_fn((2, 2, 3), |(i, j, k)| {
            if i == j { C64::from(if i == 0 { 1.0 - 0.25 * k as f64 } else { 0.25 * k as f64 }) }
            else { C64::new(0.0, 0.1) }
        });
        ctx.session_mut().reals.insert("sol.t".into(), t);
        ctx.session_mut().complexes.insert("cat(sol.u..., dims = 3)".into(), rho.into_dyn());
        let solution = Solution { name: "sol".into(), n_states: 2 };
        let (t, pop) = get_results(&mut ctx, &solution).unwrap();
        assert_eq!(t.len(), 3);
        assert_eq!(pop.dim(), (2, 3));
        assert_eq!(pop[[1, 2]], 0.5);
        assert_eq!(pop.sum_axis(nd::Axis(0)), nd::array![1.0, 1.0, 1.0]);
    }

    #[test]
    fn initial_condition_scan_stacks_matrices() {
        let mut ctx = context();
        let a: nd::Array2<C64> = nd::Array2::eye(3);
        let b: nd::Array2<C64> = nd::Array2::zeros((3, 3));
        let request = setup_initial_condition_scan(&mut ctx, &[a, b]).unwrap();
        assert_eq!(request.len(), 2);
        assert_eq!(request.shape, vec![2]);
        let session = ctx.close();
        assert_eq!(session.complexes["params"].shape(), &[3, 3, 2]);
        assert_eq!(session.complexes["params"][[1, 1, 0]], C64::from(1.0));
        assert!(setup_initial_condition_scan(&mut context(), &[]).is_err());
    }
}
