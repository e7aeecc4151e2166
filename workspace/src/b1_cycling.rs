#![allow(dead_code, non_snake_case, non_upper_case_globals)]

use std::{ env, fs, path::PathBuf };
use ndarray as nd;
use num_complex::Complex64 as C64;
use rand::{ rngs::StdRng, SeedableRng };
use tlf_obe::{
    config::ObeConfig,
    couplings::TransitionSelector,
    hamiltonian::find_state_indices,
    hilbert::{ Polarization, State },
    molecule::generate_coupled_states,
    parameters::{ OdeParameters, ParameterValue },
    scan::*,
    session::{ ScriptSession, SolverContext },
    system::setup_obe_system,
};

const CONFIG: &str = "b1_cycling.toml";

fn main() -> anyhow::Result<()> {
    let config_path: PathBuf
        = env::args().nth(1).unwrap_or_else(|| CONFIG.to_string()).into();
    let config = ObeConfig::load(&config_path)?;
    let gamma = config.system.gamma;

    let ground: Vec<_>
        = generate_coupled_states(&config.system.ground)?
        .into_iter().map(State::from_basis).collect();
    let excited: Vec<_>
        = generate_coupled_states(&config.system.excited)?
        .into_iter().map(State::from_basis).collect();
    let transition
        = TransitionSelector::new(ground, excited, "Ω", "δ")
        .with_polarizations(vec![Polarization::Z, Polarization::X], ["Pz", "Px"])
        .with_description("X(J=1) -> B(J=1, F1=3/2, F=1)");

    let mut par = OdeParameters::new([
        ("Ω", ParameterValue::from(gamma)),
        ("δ", ParameterValue::from(0.0)),
        ("ω", ParameterValue::from(2.0 * std::f64::consts::PI * 1.6e6)),
        ("Pz", ParameterValue::from("sin(ω*t) > 0")),
        ("Px", ParameterValue::from("sin(ω*t) <= 0")),
    ])?;

    let mut ctx = SolverContext::open(ScriptSession::new(), config.solver.clone())?;
    let obe = setup_obe_system(
        &mut ctx,
        &config.model,
        &config.system,
        config.window,
        &par,
        &[transition],
        None,
        &[],
    )?;
    println!("{} states, {} jump operators", obe.n_states(), obe.C_array.len());

    let n = obe.n_states();
    let ground_idx = find_state_indices(&obe.QN, &obe.ground)?;
    let mut rho: nd::Array2<C64> = nd::Array2::zeros((n, n));
    ground_idx.iter()
        .for_each(|&g| { rho[[g, g]] = C64::from(1.0 / ground_idx.len() as f64); });

    par.set_leaf("Ω", 0.5 * gamma)?;
    let problem = setup_problem(&mut ctx, &par, rho.view(), (0.0, 100e-6), "prob")?;
    let mut rng = StdRng::seed_from_u64(10546);
    let request = setup_parameter_scan_nd(
        &mut ctx,
        &par,
        vec![
            ScanAxis::new(["δ"], nd::Array1::linspace(-5.0 * gamma, 5.0 * gamma, 41).to_vec()),
            ScanAxis::new(["Ω"], vec![0.25 * gamma, 0.5 * gamma, gamma]),
        ],
        Some(&mut rng),
    )?;
    let cb = setup_discrete_callback_terminate(&mut ctx, &par, "t > 50e-6 / Ω", "cb")?;
    let ensemble = setup_problem_parameter_scan(
        &mut ctx,
        &problem,
        &request,
        Some(OutputFunction::StateIntegral(find_state_indices(&obe.QN, &obe.excited)?)),
        "ens_prob",
    )?;
    let options = SolveOptions::from(ctx.config()).with_callback(&cb);
    solve_problem_parameter_scan(&mut ctx, &problem, &ensemble, &options)?;

    let outdir = PathBuf::from("output");
    fs::create_dir_all(&outdir)?;
    let script = ctx.close();
    script.write(outdir.join("b1_cycling.jl"))?;
    println!("wrote {} lines of julia", script.lines().len());
    Ok(())
}
