//! End-to-end assembly of an optical Bloch equation system, from quantum
//! number selectors to a kernel defined in the solver runtime.

use ndarray as nd;
use num_complex::Complex64 as C64;
use tracing::info;
use crate::{
    codegen::{
        generate_ode_fun_julia,
        generate_preamble,
        system_of_equations_to_lines,
        Preamble,
    },
    config::SystemParameters,
    couplings::{
        collapse_matrices,
        generate_coupling_field,
        generate_coupling_field_automatic,
        CouplingField,
        CouplingOptions,
        DecayChannel,
        TransitionSelector,
    },
    error::{ ObeError, ObeResult },
    hamiltonian::{ generate_total_reduced_hamiltonian, JWindow, MolecularModel },
    hilbert::{ BasisState, QuantumSelector, State },
    lindblad::{
        add_decays_C_arrays,
        add_levels_symbolic_hamiltonian,
        add_states_QN,
        generate_system_of_equations_symbolic,
        generate_total_symbolic_hamiltonian,
    },
    molecule::{ generate_coupled_states, CoupledBasisState },
    parameters::OdeParameters,
    session::{ Session, SolverContext },
    symbolic::Poly,
};

/// Branching ratios below this are dropped from the collapse operators.
pub const BRANCHING_TOL: f64 = 1e-4;

/// Everything generated for one system.
#[derive(Clone, Debug)]
pub struct ObeSystem<S>
where S: BasisState
{
    pub ground: Vec<State<S>>,
    pub excited: Vec<State<S>>,
    /// Basis of `system`: compacted if requested, with decay-channel levels
    /// inserted.
    pub QN: Vec<State<S>>,
    pub H_int: nd::Array2<C64>,
    pub V_ref_int: nd::Array2<C64>,
    pub couplings: Vec<CouplingField>,
    pub H_symbolic: nd::Array2<Poly>,
    pub C_array: Vec<nd::Array2<C64>>,
    pub system: nd::Array2<Poly>,
    pub code_lines: Vec<String>,
    pub preamble: Option<Preamble>,
    /// The uncompacted basis, if compaction was applied.
    pub QN_original: Option<Vec<State<S>>>,
    pub decay_channels: Vec<DecayChannel<S>>,
}

impl<S> ObeSystem<S>
where S: BasisState
{
    pub fn n_states(&self) -> usize { self.QN.len() }

    /// Full kernel source, once a preamble has been generated.
    pub fn ode_fun(&self) -> Option<String> {
        self.preamble.as_ref()
            .map(|preamble| generate_ode_fun_julia(preamble, &self.code_lines))
    }
}

fn approximate_states(selector: &QuantumSelector)
    -> ObeResult<Vec<State<CoupledBasisState>>>
{
    Ok(
        generate_coupled_states(selector)?
            .into_iter()
            .map(State::from_basis)
            .collect()
    )
}

/// Generate the symbolic system of equations and its kernel body.
///
/// Ground and excited states are generated from the selectors in
/// `system_parameters`. Decay channels are injected after compaction, so
/// their levels are never merged.
pub fn generate_obe_system<M>(
    model: &M,
    system_parameters: &SystemParameters,
    window: JWindow,
    transitions: &[TransitionSelector<CoupledBasisState>],
    qn_compact: Option<&[QuantumSelector]>,
    decay_channels: &[DecayChannel<CoupledBasisState>],
) -> ObeResult<ObeSystem<CoupledBasisState>>
where M: MolecularModel<State = CoupledBasisState>
{
    system_parameters.validate()?;
    let gamma = system_parameters.gamma;

    info!("generate_obe_system: 1/6 -> generating the reduced hamiltonian");
    let ground_approx = approximate_states(&system_parameters.ground)?;
    let excited_approx = approximate_states(&system_parameters.excited)?;
    let reduced = generate_total_reduced_hamiltonian(
        model, &ground_approx, &excited_approx, window, None)?;
    let QN = &reduced.QN;

    info!("generate_obe_system: 2/6 -> generating the couplings of {} transitions",
        transitions.len());
    let options = CouplingOptions::default();
    let couplings: Vec<CouplingField>
        = transitions.iter()
        .map(|tr| {
            tr.validate()?;
            match (&tr.ground_main, &tr.excited_main, tr.polarizations.first()) {
                (Some(gm), Some(em), Some(pol_main)) => generate_coupling_field(
                    gm, em, &tr.ground, &tr.excited, QN, &reduced.V_ref_int,
                    &tr.polarizations, pol_main, options,
                ),
                _ => generate_coupling_field_automatic(
                    &tr.ground, &tr.excited, QN, &reduced.V_ref_int,
                    &tr.polarizations, options,
                ),
            }
        })
        .collect::<ObeResult<_>>()?;

    info!("generate_obe_system: 3/6 -> generating the symbolic hamiltonian");
    let (mut H_symbolic, QN_compact) = generate_total_symbolic_hamiltonian(
        QN, &reduced.H_int, &couplings, transitions, qn_compact)?;

    info!("generate_obe_system: 4/6 -> generating the collapse matrices");
    let mut C_array = collapse_matrices(
        QN, &reduced.ground, &reduced.excited, gamma, BRANCHING_TOL, qn_compact)?;
    let QN_original = QN_compact.is_some().then(|| QN.clone());
    let mut QN_system = QN_compact.unwrap_or_else(|| QN.clone());
    if !decay_channels.is_empty() {
        let (indices, H_decay) = add_levels_symbolic_hamiltonian(
            &H_symbolic, decay_channels, &QN_system, &reduced.excited)?;
        QN_system = add_states_QN(decay_channels, &QN_system, &indices);
        C_array = add_decays_C_arrays(
            decay_channels, &indices, &QN_system, &C_array, gamma)?;
        H_symbolic = H_decay;
    }

    info!("generate_obe_system: 5/6 -> transforming the hamiltonian and collapse \
        matrices into a symbolic system of equations");
    let system = generate_system_of_equations_symbolic(&H_symbolic, &C_array, true);

    info!("generate_obe_system: 6/6 -> generating code for the system of equations");
    let code_lines = system_of_equations_to_lines(&system, system_parameters.nprocs);

    Ok(ObeSystem {
        ground: reduced.ground,
        excited: reduced.excited,
        QN: QN_system,
        H_int: reduced.H_int,
        V_ref_int: reduced.V_ref_int,
        couplings,
        H_symbolic,
        C_array,
        system,
        code_lines,
        preamble: None,
        QN_original,
        decay_channels: decay_channels.to_vec(),
    })
}

/// Generate a system, then define its kernel, `Γ`, and `p` in the solver
/// runtime.
#[allow(clippy::too_many_arguments)]
pub fn setup_obe_system<S, M>(
    ctx: &mut SolverContext<S>,
    model: &M,
    system_parameters: &SystemParameters,
    window: JWindow,
    ode_parameters: &OdeParameters,
    transitions: &[TransitionSelector<CoupledBasisState>],
    qn_compact: Option<&[QuantumSelector]>,
    decay_channels: &[DecayChannel<CoupledBasisState>],
) -> ObeResult<ObeSystem<CoupledBasisState>>
where
    S: Session,
    M: MolecularModel<State = CoupledBasisState>,
{
    // fail on undefined symbols before the expensive part
    ode_parameters.check_transition_symbols(transitions)?;
    let mut obe_system = generate_obe_system(
        model, system_parameters, window, transitions, qn_compact, decay_channels)?;
    info!("setup_obe_system: 1/2 -> generating the preamble");
    obe_system.preamble = Some(generate_preamble(ode_parameters, transitions)?);
    info!("setup_obe_system: 2/2 -> defining the kernel and parameters");
    load_obe_system(ctx, &obe_system, ode_parameters, system_parameters)?;
    Ok(obe_system)
}

/// Define the kernel of a previously generated system, `Γ`, and `p` in the
/// solver runtime.
pub fn load_obe_system<S, B>(
    ctx: &mut SolverContext<S>,
    obe_system: &ObeSystem<B>,
    ode_parameters: &OdeParameters,
    system_parameters: &SystemParameters,
) -> ObeResult<()>
where
    S: Session,
    B: BasisState,
{
    let ode_fun
        = obe_system.ode_fun()
        .ok_or_else(|| ObeError::InvalidConfig("system has no preamble".into()))?;
    ctx.define_ode_fun(&ode_fun)?;
    ctx.bind_everywhere("Γ", system_parameters.gamma)?;
    ctx.load_parameters(ode_parameters)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::SolverConfig,
        hamiltonian::tests::{ B1_states, X1_states, test_model },
        hilbert::{ Electronic, Parity, QnFilter },
        parameters::ParameterValue,
        session::ScriptSession,
    };

    fn system_parameters(ground_J: QnFilter) -> SystemParameters {
        SystemParameters {
            nprocs: 2,
            gamma: 1.0,
            ground: QuantumSelector::new()
                .with_electronic(Electronic::X)
                .with_J(ground_J),
            excited: QuantumSelector::new()
                .with_electronic(Electronic::B)
                .with_J(QnFilter::Exact(1.0))
                .with_F1(QnFilter::Exact(1.5))
                .with_F(QnFilter::Exact(1.0))
                .with_parity(Parity::Plus),
        }
    }

    fn transition() -> TransitionSelector<CoupledBasisState> {
        TransitionSelector::new(X1_states(), B1_states(), "Ω", "δ")
    }

    fn registry() -> OdeParameters {
        OdeParameters::new([
            ("Ω", ParameterValue::from(1.0)),
            ("δ", ParameterValue::from(0.0)),
            ("Γ", ParameterValue::from(1.0)),
        ])
        .unwrap()
    }

    #[test]
    fn generates_one_line_per_matrix_element() {
        let obe = generate_obe_system(
            &test_model(),
            &system_parameters(QnFilter::Exact(1.0)),
            JWindow::default(),
            &[transition()],
            None,
            &[],
        ).unwrap();
        assert_eq!(obe.n_states(), 15);
        assert_eq!(obe.system.dim(), (15, 15));
        assert_eq!(obe.code_lines.len(), 15 * 15);
        assert!(obe.QN_original.is_none());
        assert!(obe.ode_fun().is_none());
        // every excited state decays at the full rate
        for e in 12..15 {
            let rate: f64
                = obe.C_array.iter()
                .map(|C| C.column(e).iter().map(|c| c.norm_sqr()).sum::<f64>())
                .sum();
            assert!((rate - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn decay_channels_and_compaction_resize_the_basis() {
        let channel = DecayChannel {
            ground: State::from_basis(CoupledBasisState::X(3, 3.5, 4.0, 0.0).unwrap()),
            excited: QuantumSelector::new().with_electronic(Electronic::B),
            branching: 0.1,
            description: "X(J=3)".into(),
        };
        let compact = [
            QuantumSelector::new()
                .with_electronic(Electronic::X)
                .with_J(QnFilter::Exact(3.0)),
        ];
        let obe = generate_obe_system(
            &test_model(),
            &system_parameters(QnFilter::Among(vec![1.0, 3.0])),
            JWindow::default(),
            &[transition()],
            Some(&compact),
            &[channel],
        ).unwrap();
        // 12 X(J=1) + 1 merged X(J=3) + 1 decay level + 3 B(J=1)
        assert_eq!(obe.QN_original.as_ref().map(Vec::len), Some(12 + 28 + 3));
        assert_eq!(obe.n_states(), 17);
        assert_eq!(obe.system.dim(), (17, 17));
        assert!(obe.C_array.iter().all(|C| C.dim() == (17, 17)));
    }

    #[test]
    fn setup_defines_kernel_and_parameters() {
        let mut ctx = SolverContext::open(ScriptSession::new(), SolverConfig::default())
            .unwrap();
        let obe = setup_obe_system(
            &mut ctx,
            &test_model(),
            &system_parameters(QnFilter::Exact(1.0)),
            JWindow::default(),
            &registry(),
            &[transition()],
            None,
            &[],
        ).unwrap();
        assert!(obe.preamble.is_some());
        let script = ctx.close().script();
        assert!(script.contains("@everywhere function Lindblad_rhs!(du, ρ, p, t)"));
        assert!(script.contains("Ωᶜ = conj(Ω)"));
        assert!(script.contains("@everywhere Γ = 1.0"));
        assert!(script.contains("p = [1.0, 0.0, 1.0]"));
    }

    #[test]
    fn undefined_transition_symbols_fail_early() {
        let mut ctx = SolverContext::open(ScriptSession::new(), SolverConfig::default())
            .unwrap();
        let par = OdeParameters::new([("Ω", ParameterValue::from(1.0))]).unwrap();
        let res = setup_obe_system(
            &mut ctx,
            &test_model(),
            &system_parameters(QnFilter::Exact(1.0)),
            JWindow::default(),
            &par,
            &[transition()],
            None,
            &[],
        );
        assert!(matches!(res, Err(ObeError::UndefinedSymbols { .. })));
    }
}
