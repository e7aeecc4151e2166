//! Properties of the parameter registry.

use std::collections::BTreeSet;
use proptest::prelude::*;
use rand::{ rngs::StdRng, seq::SliceRandom, SeedableRng };
use tlf_obe::{
    parameters::{ LeafValue, OdeParameters, ParameterValue },
    ObeError,
};

#[test]
fn registry_scenario() {
    let mut par = OdeParameters::new([
        ("Ω", ParameterValue::from(1.0)),
        ("δ", ParameterValue::from(0.0)),
        ("Γ", ParameterValue::from(1.0)),
        ("ϕ", ParameterValue::from("Ω*0+δ")),
    ])
    .unwrap();
    let leaves: Vec<&str> = par.leaves().map(|(name, _)| name.as_str()).collect();
    assert_eq!(leaves, ["Ω", "δ", "Γ"]);
    assert_eq!(par.compound_order(), ["ϕ".to_string()]);

    let res = par.set("Ω", "2*δ");
    assert!(matches!(res, Err(ObeError::TypeLock { .. })));
    assert_eq!(par.p()[0], LeafValue::Real(1.0));

    par.set("Ω", 2.0).unwrap();
    assert_eq!(
        par.p(),
        vec![LeafValue::Real(2.0), LeafValue::Real(0.0), LeafValue::Real(1.0)],
    );
    assert_eq!(par.to_julia(), "p = [2.0, 0.0, 1.0]");
}

/// Declarations of `n_leaves` leaves `a*` and one compound `c*` per entry of
/// `refs`, each referring to leaves or compounds declared before it, listed
/// in a shuffled order.
fn declarations(n_leaves: usize, refs: &[Vec<prop::sample::Index>], seed: u64)
    -> Vec<(String, ParameterValue)>
{
    let mut names: Vec<String> = (0..n_leaves).map(|k| format!("a{k}")).collect();
    let mut decls: Vec<(String, ParameterValue)>
        = names.iter()
        .map(|name| (name.clone(), ParameterValue::from(1.0)))
        .collect();
    for (k, r) in refs.iter().enumerate() {
        let terms: Vec<&str>
            = r.iter().map(|idx| names[idx.index(names.len())].as_str()).collect();
        let expr = if terms.is_empty() { "1".to_string() } else { terms.join(" + ") };
        let name = format!("c{k}");
        decls.push((name.clone(), ParameterValue::from(expr)));
        names.push(name);
    }
    decls.shuffle(&mut StdRng::seed_from_u64(seed));
    decls
}

proptest! {
    #[test]
    fn compound_order_is_topological(
        n_leaves in 1usize..4,
        refs in prop::collection::vec(prop::collection::vec(any::<prop::sample::Index>(), 0..4), 1..8),
        seed in any::<u64>(),
    ) {
        let par = OdeParameters::new(declarations(n_leaves, &refs, seed)).unwrap();
        let order = par.compound_order();
        prop_assert_eq!(order.len(), refs.len());
        for (k, name) in order.iter().enumerate() {
            let (_, expr) = par.compounds().find(|(n, _)| *n == name).unwrap();
            for dep in expr.free_symbols() {
                if let Some(pos) = order.iter().position(|n| *n == dep) {
                    prop_assert!(pos < k, "{} depends on later {}", name, dep);
                }
            }
        }
    }

    #[test]
    fn closure_errors_list_exactly_the_unresolved(
        undefined in prop::collection::vec(0usize..6, 1..8),
    ) {
        let mut decls: Vec<(String, ParameterValue)> = vec![
            ("a".to_string(), ParameterValue::from(1.0)),
            ("b".to_string(), ParameterValue::from("a*t")),
        ];
        for (k, chunk) in undefined.chunks(2).enumerate() {
            let expr: String
                = chunk.iter().map(|x| format!("x{x}")).chain(["b".to_string()])
                .collect::<Vec<_>>()
                .join(" * ");
            decls.push((format!("c{k}"), ParameterValue::from(expr)));
        }
        let expected: Vec<String>
            = undefined.iter()
            .map(|x| format!("x{x}"))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        match OdeParameters::new(decls) {
            Err(ObeError::UndefinedSymbols { symbols, .. })
                => prop_assert_eq!(symbols, expected),
            other => prop_assert!(false, "unexpected {:?}", other),
        }
    }

    #[test]
    fn leaf_updates_keep_their_type(x in -1e3f64..1e3, re in -1.0f64..1.0, im in -1.0f64..1.0) {
        let mut par = OdeParameters::new([
            ("Ω", ParameterValue::from(1.0)),
            ("ϕ", ParameterValue::from("2*Ω")),
        ]).unwrap();
        par.set_leaf("Ω", x).unwrap();
        let phi = par.get_parameter_evaluation("ϕ", 0.0).unwrap();
        prop_assert!((phi.re - 2.0 * x).abs() < 1e-9);
        par.set_leaf("Ω", num_complex::Complex64::new(re, im)).unwrap();
        prop_assert!(matches!(par.set("ϕ", "Ω"), Err(ObeError::FrozenCompound(_))));
        prop_assert!(matches!(par.set("ϕ", 1.0), Err(ObeError::TypeLock { .. })), "expected TypeLock error");
    }
}
