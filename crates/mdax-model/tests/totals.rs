//! Total derivatives: evaluation counts, relevance pruning and scaling.

mod common;

use common::*;
use mdax_approx::Error as ApproxError;
use mdax_core::{ApproxOptions, PartialSpec, VarSpec};
use mdax_model::{DriverVar, Error, Group, IndepVarComp, Problem, SetupOptions};

fn paraboloid_problem(root_approx: Option<ApproxOptions>) -> Problem {
    let mut model = paraboloid(PartialSpec::analytic());
    if let Some(options) = root_approx {
        model.approx_totals(options);
    }
    let mut prob = Problem::new(model);
    prob.add_design_var("px.x").add_design_var("py.y").add_objective("parab.f_xy");
    prob.setup(SetupOptions::default()).unwrap();
    prob
}

#[test]
fn test_paraboloid_analytic_totals() {
    let mut prob = paraboloid_problem(None);
    prob.run_model().unwrap();
    assert_eq!(prob.get_val("parab.f_xy").unwrap(), vec![-15.0]);

    let totals = prob.compute_totals(&[], &[]).unwrap();
    assert_close(totals[("parab.f_xy", "px.x")][(0, 0)], -4.0, 1e-14, "df/dx");
    assert_close(totals[("parab.f_xy", "py.y")][(0, 0)], 3.0, 1e-14, "df/dy");
    assert_eq!(totals.len(), 2);
}

#[test]
fn test_fd_count_is_one_run_plus_one_per_design_var() {
    let mut prob = paraboloid_problem(Some(ApproxOptions::fd()));
    prob.run_model().unwrap();
    let totals = prob.compute_totals(&[], &[]).unwrap();

    assert_eq!(prob.exec_count("parab").unwrap(), 3);
    assert_close(totals[("parab.f_xy", "px.x")][(0, 0)], -4.0, 1e-5, "df/dx");
    assert_close(totals[("parab.f_xy", "py.y")][(0, 0)], 3.0, 1e-5, "df/dy");
}

#[test]
fn test_fd_count_for_driver_subset() {
    let mut prob = paraboloid_problem(Some(ApproxOptions::fd()));
    prob.run_model().unwrap();
    prob.compute_totals(&["parab.f_xy"], &["px.x"]).unwrap();
    assert_eq!(prob.exec_count("parab").unwrap(), 2);
}

#[test]
fn test_repeated_totals_reuse_the_plan() {
    let mut prob = paraboloid_problem(Some(ApproxOptions::fd()));
    prob.run_model().unwrap();
    let first = prob.compute_totals(&[], &[]).unwrap();
    let second = prob.compute_totals(&[], &[]).unwrap();
    assert_eq!(first, second);
    assert_eq!(prob.exec_count("parab").unwrap(), 5);
}

#[test]
fn test_cs_totals_are_exact_and_clean_up() {
    let mut prob = paraboloid_problem(Some(ApproxOptions::cs()));
    prob.run_model().unwrap();
    let totals = prob.compute_totals(&[], &[]).unwrap();
    assert_close(totals[("parab.f_xy", "px.x")][(0, 0)], -4.0, 1e-14, "df/dx");
    assert_close(totals[("parab.f_xy", "py.y")][(0, 0)], 3.0, 1e-14, "df/dy");
    assert_eq!(prob.imaginary_norm().unwrap(), 0.0);
    assert_eq!(prob.get_val("px.x").unwrap(), vec![3.0]);
}

#[test]
fn test_scaled_totals() {
    let mut prob = Problem::new(paraboloid(PartialSpec::analytic()));
    prob.add_design_var(DriverVar::new("px.x").with_ref(2.0))
        .add_objective(DriverVar::new("parab.f_xy").with_ref(10.0));
    prob.setup(SetupOptions::default()).unwrap();
    prob.run_model().unwrap();

    let scaled = prob.compute_totals_scaled(&[], &[]).unwrap();
    assert_close(scaled[("parab.f_xy", "px.x")][(0, 0)], -0.8, 1e-14, "scaled df/dx");
}

#[test]
fn test_variable_refs_scale_totals() {
    let mut model = Group::new();
    model
        .add_component("px", IndepVarComp::with_output("x", VarSpec::scalar(3.0).with_ref(4.0)))
        .add_component("py", IndepVarComp::with_output("y", VarSpec::scalar(-4.0)))
        .add_component("parab", Paraboloid { partials: PartialSpec::analytic() })
        .connect("px.x", "parab.x")
        .connect("py.y", "parab.y");
    let mut prob = Problem::new(model);
    prob.setup(SetupOptions::default()).unwrap();
    prob.run_model().unwrap();

    let scaled = prob.compute_totals_scaled(&["parab.f_xy"], &["px.x"]).unwrap();
    assert_close(scaled[("parab.f_xy", "px.x")][(0, 0)], -16.0, 1e-14, "scaled df/dx");
}

#[test]
fn test_relevance_skips_unrelated_sink() {
    let mut model = fan_out(false);
    model.approx_totals(ApproxOptions::fd());
    let mut prob = Problem::new(model);
    prob.setup(SetupOptions::default()).unwrap();
    prob.run_model().unwrap();

    let totals = prob
        .compute_totals(&["sink1.s", "sink2.s"], &["indep.a"])
        .unwrap();
    assert_eq!(prob.exec_count("comp1").unwrap(), 2);
    assert_eq!(prob.exec_count("sink1").unwrap(), 2);
    assert_eq!(prob.exec_count("sink2").unwrap(), 1);
    // s1 = (2a)^2
    assert_close(totals[("sink1.s", "indep.a")][(0, 0)], 8.0, 1e-5, "ds1/da");
    assert_eq!(totals[("sink2.s", "indep.a")][(0, 0)], 0.0);
}

#[test]
fn test_wildcard_declarations_run_every_reachable_sink() {
    let mut model = fan_out(true);
    model.approx_totals(ApproxOptions::fd());
    let mut prob = Problem::new(model);
    prob.setup(SetupOptions::default()).unwrap();
    prob.run_model().unwrap();

    let totals = prob
        .compute_totals(&["sink1.s", "sink2.s"], &["indep.a"])
        .unwrap();
    assert_eq!(prob.exec_count("comp1").unwrap(), 2);
    assert_eq!(prob.exec_count("sink1").unwrap(), 2);
    assert_eq!(prob.exec_count("sink2").unwrap(), 2);
    assert_eq!(totals[("sink2.s", "indep.a")][(0, 0)], 0.0);
}

#[test]
fn test_chain_rule_linearizes_only_relevant_blocks() {
    let mut prob = Problem::new(fan_out(false));
    prob.setup(SetupOptions::default()).unwrap();
    prob.run_model().unwrap();

    let totals = prob.compute_totals(&["sink1.s"], &["indep.a"]).unwrap();
    assert_close(totals[("sink1.s", "indep.a")][(0, 0)], 8.0, 1e-5, "ds1/da");
    assert_eq!(prob.exec_count("comp1").unwrap(), 2);
    assert_eq!(prob.exec_count("sink1").unwrap(), 2);
    assert_eq!(prob.exec_count("sink2").unwrap(), 1);
}

#[test]
fn test_coloring_reduces_evaluations() {
    let values = [1.0, 2.0, 3.0, 4.0, 5.0];
    let diag: Vec<usize> = (0..values.len()).collect();

    let colored = PartialSpec::fd()
        .with_directional(true)
        .with_sparsity(diag.clone(), diag.clone());
    let mut prob = Problem::new(cubes(&values, colored));
    prob.setup(SetupOptions::default()).unwrap();
    prob.run_model().unwrap();
    let totals = prob.compute_totals(&["comp.y"], &["p.x"]).unwrap();
    assert_eq!(prob.exec_count("comp").unwrap(), 2);
    let jac = &totals[("comp.y", "p.x")];
    for i in 0..values.len() {
        assert_close(jac[(i, i)], 3.0 * values[i] * values[i], 1e-4, "dy/dx diagonal");
    }

    let plain = PartialSpec::fd().with_sparsity(diag.clone(), diag);
    let mut prob = Problem::new(cubes(&values, plain));
    prob.setup(SetupOptions::default()).unwrap();
    prob.run_model().unwrap();
    let uncolored = prob.compute_totals(&["comp.y"], &["p.x"]).unwrap();
    assert_eq!(prob.exec_count("comp").unwrap(), 1 + values.len());
    assert!((&uncolored[("comp.y", "p.x")] - jac).norm() < 1e-12);
}

#[test]
fn test_indices_select_entries() {
    let values = [1.0, 2.0, 3.0];
    let mut prob = Problem::new(cubes(&values, PartialSpec::cs()));
    prob.add_design_var(DriverVar::new("p.x").with_indices(&[2]))
        .add_objective(DriverVar::new("comp.y").with_indices(&[0, 2]));
    prob.setup(SetupOptions::default()).unwrap();
    prob.run_model().unwrap();

    let totals = prob.compute_totals(&[], &[]).unwrap();
    let jac = &totals[("comp.y", "p.x")];
    assert_eq!(jac.shape(), (2, 1));
    assert_eq!(jac[(0, 0)], 0.0);
    assert_close(jac[(1, 0)], 27.0, 1e-12, "dy2/dx2");
}

#[test]
fn test_evaluation_failure_restores_state() {
    let mut model = Group::new();
    model
        .add_component("p", IndepVarComp::with_output("x", VarSpec::scalar(1.0)))
        .add_component("frag", Fragile { limit: 1.0 })
        .connect("p.x", "frag.x")
        .approx_totals(ApproxOptions::fd());
    let mut prob = Problem::new(model);
    prob.setup(SetupOptions::default()).unwrap();
    prob.run_model().unwrap();

    let err = prob.compute_totals(&["frag.y"], &["p.x"]).unwrap_err();
    assert!(
        matches!(err, Error::Approx(ApproxError::EvaluationFailure { .. })),
        "unexpected error: {err}"
    );
    assert_eq!(prob.get_val("p.x").unwrap(), vec![1.0]);
    assert_eq!(prob.get_val("frag.x").unwrap(), vec![1.0]);
    assert_eq!(prob.get_val("frag.y").unwrap(), vec![2.0]);
}

#[test]
fn test_unknown_and_out_of_range_driver_vars() {
    let mut prob = paraboloid_problem(None);
    prob.run_model().unwrap();
    assert!(matches!(
        prob.compute_totals(&["parab.nope"], &["px.x"]),
        Err(Error::UnknownVariable(_))
    ));

    let mut prob = Problem::new(paraboloid(PartialSpec::analytic()));
    prob.add_design_var(DriverVar::new("px.x").with_indices(&[1]));
    assert!(matches!(
        prob.setup(SetupOptions::default()),
        Err(Error::InvalidConfiguration(_))
    ));
}
