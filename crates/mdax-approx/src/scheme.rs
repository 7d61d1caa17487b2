//! Approximation schemes: the set of approximated blocks owned by one scope.

use indexmap::IndexMap;

use mdax_core::options::DEFAULT_FD_STEP;
use mdax_core::{ApproxOptions, FdForm, Method, SparsityBehavior, StepCalc};

use crate::assembler::{ApproxJacobian, DEFAULT_SPARSITY_TOL, JacobianAssembler, SparsityMismatch};
use crate::cs::ComplexStepEngine;
use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::error::{Error, Result};
use crate::fd::{self, Perturbation, Stencil};
use crate::plan::PerturbationPlan;
use crate::relevance::{ActiveSet, RelevanceFilter};
use crate::request::{PartialRequest, Sizes};
use crate::step::{StepContext, StepVector, compute_step};
use crate::target::{ApproxTarget, Part};

/// Warning text for a complex step requested under another complex step.
pub const NESTED_CS_MESSAGE: &str = "Nested complex step detected. Finite difference will be used.";

#[derive(Debug, Clone)]
struct CachedPlan {
    version: u64,
    sizes: Sizes,
    plan: PerturbationPlan,
    active: Vec<ActiveSet>,
}

/// Approximates a fixed set of `(of, wrt)` blocks of one scope.
///
/// The perturbation plan is built lazily and reused until a request is
/// added or a variable changes size.
#[derive(Debug, Clone)]
pub struct ApproximationScheme {
    owner: String,
    context: StepContext,
    requests: Vec<PartialRequest>,
    version: u64,
    cache: Option<CachedPlan>,
    plan_builds: usize,
    computations: usize,
    sparsity_behavior: SparsityBehavior,
    sparsity_tol: f64,
    nested_warned: bool,
    fallback_warned: bool,
    mismatches: Vec<SparsityMismatch>,
}

impl ApproximationScheme {
    pub fn new(owner: impl Into<String>, context: StepContext) -> Self {
        Self {
            owner: owner.into(),
            context,
            requests: Vec::new(),
            version: 0,
            cache: None,
            plan_builds: 0,
            computations: 0,
            sparsity_behavior: SparsityBehavior::default(),
            sparsity_tol: DEFAULT_SPARSITY_TOL,
            nested_warned: false,
            fallback_warned: false,
            mismatches: Vec::new(),
        }
    }

    pub fn with_sparsity_behavior(mut self, behavior: SparsityBehavior) -> Self {
        self.sparsity_behavior = behavior;
        self
    }

    pub fn with_sparsity_tol(mut self, tol: f64) -> Self {
        self.sparsity_tol = tol;
        self
    }

    /// Register a block. Options are validated here, never during evaluation.
    pub fn add_request(&mut self, request: PartialRequest) -> Result<()> {
        request.options.validate()?;
        self.requests.push(request);
        self.version += 1;
        Ok(())
    }

    /// Drop every request, e.g. before re-registering a different response set.
    pub fn clear_requests(&mut self) {
        self.requests.clear();
        self.version += 1;
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn requests(&self) -> &[PartialRequest] {
        &self.requests
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Structural version; bumped on every change to the request set.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// How many times a perturbation plan was built.
    pub fn plan_builds(&self) -> usize {
        self.plan_builds
    }

    /// Completed Jacobian computations.
    pub fn computations(&self) -> usize {
        self.computations
    }

    /// Sparsity mismatches found by the last computation.
    pub fn mismatches(&self) -> &[SparsityMismatch] {
        &self.mismatches
    }

    /// Number of directions in the current plan, building it if needed.
    pub fn num_directions<T: ApproxTarget>(&mut self, target: &T) -> Result<usize> {
        let cached = self.take_plan(target)?;
        let n = cached.plan.len();
        self.cache = Some(cached);
        Ok(n)
    }

    fn sizes<T: ApproxTarget>(&self, target: &T) -> Result<Sizes> {
        let mut sizes = Sizes::new();
        for req in &self.requests {
            for name in [&req.of, &req.wrt] {
                if !sizes.contains_key(name) {
                    sizes.insert(name.clone(), target.size(name)?);
                }
            }
        }
        Ok(sizes)
    }

    fn take_plan<T: ApproxTarget>(&mut self, target: &T) -> Result<CachedPlan> {
        let sizes = self.sizes(target)?;
        if let Some(cached) = self.cache.take() {
            if cached.version == self.version && cached.sizes == sizes {
                return Ok(cached);
            }
        }

        let plan = PerturbationPlan::build(&self.requests, &sizes)?;
        let active = match target.graph() {
            Some(graph) => {
                let filter = RelevanceFilter::new(graph);
                plan.directions()
                    .iter()
                    .map(|dir| {
                        let mut perturbed: Vec<&str> = Vec::new();
                        for seed in &dir.seeds {
                            if !perturbed.contains(&seed.wrt.as_str()) {
                                perturbed.push(&seed.wrt);
                            }
                        }
                        let requested = self.of_names(&dir.requests());
                        filter.active_components(&perturbed, &requested)
                    })
                    .collect()
            }
            None => vec![ActiveSet::All; plan.len()],
        };
        self.plan_builds += 1;
        log::debug!(
            "{}: built perturbation plan with {} directions for {} columns",
            self.owner,
            plan.len(),
            plan.num_columns()
        );
        Ok(CachedPlan {
            version: self.version,
            sizes,
            plan,
            active,
        })
    }

    fn of_names(&self, requests: &[usize]) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for &r in requests {
            let of = self.requests[r].of.as_str();
            if !names.contains(&of) {
                names.push(of);
            }
        }
        names
    }

    /// Options actually used for an option set, after complex-step fallbacks.
    fn effective_options<T: ApproxTarget>(
        &mut self,
        options: &ApproxOptions,
        target: &T,
        diagnostics: &mut Diagnostics,
    ) -> ApproxOptions {
        if options.method != Method::Cs {
            return options.clone();
        }
        let fallback = ApproxOptions {
            method: Method::Fd,
            step: Some(DEFAULT_FD_STEP),
            form: FdForm::Forward,
            order: None,
            step_calc: StepCalc::Abs,
            minimum_step: options.minimum_step,
            directional: options.directional,
        };
        if target.complex_step_active() {
            if !self.nested_warned {
                self.nested_warned = true;
                log::warn!("{}: {}", self.owner, NESTED_CS_MESSAGE);
                diagnostics.push(&self.owner, DiagnosticKind::NestedComplexStep, NESTED_CS_MESSAGE);
            }
            return fallback;
        }
        if !target.complex_capable() {
            if !self.fallback_warned {
                self.fallback_warned = true;
                let detail = "Complex step is not available for this scope. Finite difference will be used.";
                log::debug!("{}: {}", self.owner, detail);
                diagnostics.push(&self.owner, DiagnosticKind::ComplexStepFallback, detail);
            }
            return fallback;
        }
        options.clone()
    }

    /// Evaluate the directions assigned to `rank` into a fresh assembler.
    ///
    /// Assemblers from all ranks are merged and handed to
    /// [`ApproximationScheme::finish`].
    pub fn compute_partition<T: ApproxTarget>(
        &mut self,
        target: &mut T,
        rank: usize,
        num_ranks: usize,
        diagnostics: &mut Diagnostics,
    ) -> Result<JacobianAssembler> {
        let cached = self.take_plan(target)?;
        let result = self.run_directions(&cached, target, rank, num_ranks, diagnostics);
        self.cache = Some(cached);
        result
    }

    fn run_directions<T: ApproxTarget>(
        &mut self,
        cached: &CachedPlan,
        target: &mut T,
        rank: usize,
        num_ranks: usize,
        diagnostics: &mut Diagnostics,
    ) -> Result<JacobianAssembler> {
        let plan = &cached.plan;
        let mut assembler = JacobianAssembler::new(&self.requests, &cached.sizes, plan)?
            .with_sparsity_tol(self.sparsity_tol);

        let effective: Vec<ApproxOptions> = plan
            .options()
            .iter()
            .map(|o| self.effective_options(o, target, diagnostics))
            .collect();
        let stencils: Vec<Option<Stencil>> = effective
            .iter()
            .map(|o| match o.method {
                Method::Fd => Stencil::new(o.form, o.resolved_order()).map(Some),
                Method::Cs => Ok(None),
            })
            .collect::<Result<_>>()?;

        let mut nominal: IndexMap<&str, Vec<f64>> = IndexMap::new();
        let mut baseline: IndexMap<String, Vec<f64>> = IndexMap::new();
        for req in &self.requests {
            if !nominal.contains_key(req.wrt.as_str()) {
                nominal.insert(&req.wrt, target.values(&req.wrt, Part::Real)?);
            }
            if !baseline.contains_key(&req.of) {
                baseline.insert(req.of.clone(), target.values(&req.of, Part::Real)?);
            }
        }

        let mut engine: ComplexStepEngine<T::Checkpoint> = ComplexStepEngine::new();
        // Steps of every entry of a variable, per option group.
        let mut steps_by_var: IndexMap<(String, usize), StepVector> = IndexMap::new();
        for (index, direction) in plan.directions_for_rank(rank, num_ranks) {
            let options = &effective[direction.options];
            let base = self.context.base_step(options);
            let step_calc = match options.method {
                Method::Fd => options.step_calc,
                Method::Cs => StepCalc::Abs,
            };

            let mut perturbations = Vec::with_capacity(direction.seeds.len());
            for seed in &direction.seeds {
                let key = (seed.wrt.clone(), direction.options);
                if !steps_by_var.contains_key(&key) {
                    let values = nominal
                        .get(seed.wrt.as_str())
                        .ok_or_else(|| Error::UnknownVariable(seed.wrt.clone()))?;
                    steps_by_var.insert(key.clone(), compute_step(values, step_calc, base, options.minimum_step));
                }
                let step = steps_by_var[&key].at(seed.index);
                perturbations.push(Perturbation {
                    var: seed.wrt.clone(),
                    index: seed.index,
                    step,
                });
            }
            let steps: Vec<f64> = perturbations.iter().map(|p| p.step).collect();

            let of = self.of_names(&direction.requests());
            let active = &cached.active[index];
            let numerators = match &stencils[direction.options] {
                Some(stencil) => fd::difference(target, stencil, &perturbations, active, &of, &baseline)?,
                None => engine.run(target, &self.owner, &perturbations, active, &of)?,
            };
            assembler.deposit(index, direction, &steps, &numerators)?;
        }
        Ok(assembler)
    }

    /// Take the merged result, applying the sparsity-mismatch policy on the
    /// first computation of this scheme.
    pub fn finish(
        &mut self,
        assembler: JacobianAssembler,
        diagnostics: &mut Diagnostics,
    ) -> Result<ApproxJacobian> {
        let (jac, mismatches) = assembler.finish()?;
        let first = self.computations == 0;
        self.computations += 1;
        self.mismatches = mismatches;

        if first {
            for m in &self.mismatches {
                let detail = format!(
                    "Sparsity of '{}' wrt '{}' excludes {} entries which appear to be non-zero. \
                     (Magnitudes exceed {:e}) Rows: {:?} Cols: {:?}",
                    m.of,
                    m.wrt,
                    m.rows.len(),
                    self.sparsity_tol,
                    m.rows,
                    m.cols
                );
                match self.sparsity_behavior {
                    SparsityBehavior::Ignore => {}
                    SparsityBehavior::Warn => {
                        log::warn!("{}: {}", self.owner, detail);
                        diagnostics.push(&self.owner, DiagnosticKind::SparsityMismatch, detail);
                    }
                    SparsityBehavior::Error => {
                        return Err(Error::SparsityMismatch {
                            scope: self.owner.clone(),
                            of: m.of.clone(),
                            wrt: m.wrt.clone(),
                            count: m.rows.len(),
                        });
                    }
                }
            }
        }
        Ok(jac)
    }

    /// Approximate every registered block at the target's current state.
    pub fn compute_approx_jacobian<T: ApproxTarget>(
        &mut self,
        target: &mut T,
        diagnostics: &mut Diagnostics,
    ) -> Result<ApproxJacobian> {
        let assembler = self.compute_partition(target, 0, 1, diagnostics)?;
        self.finish(assembler, diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cs::ComplexStepState;
    use crate::target::{Delta, EvalMode};
    use mdax_core::Sparsity;
    use num_complex::Complex64;

    /// `y[k] = 0.5 * x[k]^2`, so the Jacobian is `diag(x)`.
    struct HalfSquare {
        x: Vec<f64>,
        xi: Vec<f64>,
        y: Vec<f64>,
        yi: Vec<f64>,
        evaluations: usize,
        complex: bool,
        state: ComplexStepState,
        fail_after: Option<usize>,
    }

    impl HalfSquare {
        fn new(x: &[f64]) -> Self {
            let mut t = Self {
                x: x.to_vec(),
                xi: vec![0.0; x.len()],
                y: vec![0.0; x.len()],
                yi: vec![0.0; x.len()],
                evaluations: 0,
                complex: true,
                state: ComplexStepState::new(),
                fail_after: None,
            };
            for (y, x) in t.y.iter_mut().zip(&t.x) {
                *y = 0.5 * x * x;
            }
            t
        }
    }

    impl ApproxTarget for HalfSquare {
        type Checkpoint = (Vec<f64>, Vec<f64>);

        fn scope(&self) -> &str {
            "half"
        }

        fn size(&self, var: &str) -> Result<usize> {
            match var {
                "x" | "y" => Ok(self.x.len()),
                _ => Err(Error::UnknownVariable(var.to_string())),
            }
        }

        fn values(&self, var: &str, part: Part) -> Result<Vec<f64>> {
            Ok(match (var, part) {
                ("x", Part::Real) => self.x.clone(),
                ("x", Part::Imag) => self.xi.clone(),
                ("y", Part::Real) => self.y.clone(),
                ("y", Part::Imag) => self.yi.clone(),
                _ => return Err(Error::UnknownVariable(var.to_string())),
            })
        }

        fn perturb(&mut self, var: &str, index: usize, delta: Delta) -> Result<()> {
            assert_eq!(var, "x");
            match delta {
                Delta::Real(h) => self.x[index] += h,
                Delta::Imag(h) => self.xi[index] += h,
            }
            Ok(())
        }

        fn evaluate(&mut self, _active: &ActiveSet, mode: EvalMode) -> Result<()> {
            self.evaluations += 1;
            if self.fail_after.is_some_and(|n| self.evaluations > n) {
                return Err(Error::evaluation("half", "boom"));
            }
            for k in 0..self.x.len() {
                let z = Complex64::new(self.x[k], if mode == EvalMode::Complex { self.xi[k] } else { 0.0 });
                let f = 0.5 * z * z;
                self.y[k] = f.re;
                self.yi[k] = f.im;
            }
            Ok(())
        }

        fn checkpoint(&self) -> Self::Checkpoint {
            (self.x.clone(), self.y.clone())
        }

        fn restore(&mut self, checkpoint: &Self::Checkpoint) {
            self.x.copy_from_slice(&checkpoint.0);
            self.y.copy_from_slice(&checkpoint.1);
            self.xi.fill(0.0);
            self.yi.fill(0.0);
        }

        fn complex_capable(&self) -> bool {
            self.complex
        }

        fn complex_step_active(&self) -> bool {
            self.state.is_active()
        }

        fn enter_complex_step(&mut self, owner: &str, step: f64) {
            self.state.push(owner, step);
        }

        fn exit_complex_step(&mut self) {
            self.state.pop();
        }
    }

    fn scheme(options: ApproxOptions, sparsity: Option<Sparsity>) -> ApproximationScheme {
        let mut scheme = ApproximationScheme::new("half", StepContext::Local);
        scheme
            .add_request(PartialRequest::new("y", "x", options).with_sparsity(sparsity))
            .unwrap();
        scheme
    }

    fn diag_of(jac: &ApproxJacobian) -> Vec<f64> {
        let block = jac[0].to_dense();
        (0..block.nrows()).map(|k| block[(k, k)]).collect()
    }

    #[test]
    fn test_forward_costs_one_evaluation_per_column() {
        let mut target = HalfSquare::new(&[1.0, 2.0, 3.0]);
        let mut s = scheme(ApproxOptions::fd(), None);
        let mut diags = Diagnostics::new();
        let jac = s.compute_approx_jacobian(&mut target, &mut diags).unwrap();
        assert_eq!(target.evaluations, 3);
        for (d, x) in diag_of(&jac).iter().zip([1.0, 2.0, 3.0]) {
            assert!((d - x).abs() < 1e-5, "d = {d}");
        }
        assert_eq!(target.x, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_central_costs_two_and_is_more_accurate() {
        let mut target = HalfSquare::new(&[1.0, 2.0]);
        let mut s = scheme(ApproxOptions::fd().with_form(FdForm::Central).with_step(1e-3), None);
        let jac = s.compute_approx_jacobian(&mut target, &mut Diagnostics::new()).unwrap();
        assert_eq!(target.evaluations, 4);
        // Central differences are exact on quadratics up to rounding.
        for (d, x) in diag_of(&jac).iter().zip([1.0, 2.0]) {
            assert!((d - x).abs() < 1e-9, "d = {d}");
        }
    }

    #[test]
    fn test_rel_element_steps_follow_each_entry() {
        let x = [1e10, -3.0, 1.0, 1e-10, 0.0];
        let mut target = HalfSquare::new(&x);
        let options = ApproxOptions::fd()
            .with_form(FdForm::Central)
            .with_step_calc(StepCalc::RelElement);
        let mut s = scheme(options, None);
        let jac = s.compute_approx_jacobian(&mut target, &mut Diagnostics::new()).unwrap();
        assert_eq!(target.evaluations, 2 * x.len());
        for (d, xk) in diag_of(&jac).iter().zip(x) {
            assert!((d - xk).abs() <= 1e-6 * xk.abs().max(1e-12), "d = {d}, x = {xk}");
        }
        assert_eq!(target.x, x.to_vec());
    }

    #[test]
    fn test_directional_diagonal_uses_one_evaluation() {
        let n = 6;
        let x: Vec<f64> = (1..=n).map(|v| v as f64).collect();
        let mut target = HalfSquare::new(&x);
        let pattern = Sparsity::new((0..n).collect(), (0..n).collect());
        let mut s = scheme(ApproxOptions::fd().with_directional(true), Some(pattern));
        let jac = s.compute_approx_jacobian(&mut target, &mut Diagnostics::new()).unwrap();
        assert_eq!(target.evaluations, 1);
        assert!(jac[0].is_sparse());
        for (d, xk) in diag_of(&jac).iter().zip(&x) {
            assert!((d - xk).abs() < 1e-5);
        }
    }

    #[test]
    fn test_complex_step_is_exact_and_cleans_up() {
        let mut target = HalfSquare::new(&[0.3, -7.0]);
        let mut s = scheme(ApproxOptions::cs(), None);
        let jac = s.compute_approx_jacobian(&mut target, &mut Diagnostics::new()).unwrap();
        for (d, x) in diag_of(&jac).iter().zip([0.3, -7.0]) {
            assert!((d - x).abs() < 1e-14, "d = {d}");
        }
        assert!(target.xi.iter().chain(&target.yi).all(|&v| v == 0.0));
        assert!(!target.state.is_active());
    }

    #[test]
    fn test_nested_complex_step_warns_once_and_falls_back() {
        let mut target = HalfSquare::new(&[2.0]);
        target.state.push("outer", 1e-40);
        let mut s = scheme(ApproxOptions::cs(), None);
        let mut diags = Diagnostics::new();
        for _ in 0..3 {
            let jac = s.compute_approx_jacobian(&mut target, &mut diags).unwrap();
            assert!((diag_of(&jac)[0] - 2.0).abs() < 1e-5);
        }
        assert_eq!(diags.count(DiagnosticKind::NestedComplexStep), 1);
        assert_eq!(diags.messages()[0], format!("half: {NESTED_CS_MESSAGE}"));
        assert_eq!(target.state.depth(), 1);
    }

    #[test]
    fn test_missing_complex_storage_falls_back_once() {
        let mut target = HalfSquare::new(&[2.0]);
        target.complex = false;
        let mut s = scheme(ApproxOptions::cs(), None);
        let mut diags = Diagnostics::new();
        let jac = s.compute_approx_jacobian(&mut target, &mut diags).unwrap();
        assert!((diag_of(&jac)[0] - 2.0).abs() < 1e-5);
        s.compute_approx_jacobian(&mut target, &mut diags).unwrap();
        assert_eq!(diags.count(DiagnosticKind::ComplexStepFallback), 1);
    }

    #[test]
    fn test_plan_cached_until_structure_changes() {
        let mut target = HalfSquare::new(&[1.0, 2.0]);
        let mut s = scheme(ApproxOptions::fd(), None);
        let mut diags = Diagnostics::new();
        s.compute_approx_jacobian(&mut target, &mut diags).unwrap();
        s.compute_approx_jacobian(&mut target, &mut diags).unwrap();
        assert_eq!(s.plan_builds(), 1);

        let v = s.version();
        s.add_request(PartialRequest::new("y", "x", ApproxOptions::cs())).unwrap();
        assert_eq!(s.version(), v + 1);
        s.compute_approx_jacobian(&mut target, &mut diags).unwrap();
        assert_eq!(s.plan_builds(), 2);
    }

    #[test]
    fn test_partitioned_matches_serial() {
        let x = [1.0, -2.0, 3.5, 4.0, 0.5];
        let mut target = HalfSquare::new(&x);
        let mut serial = scheme(ApproxOptions::fd().with_form(FdForm::Central), None);
        let expected = serial
            .compute_approx_jacobian(&mut target, &mut Diagnostics::new())
            .unwrap();

        let mut s = scheme(ApproxOptions::fd().with_form(FdForm::Central), None);
        let mut diags = Diagnostics::new();
        let mut merged = s.compute_partition(&mut target, 0, 3, &mut diags).unwrap();
        for rank in 1..3 {
            let part = s.compute_partition(&mut target, rank, 3, &mut diags).unwrap();
            merged.merge(part).unwrap();
        }
        let jac = s.finish(merged, &mut diags).unwrap();
        assert_eq!(jac[0].to_dense(), expected[0].to_dense());
    }

    #[test]
    fn test_incomplete_partition_is_an_error() {
        let mut target = HalfSquare::new(&[1.0, 2.0]);
        let mut s = scheme(ApproxOptions::fd(), None);
        let mut diags = Diagnostics::new();
        let part = s.compute_partition(&mut target, 0, 2, &mut diags).unwrap();
        assert!(matches!(
            s.finish(part, &mut diags),
            Err(Error::IncompleteAssembly { done: 1, total: 2 })
        ));
    }

    #[test]
    fn test_evaluation_failure_restores_and_propagates() {
        for options in [ApproxOptions::fd(), ApproxOptions::cs()] {
            let mut target = HalfSquare::new(&[1.0, 2.0]);
            target.fail_after = Some(1);
            let mut s = scheme(options, None);
            let err = s
                .compute_approx_jacobian(&mut target, &mut Diagnostics::new())
                .unwrap_err();
            assert!(matches!(err, Error::EvaluationFailure { .. }));
            assert_eq!(target.x, vec![1.0, 2.0]);
            assert!(target.xi.iter().all(|&v| v == 0.0));
            assert!(!target.state.is_active());
        }
    }

    #[test]
    fn test_sparsity_error_behavior() {
        // Declares only the first diagonal entry.
        let pattern = Sparsity::new(vec![0], vec![0]);
        let mut target = HalfSquare::new(&[1.0, 2.0]);
        let mut s = scheme(ApproxOptions::fd(), Some(pattern.clone()))
            .with_sparsity_behavior(SparsityBehavior::Error);
        let err = s
            .compute_approx_jacobian(&mut target, &mut Diagnostics::new())
            .unwrap_err();
        assert!(matches!(err, Error::SparsityMismatch { count: 1, .. }));
        assert_eq!(s.mismatches()[0].rows, vec![1]);
        assert_eq!(s.mismatches()[0].cols, vec![1]);

        let mut s = scheme(ApproxOptions::fd(), Some(pattern));
        let mut diags = Diagnostics::new();
        s.compute_approx_jacobian(&mut target, &mut diags).unwrap();
        s.compute_approx_jacobian(&mut target, &mut diags).unwrap();
        assert_eq!(diags.count(DiagnosticKind::SparsityMismatch), 1);
    }

    #[test]
    fn test_invalid_options_rejected_at_registration() {
        let mut s = ApproximationScheme::new("half", StepContext::Global);
        let bad = ApproxOptions::fd()
            .with_step_calc(StepCalc::RelElement)
            .with_directional(true);
        let err = s.add_request(PartialRequest::new("y", "x", bad)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Option 'directional' is not supported when 'step_calc' is set to 'rel_element'."
        );
        assert!(s.is_empty());
    }
}
