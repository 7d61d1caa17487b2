//! The flattened model: variable storage, execution and linearization.
//!
//! Setup walks the group tree depth first. Components are stored in
//! execution order and every group owns a contiguous range of them, so a
//! group's outputs form one contiguous slice of the output vector.

use std::collections::BTreeSet;
use std::ops::Range;

use indexmap::IndexMap;
use num_complex::Complex64;

use mdax_approx::{
    ActiveSet, ApproximationScheme, ComplexStepState, Diagnostics, EvalMode, PartialRequest,
    StepContext,
};
use mdax_core::{
    ApproxOptions, Component, Declarations, DependencyGraph, Inputs, LocalLayout, Method, Outputs,
    Partials, ResolvedPartial, SparsityBehavior, VarKind, Variable, Vector,
};

use crate::error::{Error, Result};
use crate::problem::SetupOptions;
use crate::system::{Group, NonlinearSolver, Subsystem};
use crate::target::ComponentTarget;

/// Name used for the root group in diagnostics.
pub const ROOT_NAME: &str = "model";

/// An approximation scheme of one component and the blocks it may approximate.
pub(crate) struct SchemeSlot {
    pub(crate) method: Method,
    pub(crate) scheme: ApproximationScheme,
    /// Indices into the component's resolved partials.
    blocks: Vec<usize>,
    /// Blocks currently registered with the scheme.
    selected: Option<Vec<bool>>,
}

impl SchemeSlot {
    /// Register the blocks allowed by `relevant` (all when `None`).
    /// The scheme is left untouched when the selection did not change.
    fn select(&mut self, resolved: &[ResolvedPartial], relevant: Option<&[bool]>) -> Result<()> {
        let selected: Vec<bool> = self
            .blocks
            .iter()
            .map(|&k| relevant.is_none_or(|r| r[k]))
            .collect();
        if self.selected.as_ref() == Some(&selected) {
            return Ok(());
        }
        self.scheme.clear_requests();
        for (&k, _) in self.blocks.iter().zip(&selected).filter(|(_, on)| **on) {
            self.scheme.add_request(request_for(&resolved[k])?)?;
        }
        self.selected = Some(selected);
        Ok(())
    }
}

fn request_for(partial: &ResolvedPartial) -> Result<PartialRequest> {
    let options = partial.approx.clone().ok_or_else(|| {
        Error::InvalidConfiguration(format!(
            "partials of '{}' wrt '{}' are not approximated",
            partial.of, partial.wrt
        ))
    })?;
    Ok(PartialRequest::new(&partial.of, &partial.wrt, options)
        .with_sparsity(partial.sparsity.clone())
        .with_wildcard(partial.wildcard))
}

pub(crate) struct ComponentEntry {
    pub(crate) path: String,
    pub(crate) component: Box<dyn Component>,
    pub(crate) layout: LocalLayout,
    /// Slice of the input vector.
    pub(crate) inputs: Range<usize>,
    /// Slice of the output vector.
    pub(crate) outputs: Range<usize>,
    /// Variable ids in local declaration order.
    pub(crate) input_ids: Vec<usize>,
    pub(crate) output_ids: Vec<usize>,
    pub(crate) resolved: Vec<ResolvedPartial>,
    pub(crate) partials: Partials,
    pub(crate) schemes: Vec<SchemeSlot>,
    pub(crate) check_options: Option<ApproxOptions>,
    pub(crate) complex_safe: bool,
    pub(crate) exec_count: usize,
}

impl ComponentEntry {
    /// Variable id of local output `name`.
    pub(crate) fn output_id(&self, name: &str) -> Option<usize> {
        self.layout
            .outputs
            .get_index_of(name)
            .map(|k| self.output_ids[k])
    }

    /// Variable id of local input `name`.
    pub(crate) fn input_id(&self, name: &str) -> Option<usize> {
        self.layout.inputs.get_index_of(name).map(|k| self.input_ids[k])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Child {
    Component(usize),
    Group(usize),
}

pub(crate) struct GroupEntry {
    /// Dotted path; empty for the root.
    pub(crate) path: String,
    pub(crate) components: Range<usize>,
    pub(crate) children: Vec<Child>,
    pub(crate) solver: NonlinearSolver,
    pub(crate) approx: Option<ApproxOptions>,
    pub(crate) scheme: Option<ApproximationScheme>,
}

impl GroupEntry {
    /// Name used in diagnostics.
    pub(crate) fn label(&self) -> &str {
        if self.path.is_empty() { ROOT_NAME } else { &self.path }
    }
}

/// Evaluate one component from `inputs[in_range]` into `outputs[out_range]`.
pub(crate) fn evaluate_component(
    component: &mut dyn Component,
    layout: &LocalLayout,
    inputs: &Vector,
    in_range: Range<usize>,
    outputs: &mut Vector,
    out_range: Range<usize>,
    complex: bool,
) -> mdax_core::Result<()> {
    if complex {
        let mut x: Vec<Complex64> = Vec::with_capacity(in_range.len());
        let mut y: Vec<Complex64> = Vec::with_capacity(out_range.len());
        inputs.gather(in_range, &mut x);
        outputs.gather(out_range.clone(), &mut y);
        component.compute_complex(&Inputs::new(layout, &x), &mut Outputs::new(layout, &mut y))?;
        outputs.scatter(out_range.start, &y);
    } else {
        let mut x: Vec<f64> = Vec::with_capacity(in_range.len());
        let mut y: Vec<f64> = Vec::with_capacity(out_range.len());
        inputs.gather(in_range, &mut x);
        outputs.gather(out_range.clone(), &mut y);
        component.compute_real(&Inputs::new(layout, &x), &mut Outputs::new(layout, &mut y))?;
        outputs.scatter(out_range.start, &y);
    }
    Ok(())
}

/// A model after setup.
pub struct Model {
    pub(crate) components: Vec<ComponentEntry>,
    /// `groups[0]` is the root.
    pub(crate) groups: Vec<GroupEntry>,
    /// Variables by absolute name; ids match dependency graph nodes.
    pub(crate) variables: IndexMap<String, Variable>,
    /// Connection source of each input, by variable id.
    pub(crate) sources: Vec<Option<usize>>,
    pub(crate) graph: DependencyGraph,
    pub(crate) inputs: Vector,
    pub(crate) outputs: Vector,
    pub(crate) residuals: Vector,
    pub(crate) complex: bool,
    pub(crate) cs_state: ComplexStepState,
    pub(crate) diagnostics: Diagnostics,
    pub(crate) sparsity_behavior: SparsityBehavior,
    /// Requests currently registered with the root scheme.
    pub(crate) root_requests: Option<Vec<PartialRequest>>,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("components", &self.num_components())
            .field("variables", &self.variables.len())
            .field("complex", &self.complex)
            .finish()
    }
}

struct Builder {
    components: Vec<ComponentEntry>,
    groups: Vec<GroupEntry>,
    variables: IndexMap<String, Variable>,
    graph: DependencyGraph,
    connections: Vec<(String, String)>,
    input_len: usize,
    output_len: usize,
    sparsity_behavior: SparsityBehavior,
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

impl Builder {
    fn add_group(&mut self, path: String, group: Group) -> Result<usize> {
        let Group {
            subsystems,
            connections,
            solver,
            approx,
        } = group;
        let g = self.groups.len();
        self.groups.push(GroupEntry {
            path: path.clone(),
            components: 0..0,
            children: Vec::new(),
            solver,
            approx,
            scheme: None,
        });

        let start = self.components.len();
        let mut seen = BTreeSet::new();
        for (name, subsystem) in subsystems {
            if name.is_empty() || name.contains('.') {
                return Err(Error::Setup(format!("'{name}' is not a valid subsystem name")));
            }
            if !seen.insert(name.clone()) {
                return Err(Error::Setup(format!(
                    "duplicate subsystem '{}'",
                    join(&path, &name)
                )));
            }
            let child_path = join(&path, &name);
            let child = match subsystem {
                Subsystem::Component(component) => Child::Component(self.add_component(child_path, component)?),
                Subsystem::Group(group) => Child::Group(self.add_group(child_path, group)?),
            };
            self.groups[g].children.push(child);
        }
        self.groups[g].components = start..self.components.len();

        for (src, tgt) in connections {
            self.connections.push((join(&path, &src), join(&path, &tgt)));
        }
        Ok(g)
    }

    fn add_variable(&mut self, path: &str, local: &str, kind: VarKind, owner: usize, spec: &mdax_core::VarSpec) -> Result<usize> {
        let name = join(path, local);
        if self.variables.contains_key(&name) {
            return Err(Error::Setup(format!("duplicate variable '{name}'")));
        }
        let id = self.graph.add_variable(&name, kind, owner);
        let size = spec.size();
        let offset = match kind {
            VarKind::Input => {
                self.input_len += size;
                self.input_len - size
            }
            VarKind::Output => {
                self.output_len += size;
                self.output_len - size
            }
        };
        self.variables.insert(
            name.clone(),
            Variable {
                name,
                local: local.to_string(),
                kind,
                owner,
                shape: spec.shape.clone(),
                size,
                offset,
                default: spec.value.clone(),
                reference: spec.reference,
            },
        );
        Ok(id)
    }

    fn add_component(&mut self, path: String, mut component: Box<dyn Component>) -> Result<usize> {
        let mut decl = Declarations::new();
        component
            .setup(&mut decl)
            .map_err(|e| Error::component(&path, e))?;
        let layout = LocalLayout::from_declarations(&decl);
        let resolved = decl
            .resolve_partials()
            .map_err(|e| Error::component(&path, e))?;

        let c = self.graph.add_component(&path);
        let in_start = self.input_len;
        let out_start = self.output_len;
        let mut input_ids = Vec::with_capacity(decl.inputs().len());
        for (name, spec) in decl.inputs() {
            input_ids.push(self.add_variable(&path, name, VarKind::Input, c, spec)?);
        }
        let mut output_ids = Vec::with_capacity(decl.outputs().len());
        for (name, spec) in decl.outputs() {
            output_ids.push(self.add_variable(&path, name, VarKind::Output, c, spec)?);
        }

        for p in &resolved {
            let (Some(i), Some(o)) = (
                layout.inputs.get_index_of(&p.wrt),
                layout.outputs.get_index_of(&p.of),
            ) else {
                continue;
            };
            self.graph.add_dependency(input_ids[i], output_ids[o]);
            if p.wildcard {
                self.graph.set_all_to_all(c);
            }
        }

        let schemes = decl
            .approx_methods()
            .into_iter()
            .map(|method| SchemeSlot {
                method,
                scheme: ApproximationScheme::new(&path, StepContext::Local)
                    .with_sparsity_behavior(self.sparsity_behavior),
                blocks: resolved
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| p.approx.as_ref().is_some_and(|o| o.method == method))
                    .map(|(k, _)| k)
                    .collect(),
                selected: None,
            })
            .collect();

        let partials = Partials::new(&resolved, &layout);
        let complex_safe = component.complex_safe();
        self.components.push(ComponentEntry {
            path,
            component,
            layout,
            inputs: in_start..self.input_len,
            outputs: out_start..self.output_len,
            input_ids,
            output_ids,
            resolved,
            partials,
            schemes,
            check_options: decl.check_options().cloned(),
            complex_safe,
            exec_count: 0,
        });
        Ok(c)
    }
}

impl Model {
    /// Flatten `root` and allocate storage.
    pub fn build(root: Group, options: &SetupOptions) -> Result<Self> {
        let mut builder = Builder {
            components: Vec::new(),
            groups: Vec::new(),
            variables: IndexMap::new(),
            graph: DependencyGraph::new(),
            connections: Vec::new(),
            input_len: 0,
            output_len: 0,
            sparsity_behavior: options.sparsity_behavior,
        };
        builder.add_group(String::new(), root)?;
        let Builder {
            components,
            mut groups,
            variables,
            mut graph,
            connections,
            input_len,
            output_len,
            ..
        } = builder;

        let mut sources: Vec<Option<usize>> = vec![None; variables.len()];
        for (src, tgt) in &connections {
            let s = variables.get_index_of(src).ok_or_else(|| {
                Error::ConnectionError(format!("source '{src}' of the connection to '{tgt}' does not exist"))
            })?;
            let t = variables.get_index_of(tgt).ok_or_else(|| {
                Error::ConnectionError(format!("target '{tgt}' of the connection from '{src}' does not exist"))
            })?;
            if variables[s].kind != VarKind::Output {
                return Err(Error::ConnectionError(format!("'{src}' is not an output")));
            }
            if variables[t].kind != VarKind::Input {
                return Err(Error::ConnectionError(format!("'{tgt}' is not an input")));
            }
            if variables[s].size != variables[t].size {
                return Err(Error::ConnectionError(format!(
                    "cannot connect '{src}' of size {} to '{tgt}' of size {}",
                    variables[s].size, variables[t].size
                )));
            }
            if let Some(prev) = sources[t] {
                return Err(Error::ConnectionError(format!(
                    "input '{tgt}' is connected to both '{}' and '{src}'",
                    variables[prev].name
                )));
            }
            sources[t] = Some(s);
            graph.add_connection(s, t);
        }
        graph.finalize();

        let complex = options.force_alloc_complex
            || components
                .iter()
                .any(|c| c.schemes.iter().any(|s| s.method == Method::Cs))
            || groups
                .iter()
                .any(|g| g.approx.as_ref().is_some_and(|o| o.method == Method::Cs));

        let mut inputs = Vector::zeros(input_len, complex);
        let mut outputs = Vector::zeros(output_len, complex);
        for var in variables.values() {
            let target = match var.kind {
                VarKind::Input => inputs.real_mut(),
                VarKind::Output => outputs.real_mut(),
            };
            target[var.range()].copy_from_slice(&var.default);
        }

        for group in groups.iter_mut() {
            let Some(approx) = group.approx.clone() else {
                continue;
            };
            approx.validate()?;
            let mut scheme = ApproximationScheme::new(group.label(), StepContext::Global)
                .with_sparsity_behavior(options.sparsity_behavior);
            // The root registers its requests per totals call.
            if !group.path.is_empty() {
                let range = group.components.clone();
                let external = external_inputs(&components, &variables, &sources, &range);
                for c in range {
                    for &out in &components[c].output_ids {
                        for &ext in &external {
                            scheme.add_request(PartialRequest::new(
                                &variables[out].name,
                                &variables[ext].name,
                                approx.clone(),
                            ))?;
                        }
                    }
                }
            }
            group.scheme = Some(scheme);
        }

        log::debug!(
            "model set up: {} components, {} variables, complex storage {}",
            components.len(),
            variables.len(),
            complex
        );

        Ok(Self {
            components,
            groups,
            variables,
            sources,
            graph,
            inputs,
            outputs,
            residuals: Vector::zeros(output_len, complex),
            complex,
            cs_state: ComplexStepState::new(),
            diagnostics: Diagnostics::new(),
            sparsity_behavior: options.sparsity_behavior,
            root_requests: None,
        })
    }
}

/// Inputs of components in `range` fed from outside it, or not connected at all.
fn external_inputs(
    components: &[ComponentEntry],
    variables: &IndexMap<String, Variable>,
    sources: &[Option<usize>],
    range: &Range<usize>,
) -> Vec<usize> {
    range
        .clone()
        .flat_map(|c| components[c].input_ids.iter().copied())
        .filter(|&id| sources[id].is_none_or(|s| !range.contains(&variables[s].owner)))
        .collect()
}

impl Model {
    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    /// Component paths in execution order.
    pub fn component_paths(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(|c| c.path.as_str())
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.variables.values()
    }

    /// Whether the vectors carry an imaginary shadow.
    pub fn is_complex(&self) -> bool {
        self.complex
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn clear_diagnostics(&mut self) {
        self.diagnostics.clear();
    }

    /// Compute calls made on the component at `path`, including those made
    /// while approximating derivatives.
    pub fn exec_count(&self, path: &str) -> Option<usize> {
        self.components
            .iter()
            .find(|c| c.path == path)
            .map(|c| c.exec_count)
    }

    /// Largest imaginary part left in any vector; zero outside a complex step.
    pub fn imaginary_norm(&self) -> f64 {
        self.inputs
            .imag_max_abs()
            .max(self.outputs.imag_max_abs())
            .max(self.residuals.imag_max_abs())
    }

    pub(crate) fn variable_id(&self, name: &str) -> Result<usize> {
        self.variables
            .get_index_of(name)
            .ok_or_else(|| Error::UnknownVariable(name.to_string()))
    }

    pub(crate) fn vector(&self, kind: VarKind) -> &Vector {
        match kind {
            VarKind::Input => &self.inputs,
            VarKind::Output => &self.outputs,
        }
    }

    pub(crate) fn vector_mut(&mut self, kind: VarKind) -> &mut Vector {
        match kind {
            VarKind::Input => &mut self.inputs,
            VarKind::Output => &mut self.outputs,
        }
    }

    /// Real values of a variable.
    pub fn value(&self, name: &str) -> Result<Vec<f64>> {
        let var = &self.variables[self.variable_id(name)?];
        Ok(self.vector(var.kind).real()[var.range()].to_vec())
    }

    pub fn set_value(&mut self, name: &str, values: &[f64]) -> Result<()> {
        let id = self.variable_id(name)?;
        let (kind, range) = (self.variables[id].kind, self.variables[id].range());
        if values.len() != range.len() {
            return Err(Error::DimensionMismatch {
                expected: range.len(),
                actual: values.len(),
            });
        }
        self.vector_mut(kind).real_mut()[range].copy_from_slice(values);
        Ok(())
    }

    /// Run the whole model in real arithmetic.
    pub fn run(&mut self) -> Result<()> {
        let scope = 0..self.components.len();
        self.solve_group(0, &ActiveSet::All, EvalMode::Real, &scope)
    }

    /// Converge group `g` with its solver. Only connections whose source
    /// lies in `scope` are transferred.
    pub(crate) fn solve_group(
        &mut self,
        g: usize,
        active: &ActiveSet,
        mode: EvalMode,
        scope: &Range<usize>,
    ) -> Result<()> {
        match self.groups[g].solver.clone() {
            NonlinearSolver::RunOnce => self.run_children(g, active, mode, scope),
            NonlinearSolver::Newton(options) => {
                if self.groups[g].components.clone().any(|c| active.contains(c)) {
                    self.newton(g, &options, mode, scope)?;
                }
                Ok(())
            }
        }
    }

    fn run_children(&mut self, g: usize, active: &ActiveSet, mode: EvalMode, scope: &Range<usize>) -> Result<()> {
        for k in 0..self.groups[g].children.len() {
            match self.groups[g].children[k] {
                Child::Component(c) => {
                    if active.contains(c) {
                        self.transfer(c, scope);
                        self.compute_component(c, mode)?;
                    }
                }
                Child::Group(h) => self.solve_group(h, active, mode, scope)?,
            }
        }
        Ok(())
    }

    /// Pull connected values into the inputs of component `c`.
    pub(crate) fn transfer(&mut self, c: usize, scope: &Range<usize>) {
        for &id in &self.components[c].input_ids {
            let Some(src) = self.sources[id] else {
                continue;
            };
            let source = &self.variables[src];
            if !scope.contains(&source.owner) {
                continue;
            }
            let from = source.range();
            let to = self.variables[id].range();
            self.inputs.real_mut()[to.clone()].copy_from_slice(&self.outputs.real()[from.clone()]);
            if let (Some(dst), Some(src)) = (self.inputs.imag_mut(), self.outputs.imag()) {
                dst[to].copy_from_slice(&src[from]);
            }
        }
    }

    pub(crate) fn compute_component(&mut self, c: usize, mode: EvalMode) -> Result<()> {
        let complex = mode == EvalMode::Complex && self.complex;
        let entry = &mut self.components[c];
        entry.exec_count += 1;
        evaluate_component(
            entry.component.as_mut(),
            &entry.layout,
            &self.inputs,
            entry.inputs.clone(),
            &mut self.outputs,
            entry.outputs.clone(),
            complex,
        )
        .map_err(|e| Error::component(&entry.path, e))
    }

    /// Fill the partials of component `c` at the real part of the current
    /// state: analytic blocks first, then every approximated block allowed
    /// by `relevant` (indexed like the component's resolved partials).
    ///
    /// The stored outputs must equal `f(x)`; use [`Model::linearize_at`]
    /// when they hold something else.
    pub(crate) fn linearize(&mut self, c: usize, relevant: Option<&[bool]>) -> Result<()> {
        self.linearize_at(c, relevant, None)
    }

    /// Like [`Model::linearize`], with `baseline` as the component's outputs
    /// at the current inputs when given.
    pub(crate) fn linearize_at(
        &mut self,
        c: usize,
        relevant: Option<&[bool]>,
        baseline: Option<&[f64]>,
    ) -> Result<()> {
        let outer_active = self.cs_state.is_active();
        let complex = self.complex;
        let diagnostics = &mut self.diagnostics;
        let entry = &mut self.components[c];
        let x = self.inputs.real()[entry.inputs.clone()].to_vec();
        let y = match baseline {
            Some(f) => {
                if f.len() != entry.outputs.len() {
                    return Err(Error::DimensionMismatch {
                        expected: entry.outputs.len(),
                        actual: f.len(),
                    });
                }
                f.to_vec()
            }
            None => self.outputs.real()[entry.outputs.clone()].to_vec(),
        };

        entry
            .component
            .compute_partials(&Inputs::new(&entry.layout, &x), &mut entry.partials)
            .map_err(|e| Error::component(&entry.path, e))?;

        for slot in entry.schemes.iter_mut() {
            slot.select(&entry.resolved, relevant)?;
            if slot.scheme.is_empty() {
                continue;
            }
            let mut target = ComponentTarget::new(
                &entry.path,
                entry.component.as_mut(),
                &entry.layout,
                &mut entry.exec_count,
                &x,
                &y,
                complex && entry.complex_safe,
                outer_active,
            );
            let jac = slot.scheme.compute_approx_jacobian(&mut target, diagnostics)?;
            for ((of, wrt), block) in jac {
                entry.partials.insert(&of, &wrt, block)?;
            }
        }
        Ok(())
    }
}
