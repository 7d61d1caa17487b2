//! Total derivatives of responses with respect to design variables.
//!
//! Without `approx_totals` on the root, totals follow the chain rule:
//! `(I - A) X = B`, where `A` holds every relevant partial block routed
//! through its input's connection source, and `B` seeds each design
//! variable. Sub-groups that approximate their own totals contribute one
//! approximated block in place of their members' partials.

use std::ops::Index;

use indexmap::IndexMap;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use mdax_approx::{ApproximationScheme, Diagnostics, PartialRequest, StepContext};
use mdax_core::VarKind;

use crate::error::{Error, Result};
use crate::linear::solve_dense_multi;
use crate::model::{Child, Model, ROOT_NAME};
use crate::target::GroupTarget;

/// A design variable or response as seen by the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverVar {
    pub name: String,
    /// Entries of the variable used; all when `None`.
    #[serde(default)]
    pub indices: Option<Vec<usize>>,
    /// Scaling reference; the variable's own reference when `None`.
    #[serde(default)]
    pub reference: Option<f64>,
}

impl DriverVar {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            indices: None,
            reference: None,
        }
    }

    pub fn with_indices(mut self, indices: &[usize]) -> Self {
        self.indices = Some(indices.to_vec());
        self
    }

    pub fn with_ref(mut self, reference: f64) -> Self {
        self.reference = Some(reference);
        self
    }
}

impl From<&str> for DriverVar {
    fn from(name: &str) -> Self {
        DriverVar::new(name)
    }
}

/// Total derivative blocks keyed by `(of, wrt)` as requested.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Totals {
    blocks: IndexMap<(String, String), DMatrix<f64>>,
}

impl Totals {
    pub fn get(&self, of: &str, wrt: &str) -> Option<&DMatrix<f64>> {
        self.blocks.get(&(of.to_string(), wrt.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &DMatrix<f64>)> {
        self.blocks
            .iter()
            .map(|((of, wrt), m)| (of.as_str(), wrt.as_str(), m))
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub(crate) fn insert(&mut self, of: &str, wrt: &str, block: DMatrix<f64>) {
        self.blocks.insert((of.to_string(), wrt.to_string()), block);
    }

    pub(crate) fn get_mut(&mut self, of: &str, wrt: &str) -> Option<&mut DMatrix<f64>> {
        self.blocks.get_mut(&(of.to_string(), wrt.to_string()))
    }
}

impl Index<(&str, &str)> for Totals {
    type Output = DMatrix<f64>;

    fn index(&self, (of, wrt): (&str, &str)) -> &DMatrix<f64> {
        match self.get(of, wrt) {
            Some(m) => m,
            None => panic!("no totals of '{of}' wrt '{wrt}'"),
        }
    }
}

/// A partial block placed in the model: output `of` by input `wrt`, as variable ids.
#[derive(Debug, Clone)]
pub(crate) struct LinearBlock {
    pub(crate) of: usize,
    pub(crate) wrt: usize,
    pub(crate) block: DMatrix<f64>,
}

impl Model {
    /// Variable whose value stands for `name`: a connected input reads its source.
    pub(crate) fn effective_id(&self, name: &str) -> Result<usize> {
        let id = self.variable_id(name)?;
        Ok(self.sources[id].unwrap_or(id))
    }

    /// Entries of `var` selected by `indices`, checked against its size.
    pub(crate) fn selection(&self, var: &DriverVar) -> Result<Vec<usize>> {
        let size = self.variables[self.variable_id(&var.name)?].size;
        match &var.indices {
            Some(idx) => {
                if let Some(&bad) = idx.iter().find(|&&i| i >= size) {
                    return Err(Error::InvalidConfiguration(format!(
                        "index {bad} out of range for '{}' of size {size}",
                        var.name
                    )));
                }
                Ok(idx.clone())
            }
            None => Ok((0..size).collect()),
        }
    }

    /// Requests for every `(of, wrt)` pair, in effective variable names.
    pub(crate) fn total_requests(
        &self,
        of: &[DriverVar],
        wrt: &[DriverVar],
        options: &mdax_core::ApproxOptions,
    ) -> Result<Vec<PartialRequest>> {
        let mut requests = Vec::with_capacity(of.len() * wrt.len());
        for o in of {
            let of_name = &self.variables[self.effective_id(&o.name)?].name;
            for w in wrt {
                let wrt_name = &self.variables[self.effective_id(&w.name)?].name;
                requests.push(
                    PartialRequest::new(of_name, wrt_name, options.clone())
                        .with_of_indices(o.indices.clone())
                        .with_wrt_indices(w.indices.clone()),
                );
            }
        }
        Ok(requests)
    }

    /// Total derivatives of `of` with respect to `wrt` at the current state.
    pub fn compute_totals(&mut self, of: &[DriverVar], wrt: &[DriverVar]) -> Result<Totals> {
        if of.is_empty() || wrt.is_empty() {
            return Err(Error::InvalidConfiguration(
                "totals need at least one response and one design variable".to_string(),
            ));
        }
        for v in of.iter().chain(wrt) {
            self.selection(v)?;
        }
        match self.groups[0].approx.clone() {
            Some(options) => self.approx_totals(of, wrt, &options),
            None => self.chain_rule_totals(of, wrt),
        }
    }

    /// Totals scaled by `ref(wrt) / ref(of)`.
    pub fn compute_totals_scaled(&mut self, of: &[DriverVar], wrt: &[DriverVar]) -> Result<Totals> {
        let mut totals = self.compute_totals(of, wrt)?;
        for o in of {
            let ref_of = match o.reference {
                Some(r) => r,
                None => self.variables[self.variable_id(&o.name)?].reference,
            };
            for w in wrt {
                let ref_wrt = match w.reference {
                    Some(r) => r,
                    None => self.variables[self.variable_id(&w.name)?].reference,
                };
                if let Some(block) = totals.get_mut(&o.name, &w.name) {
                    *block *= ref_wrt / ref_of;
                }
            }
        }
        Ok(totals)
    }

    fn approx_totals(
        &mut self,
        of: &[DriverVar],
        wrt: &[DriverVar],
        options: &mdax_core::ApproxOptions,
    ) -> Result<Totals> {
        let requests = self.total_requests(of, wrt, options)?;
        let mut scheme = match self.groups[0].scheme.take() {
            Some(scheme) => scheme,
            None => ApproximationScheme::new(ROOT_NAME, StepContext::Global)
                .with_sparsity_behavior(self.sparsity_behavior),
        };
        if self.root_requests.as_ref() != Some(&requests) {
            scheme.clear_requests();
            for req in &requests {
                if let Err(e) = scheme.add_request(req.clone()) {
                    self.groups[0].scheme = Some(scheme);
                    return Err(e.into());
                }
            }
            self.root_requests = Some(requests.clone());
        }

        let mut diagnostics = Diagnostics::new();
        let result = scheme.compute_approx_jacobian(&mut GroupTarget::new(self, 0), &mut diagnostics);
        self.groups[0].scheme = Some(scheme);
        self.diagnostics.extend(diagnostics);
        let jac = result?;

        let mut totals = Totals::default();
        let pairs = of.iter().flat_map(|o| wrt.iter().map(move |w| (o, w)));
        for ((o, w), req) in pairs.zip(&requests) {
            let block = jac
                .get(&(req.of.clone(), req.wrt.clone()))
                .map(|b| b.to_dense())
                .ok_or_else(|| Error::UnknownVariable(format!("totals of '{}' wrt '{}'", o.name, w.name)))?;
            totals.insert(&o.name, &w.name, block);
        }
        Ok(totals)
    }

    /// Approximate the totals of sub-group `g` and return its blocks.
    fn group_blocks(&mut self, g: usize) -> Result<Vec<LinearBlock>> {
        let Some(mut scheme) = self.groups[g].scheme.take() else {
            return Ok(Vec::new());
        };
        let mut diagnostics = Diagnostics::new();
        let result = scheme.compute_approx_jacobian(&mut GroupTarget::new(self, g), &mut diagnostics);
        self.groups[g].scheme = Some(scheme);
        self.diagnostics.extend(diagnostics);

        let mut blocks = Vec::new();
        for ((of, wrt), block) in result? {
            blocks.push(LinearBlock {
                of: self.variable_id(&of)?,
                wrt: self.variable_id(&wrt)?,
                block: block.to_dense(),
            });
        }
        Ok(blocks)
    }

    /// Relevant partial blocks under group `g`, linearizing as needed.
    fn collect_blocks(
        &mut self,
        g: usize,
        downstream: &[bool],
        upstream: &[bool],
        out: &mut Vec<LinearBlock>,
    ) -> Result<()> {
        for k in 0..self.groups[g].children.len() {
            match self.groups[g].children[k] {
                Child::Group(h) => {
                    let approximated = self.groups[h].approx.is_some();
                    if approximated {
                        let relevant = self.groups[h].components.clone().any(|c| {
                            self.graph
                                .component_edges(c)
                                .iter()
                                .any(|&(i, o)| downstream[i] && upstream[o])
                        });
                        if relevant {
                            out.extend(self.group_blocks(h)?);
                        }
                    } else {
                        self.collect_blocks(h, downstream, upstream, out)?;
                    }
                }
                Child::Component(c) => {
                    let entry = &self.components[c];
                    let mut relevant = Vec::with_capacity(entry.resolved.len());
                    for p in &entry.resolved {
                        let on = match (entry.input_id(&p.wrt), entry.output_id(&p.of)) {
                            (Some(i), Some(o)) => downstream[i] && upstream[o],
                            _ => false,
                        };
                        relevant.push(on);
                    }
                    if !relevant.iter().any(|&on| on) {
                        continue;
                    }
                    self.linearize(c, Some(&relevant))?;
                    let entry = &self.components[c];
                    for (p, _) in entry.resolved.iter().zip(&relevant).filter(|(_, on)| **on) {
                        let (Some(i), Some(o)) = (entry.input_id(&p.wrt), entry.output_id(&p.of)) else {
                            continue;
                        };
                        if let Some(block) = entry.partials.get(&p.of, &p.wrt) {
                            out.push(LinearBlock {
                                of: o,
                                wrt: i,
                                block: block.to_dense(),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn chain_rule_totals(&mut self, of: &[DriverVar], wrt: &[DriverVar]) -> Result<Totals> {
        let of_ids: Vec<usize> = of
            .iter()
            .map(|v| self.effective_id(&v.name))
            .collect::<Result<_>>()?;
        let wrt_ids: Vec<usize> = wrt
            .iter()
            .map(|v| self.effective_id(&v.name))
            .collect::<Result<_>>()?;
        let downstream = self.graph.reachable_from(&wrt_ids);
        let upstream = self.graph.reaching(&of_ids);

        let mut blocks = Vec::new();
        self.collect_blocks(0, &downstream, &upstream, &mut blocks)?;

        let n = self.outputs.len();
        let mut a = DMatrix::identity(n, n);
        for b in &blocks {
            if let Some(src) = self.sources[b.wrt] {
                let row = self.variables[b.of].offset;
                let col = self.variables[src].offset;
                let mut view = a.view_mut((row, col), b.block.shape());
                view -= &b.block;
            }
        }

        let selections: Vec<Vec<usize>> = wrt.iter().map(|w| self.selection(w)).collect::<Result<_>>()?;
        let ncols: usize = selections.iter().map(Vec::len).sum();
        let mut rhs = DMatrix::zeros(n, ncols);
        let mut col0 = 0;
        for (&w, idx) in wrt_ids.iter().zip(&selections) {
            let var = &self.variables[w];
            match var.kind {
                VarKind::Output => {
                    for (k, &i) in idx.iter().enumerate() {
                        rhs[(var.offset + i, col0 + k)] = 1.0;
                    }
                }
                VarKind::Input => {
                    for b in blocks.iter().filter(|b| b.wrt == w) {
                        let row0 = self.variables[b.of].offset;
                        for (k, &i) in idx.iter().enumerate() {
                            for r in 0..b.block.nrows() {
                                rhs[(row0 + r, col0 + k)] += b.block[(r, i)];
                            }
                        }
                    }
                }
            }
            col0 += idx.len();
        }

        let x = solve_dense_multi(&a, &rhs)?;

        let mut totals = Totals::default();
        for (o, &o_id) in of.iter().zip(&of_ids) {
            let rows = self.selection(o)?;
            let var = &self.variables[o_id];
            let mut col0 = 0;
            for ((w, &w_id), idx) in wrt.iter().zip(&wrt_ids).zip(&selections) {
                let mut block = DMatrix::zeros(rows.len(), idx.len());
                match var.kind {
                    VarKind::Output => {
                        for (r, &i) in rows.iter().enumerate() {
                            for k in 0..idx.len() {
                                block[(r, k)] = x[(var.offset + i, col0 + k)];
                            }
                        }
                    }
                    // An unconnected input only depends on itself.
                    VarKind::Input => {
                        if o_id == w_id {
                            for (r, &i) in rows.iter().enumerate() {
                                for (k, &j) in idx.iter().enumerate() {
                                    if i == j {
                                        block[(r, k)] = 1.0;
                                    }
                                }
                            }
                        }
                    }
                }
                totals.insert(&o.name, &w.name, block);
                col0 += idx.len();
            }
        }
        Ok(totals)
    }
}
