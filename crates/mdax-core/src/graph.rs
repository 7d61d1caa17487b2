//! Variable-level dependency graph.
//!
//! Nodes are variables. Edges run from a connection source to its target
//! input, and from a component input to each component output that was
//! declared to depend on it.

use indexmap::IndexMap;

use crate::variable::VarKind;

#[derive(Debug, Clone, PartialEq)]
struct Node {
    kind: VarKind,
    owner: usize,
}

#[derive(Debug, Clone, Default)]
struct ComponentNode {
    name: String,
    inputs: Vec<usize>,
    outputs: Vec<usize>,
    /// Declared `(input, output)` dependencies.
    declared: Vec<(usize, usize)>,
    all_to_all: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: IndexMap<String, Node>,
    components: Vec<ComponentNode>,
    connections: Vec<(usize, usize)>,
    succ: Vec<Vec<usize>>,
    pred: Vec<Vec<usize>>,
    finalized: bool,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component; returns its index.
    pub fn add_component(&mut self, name: &str) -> usize {
        self.components.push(ComponentNode {
            name: name.to_string(),
            ..Default::default()
        });
        self.finalized = false;
        self.components.len() - 1
    }

    /// Register a variable owned by component `owner`; returns its node index.
    pub fn add_variable(&mut self, name: &str, kind: VarKind, owner: usize) -> usize {
        let (index, _) = self
            .nodes
            .insert_full(name.to_string(), Node { kind, owner });
        let comp = &mut self.components[owner];
        match kind {
            VarKind::Input => comp.inputs.push(index),
            VarKind::Output => comp.outputs.push(index),
        }
        self.finalized = false;
        index
    }

    pub fn add_connection(&mut self, src: usize, tgt: usize) {
        self.connections.push((src, tgt));
        self.finalized = false;
    }

    /// Declare that output `output` of its owner depends on input `input`.
    pub fn add_dependency(&mut self, input: usize, output: usize) {
        let owner = self.nodes[output].owner;
        self.components[owner].declared.push((input, output));
        self.finalized = false;
    }

    /// Treat every output of `comp` as depending on every input.
    pub fn set_all_to_all(&mut self, comp: usize) {
        self.components[comp].all_to_all = true;
        self.finalized = false;
    }

    /// Build adjacency lists. Components without any declared dependency are all-to-all.
    pub fn finalize(&mut self) {
        let n = self.nodes.len();
        self.succ = vec![Vec::new(); n];
        self.pred = vec![Vec::new(); n];
        for &(src, tgt) in &self.connections {
            self.succ[src].push(tgt);
            self.pred[tgt].push(src);
        }
        for c in 0..self.components.len() {
            for (i, o) in self.component_edges(c) {
                self.succ[i].push(o);
                self.pred[o].push(i);
            }
        }
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    pub fn node(&self, name: &str) -> Option<usize> {
        self.nodes.get_index_of(name)
    }

    pub fn node_name(&self, node: usize) -> &str {
        self.nodes
            .get_index(node)
            .map(|(name, _)| name.as_str())
            .unwrap_or("")
    }

    pub fn owner(&self, node: usize) -> usize {
        self.nodes[node].owner
    }

    pub fn kind(&self, node: usize) -> VarKind {
        self.nodes[node].kind
    }

    pub fn component_name(&self, comp: usize) -> &str {
        &self.components[comp].name
    }

    /// Whether `comp` is treated as all-to-all, explicitly or for lack of declarations.
    pub fn is_all_to_all(&self, comp: usize) -> bool {
        let c = &self.components[comp];
        c.all_to_all || c.declared.is_empty()
    }

    /// `(input, output)` dependency edges of one component.
    pub fn component_edges(&self, comp: usize) -> Vec<(usize, usize)> {
        let c = &self.components[comp];
        if self.is_all_to_all(comp) {
            c.inputs
                .iter()
                .flat_map(|&i| c.outputs.iter().map(move |&o| (i, o)))
                .collect()
        } else {
            c.declared.clone()
        }
    }

    pub fn component_outputs(&self, comp: usize) -> &[usize] {
        &self.components[comp].outputs
    }

    pub fn component_inputs(&self, comp: usize) -> &[usize] {
        &self.components[comp].inputs
    }

    /// Nodes reachable from `seeds` following edges forward, seeds included.
    pub fn reachable_from(&self, seeds: &[usize]) -> Vec<bool> {
        Self::flood(&self.succ, self.nodes.len(), seeds)
    }

    /// Nodes from which some seed is reachable, seeds included.
    pub fn reaching(&self, seeds: &[usize]) -> Vec<bool> {
        Self::flood(&self.pred, self.nodes.len(), seeds)
    }

    fn flood(adj: &[Vec<usize>], n: usize, seeds: &[usize]) -> Vec<bool> {
        let mut seen = vec![false; n];
        let mut stack: Vec<usize> = Vec::with_capacity(seeds.len());
        for &s in seeds {
            if !seen[s] {
                seen[s] = true;
                stack.push(s);
            }
        }
        while let Some(v) = stack.pop() {
            for &w in adj.get(v).map(Vec::as_slice).unwrap_or(&[]) {
                if !seen[w] {
                    seen[w] = true;
                    stack.push(w);
                }
            }
        }
        seen
    }
}
