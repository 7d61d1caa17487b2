//! Relevance-based pruning of evaluations.

use std::collections::BTreeSet;

use mdax_core::DependencyGraph;

/// Components to run for one perturbation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveSet {
    All,
    /// Component indices in the model's execution order.
    Components(BTreeSet<usize>),
}

impl ActiveSet {
    pub fn contains(&self, comp: usize) -> bool {
        match self {
            ActiveSet::All => true,
            ActiveSet::Components(set) => set.contains(&comp),
        }
    }
}

/// Finds the components lying on a path from a perturbed variable to a
/// requested output.
#[derive(Debug, Clone, Copy)]
pub struct RelevanceFilter<'g> {
    graph: &'g DependencyGraph,
}

impl<'g> RelevanceFilter<'g> {
    pub fn new(graph: &'g DependencyGraph) -> Self {
        Self { graph }
    }

    /// A component is active when one of its `(input, output)` dependencies
    /// has the input downstream of `perturbed` and the output upstream of
    /// `requested`. Unknown names disable pruning.
    pub fn active_components(&self, perturbed: &[&str], requested: &[&str]) -> ActiveSet {
        let lookup = |names: &[&str]| -> Option<Vec<usize>> {
            names.iter().map(|n| self.graph.node(n)).collect()
        };
        let (Some(seeds), Some(targets)) = (lookup(perturbed), lookup(requested)) else {
            return ActiveSet::All;
        };
        if !self.graph.is_finalized() {
            return ActiveSet::All;
        }

        let downstream = self.graph.reachable_from(&seeds);
        let upstream = self.graph.reaching(&targets);
        let active = (0..self.graph.num_components())
            .filter(|&c| {
                self.graph
                    .component_edges(c)
                    .iter()
                    .any(|&(i, o)| downstream[i] && upstream[o])
            })
            .collect();
        ActiveSet::Components(active)
    }
}
