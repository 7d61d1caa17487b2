//! Perturbation planning.
//!
//! Requests are grouped by `(wrt, options)`. Each group contributes one
//! direction per selected column, unless its options ask for directional
//! perturbation and every request carries a sparsity pattern: then columns
//! whose non-zero rows do not overlap are perturbed together.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;

use mdax_core::ApproxOptions;

use crate::error::Result;
use crate::request::{PartialRequest, Sizes};

/// A block column fed by a perturbed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnEntry {
    /// Index of the request in the scheme.
    pub request: usize,
    /// Column within that request's block.
    pub col: usize,
}

/// One perturbed entry and the block columns it feeds.
#[derive(Debug, Clone, PartialEq)]
pub struct Seed {
    pub wrt: String,
    pub index: usize,
    pub columns: Vec<ColumnEntry>,
}

/// Entries perturbed simultaneously in one evaluation (per stencil point).
#[derive(Debug, Clone, PartialEq)]
pub struct PerturbationDirection {
    /// Index into [`PerturbationPlan::options`].
    pub options: usize,
    pub seeds: Vec<Seed>,
}

impl PerturbationDirection {
    /// More than one column shares this direction.
    pub fn is_colored(&self) -> bool {
        self.seeds.len() > 1
    }

    /// Requests this direction writes to, without duplicates.
    pub fn requests(&self) -> Vec<usize> {
        let set: BTreeSet<usize> = self
            .seeds
            .iter()
            .flat_map(|s| s.columns.iter().map(|c| c.request))
            .collect();
        set.into_iter().collect()
    }
}

#[derive(Debug)]
struct OptionGroup<'a> {
    wrt: &'a str,
    options: &'a ApproxOptions,
    requests: Vec<usize>,
}

/// Ordered list of perturbation directions for a set of requests.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PerturbationPlan {
    options: Vec<ApproxOptions>,
    directions: Vec<PerturbationDirection>,
    num_columns: usize,
}

impl PerturbationPlan {
    pub fn build(requests: &[PartialRequest], sizes: &Sizes) -> Result<Self> {
        for req in requests {
            req.validate(sizes)?;
        }

        let mut groups: Vec<OptionGroup<'_>> = Vec::new();
        for (i, req) in requests.iter().enumerate() {
            match groups
                .iter_mut()
                .find(|g| g.wrt == req.wrt && *g.options == req.options)
            {
                Some(g) => g.requests.push(i),
                None => groups.push(OptionGroup {
                    wrt: &req.wrt,
                    options: &req.options,
                    requests: vec![i],
                }),
            }
        }

        let mut plan = PerturbationPlan::default();
        let mut seeds_per_group = Vec::with_capacity(groups.len());
        for g in &groups {
            let seeds = Self::group_seeds(g, requests, sizes)?;
            plan.num_columns += seeds.len();
            seeds_per_group.push(seeds);
        }

        let colorable = |g: &OptionGroup<'_>| {
            g.options.directional && g.requests.iter().all(|&r| requests[r].sparsity.is_some())
        };

        let mut done = vec![false; groups.len()];
        for gi in 0..groups.len() {
            if done[gi] {
                continue;
            }
            let opt = plan.option_index(groups[gi].options);
            if !colorable(&groups[gi]) {
                done[gi] = true;
                for seed in std::mem::take(&mut seeds_per_group[gi]) {
                    plan.directions.push(PerturbationDirection {
                        options: opt,
                        seeds: vec![seed],
                    });
                }
                continue;
            }

            // Every colorable group with identical options joins one coloring.
            let mut seeds = Vec::new();
            for gj in gi..groups.len() {
                if !done[gj] && colorable(&groups[gj]) && groups[gj].options == groups[gi].options {
                    done[gj] = true;
                    seeds.append(&mut seeds_per_group[gj]);
                }
            }
            for color in Self::color(seeds, requests, sizes)? {
                plan.directions.push(PerturbationDirection {
                    options: opt,
                    seeds: color,
                });
            }
        }

        Ok(plan)
    }

    fn option_index(&mut self, options: &ApproxOptions) -> usize {
        match self.options.iter().position(|o| o == options) {
            Some(i) => i,
            None => {
                self.options.push(options.clone());
                self.options.len() - 1
            }
        }
    }

    fn group_seeds(
        group: &OptionGroup<'_>,
        requests: &[PartialRequest],
        sizes: &Sizes,
    ) -> Result<Vec<Seed>> {
        let mut by_index: BTreeMap<usize, Vec<ColumnEntry>> = BTreeMap::new();
        for &r in &group.requests {
            for (col, index) in requests[r].cols(sizes)?.into_iter().enumerate() {
                by_index
                    .entry(index)
                    .or_default()
                    .push(ColumnEntry { request: r, col });
            }
        }
        Ok(by_index
            .into_iter()
            .map(|(index, columns)| Seed {
                wrt: group.wrt.to_string(),
                index,
                columns,
            })
            .collect())
    }

    /// Greedy first-fit coloring over the concatenated `of` row space.
    fn color(
        seeds: Vec<Seed>,
        requests: &[PartialRequest],
        sizes: &Sizes,
    ) -> Result<Vec<Vec<Seed>>> {
        let mut offsets: IndexMap<&str, usize> = IndexMap::new();
        let mut total = 0;
        for req in requests {
            if !offsets.contains_key(req.of.as_str()) {
                offsets.insert(&req.of, total);
                total += sizes.get(&req.of).copied().unwrap_or(0);
            }
        }

        let mut colors: Vec<(BTreeSet<usize>, Vec<Seed>)> = Vec::new();
        for seed in seeds {
            let mut rows = BTreeSet::new();
            for c in &seed.columns {
                let req = &requests[c.request];
                let block_rows = req.rows(sizes)?;
                let offset = offsets[req.of.as_str()];
                if let Some(sparsity) = &req.sparsity {
                    rows.extend(sparsity.rows_in_col(c.col).map(|r| offset + block_rows[r]));
                }
            }
            match colors.iter_mut().find(|(used, _)| used.is_disjoint(&rows)) {
                Some((used, members)) => {
                    used.extend(rows);
                    members.push(seed);
                }
                None => colors.push((rows, vec![seed])),
            }
        }
        Ok(colors.into_iter().map(|(_, members)| members).collect())
    }

    pub fn options(&self) -> &[ApproxOptions] {
        &self.options
    }

    pub fn directions(&self) -> &[PerturbationDirection] {
        &self.directions
    }

    pub fn len(&self) -> usize {
        self.directions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directions.is_empty()
    }

    /// Number of selected block columns across all groups.
    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    /// Directions assigned to `rank` out of `num_ranks`, round-robin, with their plan index.
    pub fn directions_for_rank(
        &self,
        rank: usize,
        num_ranks: usize,
    ) -> impl Iterator<Item = (usize, &PerturbationDirection)> {
        let num_ranks = num_ranks.max(1);
        self.directions
            .iter()
            .enumerate()
            .filter(move |(i, _)| i % num_ranks == rank)
    }
}
