//! Variable and partial-derivative declarations made by a component during setup.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::options::{ApproxOptions, FdForm, Method, StepCalc};
use crate::variable::VarSpec;

/// Selection of local variable names on one side of a partial declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Select {
    /// Every variable of the relevant kind.
    All,
    Names(Vec<String>),
}

impl Select {
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Select::Names(names.into_iter().map(Into::into).collect())
    }

    fn resolve<'a>(&'a self, available: &'a [String]) -> Result<Vec<&'a str>> {
        match self {
            Select::All => Ok(available.iter().map(String::as_str).collect()),
            Select::Names(names) => names
                .iter()
                .map(|n| {
                    if available.iter().any(|a| a == n) {
                        Ok(n.as_str())
                    } else {
                        Err(Error::UnknownVariable(n.clone()))
                    }
                })
                .collect(),
        }
    }
}

impl From<&str> for Select {
    fn from(name: &str) -> Self {
        Select::Names(vec![name.to_string()])
    }
}

impl From<&[&str]> for Select {
    fn from(names: &[&str]) -> Self {
        Select::names(names.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for Select {
    fn from(names: [&str; N]) -> Self {
        Select::names(names)
    }
}

/// Coordinates of the structurally non-zero entries of a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sparsity {
    pub rows: Vec<usize>,
    pub cols: Vec<usize>,
}

impl Sparsity {
    pub fn new(rows: Vec<usize>, cols: Vec<usize>) -> Self {
        Self { rows, cols }
    }

    pub fn nnz(&self) -> usize {
        self.rows.len()
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        self.rows.iter().zip(&self.cols).any(|(&r, &c)| r == row && c == col)
    }

    /// Rows touched by column `col`.
    pub fn rows_in_col(&self, col: usize) -> impl Iterator<Item = usize> + '_ {
        self.rows
            .iter()
            .zip(&self.cols)
            .filter(move |&(_, &c)| c == col)
            .map(|(&r, _)| r)
    }

    fn validate(&self, of: &str, wrt: &str, n_rows: usize, n_cols: usize) -> Result<()> {
        if self.rows.len() != self.cols.len() {
            return Err(Error::InvalidConfiguration(format!(
                "sparsity of '{of}' wrt '{wrt}' has {} rows but {} cols",
                self.rows.len(),
                self.cols.len()
            )));
        }
        if let Some(&r) = self.rows.iter().find(|&&r| r >= n_rows) {
            return Err(Error::InvalidConfiguration(format!(
                "sparsity row {r} out of range for '{of}' of size {n_rows}"
            )));
        }
        if let Some(&c) = self.cols.iter().find(|&&c| c >= n_cols) {
            return Err(Error::InvalidConfiguration(format!(
                "sparsity col {c} out of range for '{wrt}' of size {n_cols}"
            )));
        }
        Ok(())
    }
}

/// How a declared partial block is provided.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PartialSpec {
    /// `None` means the component computes the block analytically.
    pub approx: Option<ApproxOptions>,
    pub sparsity: Option<Sparsity>,
}

impl PartialSpec {
    pub fn analytic() -> Self {
        Self::default()
    }

    pub fn fd() -> Self {
        Self::approx(ApproxOptions::fd())
    }

    pub fn cs() -> Self {
        Self::approx(ApproxOptions::cs())
    }

    pub fn approx(options: ApproxOptions) -> Self {
        Self {
            approx: Some(options),
            sparsity: None,
        }
    }

    fn map_approx(mut self, f: impl FnOnce(ApproxOptions) -> ApproxOptions) -> Self {
        self.approx = self.approx.map(f);
        self
    }

    pub fn with_step(self, step: f64) -> Self {
        self.map_approx(|o| o.with_step(step))
    }

    pub fn with_form(self, form: FdForm) -> Self {
        self.map_approx(|o| o.with_form(form))
    }

    pub fn with_order(self, order: u8) -> Self {
        self.map_approx(|o| o.with_order(order))
    }

    pub fn with_step_calc(self, step_calc: StepCalc) -> Self {
        self.map_approx(|o| o.with_step_calc(step_calc))
    }

    pub fn with_minimum_step(self, minimum_step: f64) -> Self {
        self.map_approx(|o| o.with_minimum_step(minimum_step))
    }

    pub fn with_directional(self, directional: bool) -> Self {
        self.map_approx(|o| o.with_directional(directional))
    }

    pub fn with_sparsity(mut self, rows: Vec<usize>, cols: Vec<usize>) -> Self {
        self.sparsity = Some(Sparsity::new(rows, cols));
        self
    }
}

#[derive(Debug, Clone)]
struct PartialDecl {
    of: Select,
    wrt: Select,
    spec: PartialSpec,
}

/// One `(of, wrt)` block after wildcard expansion, in local names.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPartial {
    pub of: String,
    pub wrt: String,
    pub approx: Option<ApproxOptions>,
    pub sparsity: Option<Sparsity>,
    /// Declared with `Select::All` on both sides.
    pub wildcard: bool,
}

/// Everything a component registers during setup.
#[derive(Debug, Clone, Default)]
pub struct Declarations {
    inputs: IndexMap<String, VarSpec>,
    outputs: IndexMap<String, VarSpec>,
    partials: Vec<PartialDecl>,
    check_options: Option<ApproxOptions>,
}

impl Declarations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_input(&mut self, name: &str, spec: VarSpec) -> Result<()> {
        self.add_var(name, spec, true)
    }

    pub fn add_output(&mut self, name: &str, spec: VarSpec) -> Result<()> {
        self.add_var(name, spec, false)
    }

    fn add_var(&mut self, name: &str, spec: VarSpec, input: bool) -> Result<()> {
        if name.is_empty() || name.contains('.') {
            return Err(Error::InvalidModel(format!(
                "'{name}' is not a valid variable name"
            )));
        }
        if self.inputs.contains_key(name) || self.outputs.contains_key(name) {
            return Err(Error::DuplicateVariable(name.to_string()));
        }
        spec.validate(name)?;
        if input {
            self.inputs.insert(name.to_string(), spec);
        } else {
            self.outputs.insert(name.to_string(), spec);
        }
        Ok(())
    }

    /// Declare partials of `of` outputs with respect to `wrt` inputs.
    ///
    /// Later declarations override earlier ones for the same pair.
    pub fn declare_partials(
        &mut self,
        of: impl Into<Select>,
        wrt: impl Into<Select>,
        spec: PartialSpec,
    ) -> Result<()> {
        if let Some(options) = &spec.approx {
            options.validate()?;
        }
        self.partials.push(PartialDecl {
            of: of.into(),
            wrt: wrt.into(),
            spec,
        });
        Ok(())
    }

    /// Options used when this component's partials are checked.
    pub fn set_check_options(&mut self, options: ApproxOptions) -> Result<()> {
        options.validate()?;
        self.check_options = Some(options);
        Ok(())
    }

    pub fn inputs(&self) -> &IndexMap<String, VarSpec> {
        &self.inputs
    }

    pub fn outputs(&self) -> &IndexMap<String, VarSpec> {
        &self.outputs
    }

    pub fn check_options(&self) -> Option<&ApproxOptions> {
        self.check_options.as_ref()
    }

    /// Whether no partials were declared at all.
    pub fn has_no_partials(&self) -> bool {
        self.partials.is_empty()
    }

    /// Methods used by approximated partials.
    pub fn approx_methods(&self) -> Vec<Method> {
        let mut methods = Vec::new();
        for decl in &self.partials {
            if let Some(options) = &decl.spec.approx {
                if !methods.contains(&options.method) {
                    methods.push(options.method);
                }
            }
        }
        methods
    }

    /// Expand wildcards into individual blocks in declaration order.
    pub fn resolve_partials(&self) -> Result<Vec<ResolvedPartial>> {
        let out_names: Vec<String> = self.outputs.keys().cloned().collect();
        let in_names: Vec<String> = self.inputs.keys().cloned().collect();
        let mut resolved: IndexMap<(String, String), ResolvedPartial> = IndexMap::new();

        for decl in &self.partials {
            let wildcard = decl.of == Select::All && decl.wrt == Select::All;
            let ofs = decl.of.resolve(&out_names)?;
            let wrts = decl.wrt.resolve(&in_names)?;
            for of in &ofs {
                for wrt in &wrts {
                    if let Some(sparsity) = &decl.spec.sparsity {
                        sparsity.validate(
                            of,
                            wrt,
                            self.outputs[*of].size(),
                            self.inputs[*wrt].size(),
                        )?;
                    }
                    let key = (of.to_string(), wrt.to_string());
                    let wildcard = wildcard
                        || resolved.get(&key).is_some_and(|p: &ResolvedPartial| p.wildcard);
                    resolved.insert(
                        key,
                        ResolvedPartial {
                            of: of.to_string(),
                            wrt: wrt.to_string(),
                            approx: decl.spec.approx.clone(),
                            sparsity: decl.spec.sparsity.clone(),
                            wildcard,
                        },
                    );
                }
            }
        }
        Ok(resolved.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_by_two() -> Declarations {
        let mut decl = Declarations::new();
        decl.add_input("a", VarSpec::scalar(1.0)).unwrap();
        decl.add_input("b", VarSpec::zeros(3)).unwrap();
        decl.add_output("x", VarSpec::scalar(0.0)).unwrap();
        decl.add_output("y", VarSpec::zeros(2)).unwrap();
        decl
    }

    #[test]
    fn test_wildcard_expansion() {
        let mut decl = two_by_two();
        decl.declare_partials(Select::All, Select::All, PartialSpec::fd())
            .unwrap();
        let parts = decl.resolve_partials().unwrap();
        assert_eq!(parts.len(), 4);
        assert!(parts.iter().all(|p| p.wildcard));
        assert_eq!((parts[1].of.as_str(), parts[1].wrt.as_str()), ("x", "b"));
    }

    #[test]
    fn test_later_declaration_overrides() {
        let mut decl = two_by_two();
        decl.declare_partials("y", ["a", "b"], PartialSpec::fd())
            .unwrap();
        decl.declare_partials("y", "b", PartialSpec::cs().with_step(1e-30))
            .unwrap();
        let parts = decl.resolve_partials().unwrap();
        assert_eq!(parts.len(), 2);
        let yb = parts.iter().find(|p| p.wrt == "b").unwrap();
        assert_eq!(yb.approx.as_ref().unwrap().method, Method::Cs);
        assert_eq!(yb.approx.as_ref().unwrap().step, Some(1e-30));
        assert!(!yb.wildcard);
        assert_eq!(decl.approx_methods(), vec![Method::Fd, Method::Cs]);
    }

    #[test]
    fn test_unknown_and_duplicate_names() {
        let mut decl = two_by_two();
        assert!(matches!(
            decl.add_input("a", VarSpec::scalar(0.0)),
            Err(Error::DuplicateVariable(_))
        ));
        decl.declare_partials("z", "a", PartialSpec::analytic())
            .unwrap();
        assert!(matches!(
            decl.resolve_partials(),
            Err(Error::UnknownVariable(name)) if name == "z"
        ));
    }

    #[test]
    fn test_sparsity_out_of_range() {
        let mut decl = two_by_two();
        decl.declare_partials("y", "b", PartialSpec::fd().with_sparsity(vec![0, 2], vec![0, 1]))
            .unwrap();
        assert!(matches!(
            decl.resolve_partials(),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_directional_rel_element_rejected_at_declaration() {
        let mut decl = two_by_two();
        let spec = PartialSpec::fd()
            .with_step_calc(StepCalc::RelElement)
            .with_directional(true);
        assert!(matches!(
            decl.declare_partials(Select::All, Select::All, spec),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_sparsity_queries() {
        let s = Sparsity::new(vec![0, 2, 1], vec![1, 1, 0]);
        assert_eq!(s.nnz(), 3);
        assert!(s.contains(2, 1));
        assert!(!s.contains(1, 1));
        assert_eq!(s.rows_in_col(1).collect::<Vec<_>>(), vec![0, 2]);
    }
}
