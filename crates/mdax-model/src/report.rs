//! Derivative check reports.

use std::fmt::Write;

use serde::Serialize;

use mdax_approx::SparsityMismatch;
use mdax_core::Method;

use crate::error::Result;

/// One computed block compared with its check approximation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartialComparison {
    pub of: String,
    pub wrt: String,
    /// Frobenius norm of the computed block.
    pub calc_norm: f64,
    /// Frobenius norm of the check block.
    pub check_norm: f64,
    /// `||calc - check||`.
    pub abs_error: f64,
    /// `||calc - check|| / ||check||`; NaN when the check block is zero.
    pub rel_error: f64,
    /// Entries outside the declared sparsity that the check found non-zero.
    pub sparsity: Option<SparsityMismatch>,
}

/// Comparisons for one component, or for the model totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeCheck {
    pub scope: String,
    pub method: Method,
    pub step: f64,
    pub comparisons: Vec<PartialComparison>,
}

/// Result of `check_partials` or `check_totals`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckReport {
    pub scopes: Vec<ScopeCheck>,
    /// Magnitude above which an entry outside a sparsity pattern is reported.
    pub sparsity_tol: f64,
}

impl CheckReport {
    pub fn get(&self, scope: &str, of: &str, wrt: &str) -> Option<&PartialComparison> {
        self.scopes
            .iter()
            .find(|s| s.scope == scope)?
            .comparisons
            .iter()
            .find(|c| c.of == of && c.wrt == wrt)
    }

    fn comparisons(&self) -> impl Iterator<Item = &PartialComparison> {
        self.scopes.iter().flat_map(|s| s.comparisons.iter())
    }

    pub fn max_abs_error(&self) -> f64 {
        self.comparisons().map(|c| c.abs_error).fold(0.0, f64::max)
    }

    /// Largest relative error, skipping blocks with a zero check.
    pub fn max_rel_error(&self) -> f64 {
        self.comparisons()
            .map(|c| c.rel_error)
            .filter(|e| !e.is_nan())
            .fold(0.0, f64::max)
    }

    /// Blocks with entries outside their declared sparsity, as `(scope, comparison)`.
    pub fn bad_sparsity(&self) -> Vec<(&str, &PartialComparison)> {
        self.scopes
            .iter()
            .flat_map(|s| {
                s.comparisons
                    .iter()
                    .filter(|c| c.sparsity.is_some())
                    .map(move |c| (s.scope.as_str(), c))
            })
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Human-readable report: one table row per block when `compact`,
    /// otherwise one paragraph per block.
    pub fn to_text(&self, compact: bool) -> String {
        let mut out = String::new();
        for scope in &self.scopes {
            let _ = writeln!(out, "{}", "-".repeat(scope.scope.len() + 2));
            let _ = writeln!(out, "{}: {} with step {:e}", scope.scope, scope.method.as_str(), scope.step);
            let _ = writeln!(out, "{}", "-".repeat(scope.scope.len() + 2));
            if compact {
                self.compact_rows(scope, &mut out);
            } else {
                self.verbose_blocks(scope, &mut out);
            }
            out.push('\n');
        }
        out
    }

    fn compact_rows(&self, scope: &ScopeCheck, out: &mut String) {
        let _ = writeln!(
            out,
            "| {:<13} | {:<14} | {:<12} | {:<12} | {:<12} | {:<12} |",
            "of", "wrt", "calc mag.", "check mag.", "a(cal-chk)", "r(cal-chk)"
        );
        for c in &scope.comparisons {
            let _ = write!(
                out,
                "| {:<13} | {:<14} | {:<12.4e} | {:<12.4e} | {:<12.4e} | {:<12.4e} |",
                c.of, c.wrt, c.calc_norm, c.check_norm, c.abs_error, c.rel_error
            );
            if c.sparsity.is_some() {
                out.push_str(" <BAD SPARSITY>");
            }
            out.push('\n');
        }
    }

    fn verbose_blocks(&self, scope: &ScopeCheck, out: &mut String) {
        for c in &scope.comparisons {
            let _ = writeln!(out, "{}: '{}' wrt '{}'", scope.scope, c.of, c.wrt);
            let _ = writeln!(out, "  Calculated Magnitude: {:.6e}", c.calc_norm);
            let _ = writeln!(out, "  Check Magnitude:      {:.6e}", c.check_norm);
            let _ = writeln!(out, "  Absolute Error:       {:.6e}", c.abs_error);
            let _ = writeln!(out, "  Relative Error:       {:.6e}", c.rel_error);
            if let Some(m) = &c.sparsity {
                let _ = writeln!(
                    out,
                    "  Sparsity excludes {} entries which appear to be non-zero. (Magnitudes exceed {:e}) *",
                    m.rows.len(),
                    self.sparsity_tol
                );
                let _ = writeln!(out, "    Rows: {:?}", m.rows);
                let _ = writeln!(out, "    Cols: {:?}", m.cols);
            }
            out.push('\n');
        }
    }
}
