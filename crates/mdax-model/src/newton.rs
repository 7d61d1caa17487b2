//! Newton iteration over a group's outputs.
//!
//! The unknowns are the outputs `y` of every component in the group and the
//! residual is `R = y - f(y)`, where `f` evaluates all members at inputs
//! transferred from `y`. Each step solves `(I - df/dy) dy = -R` with the
//! Jacobian assembled from the members' partials at the real part of the
//! state. Under complex step the imaginary part is updated with the same
//! real Jacobian, and convergence also requires the imaginary residual,
//! divided by the active step, to be small.

use std::ops::Range;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use mdax_approx::{DiagnosticKind, EvalMode};

use crate::error::{Error, Result};
use crate::linear::solve_dense;
use crate::model::Model;

/// Convergence settings for Newton iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonOptions {
    /// Absolute residual tolerance.
    pub atol: f64,
    /// Residual tolerance relative to the first iteration.
    pub rtol: f64,
    /// Maximum iterations before giving up.
    pub maxiter: usize,
    /// Fail instead of warning when not converged.
    pub err_on_non_converge: bool,
}

impl Default for NewtonOptions {
    fn default() -> Self {
        Self {
            atol: 1e-10,
            rtol: 1e-10,
            maxiter: 10,
            err_on_non_converge: false,
        }
    }
}

impl NewtonOptions {
    pub fn with_atol(mut self, atol: f64) -> Self {
        self.atol = atol;
        self
    }

    pub fn with_rtol(mut self, rtol: f64) -> Self {
        self.rtol = rtol;
        self
    }

    pub fn with_maxiter(mut self, maxiter: usize) -> Self {
        self.maxiter = maxiter;
        self
    }

    pub fn with_err_on_non_converge(mut self, err: bool) -> Self {
        self.err_on_non_converge = err;
        self
    }
}

/// Result of a Newton solve.
#[derive(Debug, Clone, PartialEq)]
pub struct NewtonResult {
    pub iterations: usize,
    pub converged: bool,
    /// Residual norm at the last iteration.
    pub norm: f64,
}

/// One residual evaluation over a group's unknowns.
struct Residual {
    /// Real part of `y - f(y)`.
    re: Vec<f64>,
    /// Imaginary part, under complex step only.
    im: Option<Vec<f64>>,
    /// Real part of `f(y)`.
    f: Vec<f64>,
}

/// Residual norm. The imaginary part is measured in units of the complex step.
fn residual_norm(re: &[f64], im: Option<&[f64]>, step: Option<f64>) -> f64 {
    let re_sq: f64 = re.iter().map(|v| v * v).sum();
    let im_sq = match (im, step) {
        (Some(im), Some(h)) => im.iter().map(|v| (v / h) * (v / h)).sum(),
        _ => 0.0,
    };
    (re_sq + im_sq).sqrt()
}

impl Model {
    /// Converge group `g`; see the module docs.
    pub(crate) fn newton(
        &mut self,
        g: usize,
        options: &NewtonOptions,
        mode: EvalMode,
        scope: &Range<usize>,
    ) -> Result<NewtonResult> {
        let comps = self.groups[g].components.clone();
        let label = self.groups[g].label().to_string();
        if comps.is_empty() {
            return Ok(NewtonResult {
                iterations: 0,
                converged: true,
                norm: 0.0,
            });
        }
        let unknowns = self.components[comps.start].outputs.start..self.components[comps.end - 1].outputs.end;
        let complex = mode == EvalMode::Complex && self.complex;
        let step = if complex {
            self.cs_state.current().map(|a| a.step)
        } else {
            None
        };

        let mut norm0 = 0.0;
        let mut norm = 0.0;
        for iteration in 0..=options.maxiter {
            let Residual { re, im, f } = self.newton_residual(&comps, &unknowns, mode, scope)?;
            norm = residual_norm(&re, im.as_deref(), step);
            if iteration == 0 {
                norm0 = norm;
            }
            log::debug!("{label}: Newton iteration {iteration}, |R| = {norm:e}");
            let done = norm <= options.atol || (norm0 > 0.0 && norm / norm0 <= options.rtol);
            if done || iteration == options.maxiter {
                // Outputs consistent with the inputs they were computed from.
                self.outputs.real_mut()[unknowns.clone()].copy_from_slice(&f);
            }
            if done {
                return Ok(NewtonResult {
                    iterations: iteration,
                    converged: true,
                    norm,
                });
            }
            if iteration == options.maxiter {
                break;
            }

            let jac = self.newton_jacobian(&comps, &unknowns, &f)?;
            let delta = solve_dense(&jac, &-DVector::from_vec(re))?;
            for (y, d) in self.outputs.real_mut()[unknowns.clone()].iter_mut().zip(delta.iter()) {
                *y += d;
            }
            if let Some(im) = im {
                let delta = solve_dense(&jac, &-DVector::from_vec(im))?;
                if let Some(imag) = self.outputs.imag_mut() {
                    for (y, d) in imag[unknowns.clone()].iter_mut().zip(delta.iter()) {
                        *y += d;
                    }
                }
            }
        }

        if options.err_on_non_converge {
            return Err(Error::ConvergenceFailed {
                scope: label,
                iterations: options.maxiter,
            });
        }
        let detail = format!(
            "Newton failed to converge in {} iterations (|R| = {norm:e})",
            options.maxiter
        );
        log::warn!("{label}: {detail}");
        self.diagnostics.push(&label, DiagnosticKind::NonConvergence, detail);
        Ok(NewtonResult {
            iterations: options.maxiter,
            converged: false,
            norm,
        })
    }

    /// Evaluate `R = y - f(y)` over `unknowns`, leaving `y` in place and `R`
    /// in the residual vector.
    fn newton_residual(
        &mut self,
        comps: &Range<usize>,
        unknowns: &Range<usize>,
        mode: EvalMode,
        scope: &Range<usize>,
    ) -> Result<Residual> {
        let complex = mode == EvalMode::Complex && self.complex;
        let y_re = self.outputs.real()[unknowns.clone()].to_vec();
        let y_im = self
            .outputs
            .imag()
            .filter(|_| complex)
            .map(|imag| imag[unknowns.clone()].to_vec());

        for c in comps.clone() {
            self.transfer(c, scope);
        }
        for c in comps.clone() {
            self.compute_component(c, mode)?;
        }

        let f = self.outputs.real()[unknowns.clone()].to_vec();
        let re: Vec<f64> = y_re.iter().zip(&f).map(|(y, f)| y - f).collect();
        self.outputs.real_mut()[unknowns.clone()].copy_from_slice(&y_re);
        self.residuals.real_mut()[unknowns.clone()].copy_from_slice(&re);

        let Some(y_im) = y_im else {
            return Ok(Residual { re, im: None, f });
        };
        let mut im = vec![0.0; y_im.len()];
        if let Some(imag) = self.outputs.imag_mut() {
            for ((r, y), f) in im.iter_mut().zip(&y_im).zip(&imag[unknowns.clone()]) {
                *r = y - f;
            }
            imag[unknowns.clone()].copy_from_slice(&y_im);
        }
        if let Some(imag) = self.residuals.imag_mut() {
            imag[unknowns.clone()].copy_from_slice(&im);
        }
        Ok(Residual { re, im: Some(im), f })
    }

    /// `I - df/dy` over `unknowns`, from the members' partials taken at the
    /// outputs `f` of the last residual evaluation.
    fn newton_jacobian(
        &mut self,
        comps: &Range<usize>,
        unknowns: &Range<usize>,
        f: &[f64],
    ) -> Result<DMatrix<f64>> {
        let n = unknowns.len();
        let mut jac = DMatrix::identity(n, n);
        for c in comps.clone() {
            let outputs = &self.components[c].outputs;
            let local = outputs.start - unknowns.start..outputs.end - unknowns.start;
            self.linearize_at(c, None, Some(&f[local]))?;
            let entry = &self.components[c];
            for (of, wrt, block) in entry.partials.iter() {
                let (Some(out), Some(inp)) = (entry.output_id(of), entry.input_id(wrt)) else {
                    continue;
                };
                let Some(src) = self.sources[inp] else {
                    continue;
                };
                let src_offset = self.variables[src].offset;
                if !unknowns.contains(&src_offset) {
                    continue;
                }
                block.add_into(
                    &mut jac,
                    self.variables[out].offset - unknowns.start,
                    src_offset - unknowns.start,
                    -1.0,
                );
            }
        }
        Ok(jac)
    }
}
