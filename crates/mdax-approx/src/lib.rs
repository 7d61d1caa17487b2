//! Approximated derivatives for mdax models.
//!
//! This crate implements finite-difference and complex-step approximation of
//! Jacobian blocks:
//!
//! - `step`: step-size policy (`abs`, `rel`, `rel_avg`, `rel_element`)
//! - `plan`: grouping and coloring of perturbation directions
//! - `fd`, `cs`: finite-difference stencils and complex-step bookkeeping
//! - `relevance`: pruning evaluations to components on a relevant path
//! - `assembler`: turning perturbation results into blocks
//! - `scheme`: the per-scope driver tying these together
//!
//! Models plug in through the [`ApproxTarget`] trait.

pub mod assembler;
pub mod cs;
pub mod diagnostics;
pub mod error;
pub mod fd;
pub mod plan;
pub mod relevance;
pub mod request;
pub mod scheme;
pub mod step;
pub mod target;

pub use assembler::{ApproxJacobian, JacobianAssembler, SparsityMismatch, pattern_violations};
pub use cs::{ComplexStepEngine, ComplexStepState};
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
pub use error::{Error, Result};
pub use plan::{PerturbationDirection, PerturbationPlan};
pub use relevance::{ActiveSet, RelevanceFilter};
pub use request::{PartialRequest, Sizes};
pub use scheme::{ApproximationScheme, NESTED_CS_MESSAGE};
pub use step::{StepContext, StepDefaults, StepVector, compute_step};
pub use target::{ApproxTarget, Delta, EvalMode, Part};
