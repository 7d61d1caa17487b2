//! Hierarchical models and their derivatives for mdax.
//!
//! This crate provides:
//! - Groups of components with connections and nonlinear solvers
//! - Model setup: flattening, variable storage and the dependency graph
//! - Newton coupling of a group's outputs
//! - Total derivatives by the chain rule or by approximating a group as a whole
//! - Checks of computed partials and totals against fresh approximations
//! - [`Problem`], the entry point used by drivers

pub mod check;
pub mod error;
pub mod indep;
pub mod linear;
pub mod model;
pub mod newton;
pub mod problem;
pub mod report;
pub mod system;
mod target;
pub mod totals;

pub use check::CheckOptions;
pub use error::{Error, Result};
pub use indep::IndepVarComp;
pub use linear::{solve_dense, solve_dense_multi};
pub use model::{Model, ROOT_NAME};
pub use newton::{NewtonOptions, NewtonResult};
pub use problem::{Problem, SetupOptions};
pub use report::{CheckReport, PartialComparison, ScopeCheck};
pub use system::{Group, NonlinearSolver, Subsystem};
pub use totals::{DriverVar, Totals};
