//! Core model data structures for mdax.
//!
//! This crate provides variables and their storage, the component traits
//! and the views components compute through, partial-derivative
//! declarations, approximation options and the variable-level dependency
//! graph used to prune evaluations.

pub mod component;
pub mod declarations;
pub mod error;
pub mod graph;
pub mod jacobian;
pub mod options;
pub mod scalar;
pub mod variable;
pub mod vector;

pub use component::{Component, ExplicitComponent, Inputs, LocalLayout, Outputs, Partials};
pub use declarations::{Declarations, PartialSpec, ResolvedPartial, Select, Sparsity};
pub use error::{Error, Result};
pub use graph::DependencyGraph;
pub use jacobian::JacBlock;
pub use options::{ApproxOptions, FdForm, Method, SparsityBehavior, StepCalc};
pub use scalar::Scalar;
pub use variable::{VarKind, VarSpec, Variable};
pub use vector::Vector;
