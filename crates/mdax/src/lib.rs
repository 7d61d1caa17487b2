//! # mdax
//!
//! Derivatives of hierarchical multidisciplinary models.
//!
//! mdax provides:
//! - Components with declared inputs, outputs and partial derivatives
//! - Groups with connections and Newton coupling
//! - Finite-difference and complex-step approximation of partials and totals
//! - Coloring of structurally independent perturbations
//! - Checks of computed derivatives with sparsity reporting
//!
//! ## Quick Start
//!
//! ```rust
//! use mdax::prelude::*;
//!
//! /// `f = (x - 3)^2 + x y + (y + 4)^2 - 3`
//! struct Paraboloid;
//!
//! impl ExplicitComponent for Paraboloid {
//!     fn setup(&mut self, decl: &mut Declarations) -> mdax::core::Result<()> {
//!         decl.add_input("x", VarSpec::scalar(0.0))?;
//!         decl.add_input("y", VarSpec::scalar(0.0))?;
//!         decl.add_output("f", VarSpec::scalar(0.0))?;
//!         decl.declare_partials("f", Select::All, PartialSpec::cs())
//!     }
//!
//!     fn compute<T: Scalar>(
//!         &mut self,
//!         inputs: &Inputs<'_, T>,
//!         outputs: &mut Outputs<'_, T>,
//!     ) -> mdax::core::Result<()> {
//!         let x = inputs.scalar("x");
//!         let y = inputs.scalar("y");
//!         let (dx, dy) = (x - 3.0, y + 4.0);
//!         outputs.set_scalar("f", dx * dx + x * y + dy * dy - 3.0);
//!         Ok(())
//!     }
//! }
//!
//! let mut model = Group::new();
//! model
//!     .add_component("px", IndepVarComp::with_output("x", VarSpec::scalar(3.0)))
//!     .add_component("py", IndepVarComp::with_output("y", VarSpec::scalar(-4.0)))
//!     .add_component("parab", Paraboloid)
//!     .connect("px.x", "parab.x")
//!     .connect("py.y", "parab.y");
//!
//! let mut prob = Problem::new(model);
//! prob.add_design_var("px.x").add_design_var("py.y").add_objective("parab.f");
//! prob.setup(SetupOptions::default()).unwrap();
//! prob.run_model().unwrap();
//!
//! let totals = prob.compute_totals(&[], &[]).unwrap();
//! assert!((totals[("parab.f", "px.x")][(0, 0)] + 4.0).abs() < 1e-12);
//! ```
//!
//! ## Approximating a Whole Group
//!
//! ```rust,ignore
//! // Finite difference across the model instead of the chain rule
//! model.approx_totals(ApproxOptions::fd().with_form(FdForm::Central));
//!
//! // Compare every component's partials with a complex step
//! let report = prob.check_partials(&CheckOptions::default().with_method(Method::Cs))?;
//! println!("{}", report.to_text(true));
//! ```

// Re-export member crates
pub use mdax_approx as approx;
pub use mdax_core as core;
pub use mdax_model as model;

// ============================================================================
// Convenient re-exports from mdax_core
// ============================================================================

pub use mdax_core::{
    // Approximation options
    ApproxOptions,
    // Components
    Component,
    Declarations,
    DependencyGraph,
    // Errors
    Error as CoreError,
    ExplicitComponent,
    FdForm,
    Inputs,
    JacBlock,
    Method,
    Outputs,
    PartialSpec,
    Partials,
    Scalar,
    Select,
    Sparsity,
    SparsityBehavior,
    StepCalc,
    // Variables
    VarSpec,
};

// ============================================================================
// Convenient re-exports from mdax_approx
// ============================================================================

pub use mdax_approx::{
    ApproximationScheme,
    Diagnostic,
    DiagnosticKind,
    // Diagnostics
    Diagnostics,
    // Errors
    Error as ApproxError,
    NESTED_CS_MESSAGE,
    PartialRequest,
    PerturbationPlan,
    // Step policy
    StepDefaults,
    compute_step,
};

// ============================================================================
// Convenient re-exports from mdax_model
// ============================================================================

pub use mdax_model::{
    // Checks
    CheckOptions,
    CheckReport,
    DriverVar,
    // Errors
    Error as ModelError,
    // Hierarchy
    Group,
    IndepVarComp,
    Model,
    NewtonOptions,
    NonlinearSolver,
    PartialComparison,
    // Driver entry point
    Problem,
    ScopeCheck,
    SetupOptions,
    Totals,
};

// ============================================================================
// Re-export commonly used external types
// ============================================================================

/// Re-export of nalgebra's dynamic vector type.
pub use nalgebra::DVector;

/// Re-export of nalgebra's dynamic matrix type.
pub use nalgebra::DMatrix;

/// Re-export of num_complex's double precision complex type.
pub use num_complex::Complex64;

// ============================================================================
// Prelude module for convenient imports
// ============================================================================

/// Prelude module containing commonly used types and traits.
///
/// ```rust
/// use mdax::prelude::*;
/// ```
pub mod prelude {
    // Components
    pub use crate::{
        Declarations, ExplicitComponent, Inputs, Outputs, PartialSpec, Partials, Scalar, Select,
        VarSpec,
    };

    // Options
    pub use crate::{ApproxOptions, FdForm, Method, SparsityBehavior, StepCalc};

    // Models
    pub use crate::{Group, IndepVarComp, NewtonOptions, NonlinearSolver};

    // Driver
    pub use crate::{CheckOptions, CheckReport, DriverVar, Problem, SetupOptions, Totals};

    // Common external types
    pub use crate::{Complex64, DMatrix, DVector};
}
