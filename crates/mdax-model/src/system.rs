//! Model tree: groups of components and sub-groups.

use serde::{Deserialize, Serialize};

use mdax_core::{ApproxOptions, Component};

use crate::newton::NewtonOptions;

/// How a group converges its members.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum NonlinearSolver {
    /// Run each member once, in order.
    #[default]
    RunOnce,
    /// Solve the group's outputs as a coupled system.
    Newton(NewtonOptions),
}

impl NonlinearSolver {
    /// Newton with default tolerances.
    pub fn newton() -> Self {
        NonlinearSolver::Newton(NewtonOptions::default())
    }
}

/// A member of a group.
pub enum Subsystem {
    Component(Box<dyn Component>),
    Group(Group),
}

/// An ordered collection of subsystems and the connections between them.
///
/// Names are relative to the group: connecting `"d1.y1"` to `"d2.y1"` inside
/// a group called `cycle` connects `cycle.d1.y1` to `cycle.d2.y1`.
#[derive(Default)]
pub struct Group {
    pub(crate) subsystems: Vec<(String, Subsystem)>,
    pub(crate) connections: Vec<(String, String)>,
    pub(crate) solver: NonlinearSolver,
    pub(crate) approx: Option<ApproxOptions>,
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_component(&mut self, name: &str, component: impl Component + 'static) -> &mut Self {
        self.subsystems
            .push((name.to_string(), Subsystem::Component(Box::new(component))));
        self
    }

    pub fn add_group(&mut self, name: &str, group: Group) -> &mut Self {
        self.subsystems.push((name.to_string(), Subsystem::Group(group)));
        self
    }

    /// Connect output `src` to input `tgt`.
    pub fn connect(&mut self, src: &str, tgt: &str) -> &mut Self {
        self.connections.push((src.to_string(), tgt.to_string()));
        self
    }

    pub fn set_solver(&mut self, solver: NonlinearSolver) -> &mut Self {
        self.solver = solver;
        self
    }

    /// Approximate this group's derivatives as a whole instead of chaining
    /// its members' partials.
    pub fn approx_totals(&mut self, options: ApproxOptions) -> &mut Self {
        self.approx = Some(options);
        self
    }

    pub fn len(&self) -> usize {
        self.subsystems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subsystems.is_empty()
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.subsystems.iter().map(|(n, _)| n.as_str()).collect();
        f.debug_struct("Group")
            .field("subsystems", &names)
            .field("connections", &self.connections)
            .field("solver", &self.solver)
            .field("approx", &self.approx)
            .finish()
    }
}
