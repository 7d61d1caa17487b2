//! Independent variables.

use mdax_core::{Declarations, ExplicitComponent, Inputs, Outputs, Result, Scalar, VarSpec};

/// A component with outputs only. Its outputs hold whatever value was set.
#[derive(Debug, Clone, Default)]
pub struct IndepVarComp {
    outputs: Vec<(String, VarSpec)>,
}

impl IndepVarComp {
    pub fn new() -> Self {
        Self::default()
    }

    /// An independent variable component with one output.
    pub fn with_output(name: &str, spec: VarSpec) -> Self {
        let mut comp = Self::new();
        comp.add_output(name, spec);
        comp
    }

    pub fn add_output(&mut self, name: &str, spec: VarSpec) -> &mut Self {
        self.outputs.push((name.to_string(), spec));
        self
    }
}

impl ExplicitComponent for IndepVarComp {
    fn setup(&mut self, decl: &mut Declarations) -> Result<()> {
        for (name, spec) in &self.outputs {
            decl.add_output(name, spec.clone())?;
        }
        Ok(())
    }

    fn compute<T: Scalar>(&mut self, _inputs: &Inputs<'_, T>, _outputs: &mut Outputs<'_, T>) -> Result<()> {
        Ok(())
    }
}
