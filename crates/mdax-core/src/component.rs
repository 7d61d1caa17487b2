//! Component traits and the views components compute through.

use std::ops::{Index, IndexMut, Range};

use indexmap::IndexMap;
use num_complex::Complex64;

use crate::declarations::{Declarations, ResolvedPartial};
use crate::error::{Error, Result};
use crate::jacobian::JacBlock;
use crate::scalar::Scalar;

/// Local offsets of a component's variables inside its slice of the input
/// and output vectors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalLayout {
    pub inputs: IndexMap<String, Range<usize>>,
    pub outputs: IndexMap<String, Range<usize>>,
}

impl LocalLayout {
    pub fn from_declarations(decl: &Declarations) -> Self {
        fn ranges<'a>(
            specs: impl Iterator<Item = (&'a String, usize)>,
        ) -> IndexMap<String, Range<usize>> {
            let mut offset = 0;
            specs
                .map(|(name, size)| {
                    let range = offset..offset + size;
                    offset += size;
                    (name.clone(), range)
                })
                .collect()
        }
        Self {
            inputs: ranges(decl.inputs().iter().map(|(n, s)| (n, s.size()))),
            outputs: ranges(decl.outputs().iter().map(|(n, s)| (n, s.size()))),
        }
    }

    pub fn input_len(&self) -> usize {
        self.inputs.values().map(|r| r.len()).sum()
    }

    pub fn output_len(&self) -> usize {
        self.outputs.values().map(|r| r.len()).sum()
    }
}

/// Read-only view of a component's inputs.
#[derive(Debug)]
pub struct Inputs<'a, T> {
    layout: &'a IndexMap<String, Range<usize>>,
    values: &'a [T],
}

impl<'a, T: Scalar> Inputs<'a, T> {
    pub fn new(layout: &'a LocalLayout, values: &'a [T]) -> Self {
        Self {
            layout: &layout.inputs,
            values,
        }
    }

    pub fn get(&self, name: &str) -> Option<&[T]> {
        self.layout.get(name).map(|r| &self.values[r.clone()])
    }

    /// First entry of a variable; convenient for scalars.
    pub fn scalar(&self, name: &str) -> T {
        self[name][0]
    }
}

impl<T: Scalar> Index<&str> for Inputs<'_, T> {
    type Output = [T];

    fn index(&self, name: &str) -> &[T] {
        match self.get(name) {
            Some(v) => v,
            None => panic!("no input named '{name}'"),
        }
    }
}

/// Mutable view of a component's outputs.
#[derive(Debug)]
pub struct Outputs<'a, T> {
    layout: &'a IndexMap<String, Range<usize>>,
    values: &'a mut [T],
}

impl<'a, T: Scalar> Outputs<'a, T> {
    pub fn new(layout: &'a LocalLayout, values: &'a mut [T]) -> Self {
        Self {
            layout: &layout.outputs,
            values,
        }
    }

    pub fn set(&mut self, name: &str, values: &[T]) {
        self[name].copy_from_slice(values);
    }

    pub fn set_scalar(&mut self, name: &str, value: T) {
        self[name][0] = value;
    }
}

impl<T: Scalar> Index<&str> for Outputs<'_, T> {
    type Output = [T];

    fn index(&self, name: &str) -> &[T] {
        match self.layout.get(name) {
            Some(r) => &self.values[r.clone()],
            None => panic!("no output named '{name}'"),
        }
    }
}

impl<T: Scalar> IndexMut<&str> for Outputs<'_, T> {
    fn index_mut(&mut self, name: &str) -> &mut [T] {
        match self.layout.get(name) {
            Some(r) => &mut self.values[r.clone()],
            None => panic!("no output named '{name}'"),
        }
    }
}

/// Declared partial blocks of one component, keyed by local `(of, wrt)`.
#[derive(Debug, Clone, Default)]
pub struct Partials {
    blocks: IndexMap<(String, String), JacBlock>,
}

impl Partials {
    pub fn new(resolved: &[ResolvedPartial], layout: &LocalLayout) -> Self {
        let blocks = resolved
            .iter()
            .map(|p| {
                let shape = (layout.outputs[&p.of].len(), layout.inputs[&p.wrt].len());
                (
                    (p.of.clone(), p.wrt.clone()),
                    JacBlock::zeros(shape, p.sparsity.as_ref()),
                )
            })
            .collect();
        Self { blocks }
    }

    /// Set a block from row-major values (dense) or values in declared order (sparse).
    pub fn set(&mut self, of: &str, wrt: &str, values: &[f64]) -> Result<()> {
        self.block_mut(of, wrt)?.set_values(values)
    }

    /// Set a single-entry block.
    pub fn set_scalar(&mut self, of: &str, wrt: &str, value: f64) -> Result<()> {
        self.set(of, wrt, &[value])
    }

    pub fn get(&self, of: &str, wrt: &str) -> Option<&JacBlock> {
        self.blocks.get(&(of.to_string(), wrt.to_string()))
    }

    pub fn block_mut(&mut self, of: &str, wrt: &str) -> Result<&mut JacBlock> {
        self.blocks
            .get_mut(&(of.to_string(), wrt.to_string()))
            .ok_or_else(|| Error::UnknownVariable(format!("partials of '{of}' wrt '{wrt}'")))
    }

    /// Replace a block wholesale; the shape must match the declaration.
    pub fn insert(&mut self, of: &str, wrt: &str, block: JacBlock) -> Result<()> {
        let slot = self.block_mut(of, wrt)?;
        if slot.shape() != block.shape() {
            let (nr, nc) = slot.shape();
            let (br, bc) = block.shape();
            return Err(Error::ShapeMismatch {
                name: format!("partials of '{of}' wrt '{wrt}'"),
                expected: nr * nc,
                actual: br * bc,
            });
        }
        *slot = block;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &JacBlock)> {
        self.blocks
            .iter()
            .map(|((of, wrt), b)| (of.as_str(), wrt.as_str(), b))
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// A unit of computation mapping inputs to outputs.
///
/// This is the object-safe interface the model stores. Most components
/// implement [`ExplicitComponent`] instead and get this trait for free.
pub trait Component: Send {
    /// Declare variables and partials.
    fn setup(&mut self, decl: &mut Declarations) -> Result<()>;

    fn compute_real(&mut self, inputs: &Inputs<'_, f64>, outputs: &mut Outputs<'_, f64>)
    -> Result<()>;

    fn compute_complex(
        &mut self,
        inputs: &Inputs<'_, Complex64>,
        outputs: &mut Outputs<'_, Complex64>,
    ) -> Result<()>;

    /// Fill analytically declared blocks. Approximated blocks are filled by the model.
    fn compute_partials(&mut self, _inputs: &Inputs<'_, f64>, _partials: &mut Partials) -> Result<()> {
        Ok(())
    }

    /// Whether complex inputs propagate derivative information through `compute_complex`.
    fn complex_safe(&self) -> bool {
        true
    }
}

/// A component whose outputs are explicit functions of its inputs,
/// written once for any [`Scalar`].
pub trait ExplicitComponent: Send {
    fn setup(&mut self, decl: &mut Declarations) -> Result<()>;

    fn compute<T: Scalar>(&mut self, inputs: &Inputs<'_, T>, outputs: &mut Outputs<'_, T>)
    -> Result<()>;

    fn compute_partials(&mut self, _inputs: &Inputs<'_, f64>, _partials: &mut Partials) -> Result<()> {
        Ok(())
    }

    fn complex_safe(&self) -> bool {
        true
    }
}

impl<C: ExplicitComponent> Component for C {
    fn setup(&mut self, decl: &mut Declarations) -> Result<()> {
        ExplicitComponent::setup(self, decl)
    }

    fn compute_real(
        &mut self,
        inputs: &Inputs<'_, f64>,
        outputs: &mut Outputs<'_, f64>,
    ) -> Result<()> {
        self.compute(inputs, outputs)
    }

    fn compute_complex(
        &mut self,
        inputs: &Inputs<'_, Complex64>,
        outputs: &mut Outputs<'_, Complex64>,
    ) -> Result<()> {
        self.compute(inputs, outputs)
    }

    fn compute_partials(&mut self, inputs: &Inputs<'_, f64>, partials: &mut Partials) -> Result<()> {
        ExplicitComponent::compute_partials(self, inputs, partials)
    }

    fn complex_safe(&self) -> bool {
        ExplicitComponent::complex_safe(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declarations::{PartialSpec, Select};
    use crate::variable::VarSpec;

    struct Scale {
        factor: f64,
    }

    impl ExplicitComponent for Scale {
        fn setup(&mut self, decl: &mut Declarations) -> Result<()> {
            decl.add_input("x", VarSpec::zeros(2))?;
            decl.add_output("y", VarSpec::zeros(2))?;
            decl.declare_partials("y", "x", PartialSpec::analytic())
        }

        fn compute<T: Scalar>(
            &mut self,
            inputs: &Inputs<'_, T>,
            outputs: &mut Outputs<'_, T>,
        ) -> Result<()> {
            let x = &inputs["x"];
            for (y, &xi) in outputs["y"].iter_mut().zip(x) {
                *y = xi * self.factor;
            }
            Ok(())
        }

        fn compute_partials(&mut self, _inputs: &Inputs<'_, f64>, partials: &mut Partials) -> Result<()> {
            partials.set("y", "x", &[self.factor, 0.0, 0.0, self.factor])
        }
    }

    #[test]
    fn test_explicit_component_both_modes() {
        let mut comp = Scale { factor: 3.0 };
        let mut decl = Declarations::new();
        Component::setup(&mut comp, &mut decl).unwrap();
        let layout = LocalLayout::from_declarations(&decl);
        assert_eq!(layout.input_len(), 2);

        let x = [1.0, 2.0];
        let mut y = [0.0; 2];
        comp.compute_real(&Inputs::new(&layout, &x), &mut Outputs::new(&layout, &mut y))
            .unwrap();
        assert_eq!(y, [3.0, 6.0]);

        let xc = [Complex64::new(1.0, 1e-20), Complex64::new(2.0, 0.0)];
        let mut yc = [Complex64::new(0.0, 0.0); 2];
        comp.compute_complex(&Inputs::new(&layout, &xc), &mut Outputs::new(&layout, &mut yc))
            .unwrap();
        assert!((yc[0].im / 1e-20 - 3.0).abs() < 1e-14);

        let resolved = decl.resolve_partials().unwrap();
        let mut partials = Partials::new(&resolved, &layout);
        Component::compute_partials(&mut comp, &Inputs::new(&layout, &x), &mut partials).unwrap();
        assert_eq!(partials.get("y", "x").unwrap().get(1, 1), 3.0);
    }

    #[test]
    fn test_partials_rejects_undeclared_block() {
        let mut decl = Declarations::new();
        decl.add_input("a", VarSpec::scalar(0.0)).unwrap();
        decl.add_output("b", VarSpec::scalar(0.0)).unwrap();
        decl.declare_partials(Select::All, Select::All, PartialSpec::fd())
            .unwrap();
        let layout = LocalLayout::from_declarations(&decl);
        let mut partials = Partials::new(&decl.resolve_partials().unwrap(), &layout);
        assert!(partials.set_scalar("b", "a", 1.0).is_ok());
        assert!(matches!(
            partials.set_scalar("b", "c", 1.0),
            Err(Error::UnknownVariable(_))
        ));
        assert!(partials.insert("b", "a", JacBlock::zeros((2, 1), None)).is_err());
    }
}
