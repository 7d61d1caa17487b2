//! Components and models shared by the integration tests.

#![allow(dead_code)]

use mdax_core::{
    Declarations, ExplicitComponent, Inputs, Outputs, PartialSpec, Partials, Result, Scalar,
    Select, VarSpec,
};
use mdax_model::{Group, IndepVarComp, NonlinearSolver};

/// Reference Sellar solution at `x = 1`, `z = [5, 2]`.
pub const SELLAR_Y1: f64 = 25.58830273;
pub const SELLAR_Y2: f64 = 12.05848819;
pub const SELLAR_DOBJ_DZ: [f64; 2] = [9.61001056, 1.78448534];
pub const SELLAR_DOBJ_DX: f64 = 2.98061391;

pub fn assert_close(actual: f64, expected: f64, rtol: f64, what: &str) {
    let err = (actual - expected).abs() / expected.abs().max(1e-30);
    assert!(err <= rtol, "{what}: got {actual}, expected {expected} (rel err {err:e})");
}

/// `y1 = z0^2 + z1 + x - 0.2 y2`
pub struct SellarDis1 {
    pub partials: PartialSpec,
}

impl ExplicitComponent for SellarDis1 {
    fn setup(&mut self, decl: &mut Declarations) -> Result<()> {
        decl.add_input("z", VarSpec::vector(&[5.0, 2.0]))?;
        decl.add_input("x", VarSpec::scalar(1.0))?;
        decl.add_input("y2", VarSpec::scalar(1.0))?;
        decl.add_output("y1", VarSpec::scalar(1.0))?;
        decl.declare_partials(Select::All, Select::All, self.partials.clone())
    }

    fn compute<T: Scalar>(&mut self, inputs: &Inputs<'_, T>, outputs: &mut Outputs<'_, T>) -> Result<()> {
        let z = &inputs["z"];
        let x = inputs.scalar("x");
        let y2 = inputs.scalar("y2");
        outputs.set_scalar("y1", z[0] * z[0] + z[1] + x - y2 * 0.2);
        Ok(())
    }
}

/// `y2 = sqrt(|y1|) + z0 + z1`
pub struct SellarDis2 {
    pub partials: PartialSpec,
}

impl ExplicitComponent for SellarDis2 {
    fn setup(&mut self, decl: &mut Declarations) -> Result<()> {
        decl.add_input("z", VarSpec::vector(&[5.0, 2.0]))?;
        decl.add_input("y1", VarSpec::scalar(1.0))?;
        decl.add_output("y2", VarSpec::scalar(1.0))?;
        decl.declare_partials(Select::All, Select::All, self.partials.clone())
    }

    fn compute<T: Scalar>(&mut self, inputs: &Inputs<'_, T>, outputs: &mut Outputs<'_, T>) -> Result<()> {
        let z = &inputs["z"];
        let y1 = inputs.scalar("y1").cs_abs();
        outputs.set_scalar("y2", y1.sqrt() + z[0] + z[1]);
        Ok(())
    }
}

/// `obj = x^2 + z1 + y1 + exp(-y2)`, with analytic partials.
pub struct SellarObj;

impl ExplicitComponent for SellarObj {
    fn setup(&mut self, decl: &mut Declarations) -> Result<()> {
        decl.add_input("z", VarSpec::vector(&[5.0, 2.0]))?;
        decl.add_input("x", VarSpec::scalar(0.0))?;
        decl.add_input("y1", VarSpec::scalar(0.0))?;
        decl.add_input("y2", VarSpec::scalar(0.0))?;
        decl.add_output("obj", VarSpec::scalar(0.0))?;
        decl.declare_partials("obj", Select::All, PartialSpec::analytic())
    }

    fn compute<T: Scalar>(&mut self, inputs: &Inputs<'_, T>, outputs: &mut Outputs<'_, T>) -> Result<()> {
        let z = &inputs["z"];
        let x = inputs.scalar("x");
        let y1 = inputs.scalar("y1");
        let y2 = inputs.scalar("y2");
        outputs.set_scalar("obj", x * x + z[1] + y1 + (-y2).exp());
        Ok(())
    }

    fn compute_partials(&mut self, inputs: &Inputs<'_, f64>, partials: &mut Partials) -> Result<()> {
        partials.set_scalar("obj", "x", 2.0 * inputs.scalar("x"))?;
        partials.set("obj", "z", &[0.0, 1.0])?;
        partials.set_scalar("obj", "y1", 1.0)?;
        partials.set_scalar("obj", "y2", -(-inputs.scalar("y2")).exp())
    }
}

/// `out = sign * (value - offset)` on a single input, with analytic partials.
pub struct Shift {
    pub input: &'static str,
    pub offset: f64,
    pub sign: f64,
}

impl ExplicitComponent for Shift {
    fn setup(&mut self, decl: &mut Declarations) -> Result<()> {
        decl.add_input(self.input, VarSpec::scalar(0.0))?;
        decl.add_output("con", VarSpec::scalar(0.0))?;
        decl.declare_partials("con", self.input, PartialSpec::analytic())
    }

    fn compute<T: Scalar>(&mut self, inputs: &Inputs<'_, T>, outputs: &mut Outputs<'_, T>) -> Result<()> {
        outputs.set_scalar("con", (inputs.scalar(self.input) - self.offset) * self.sign);
        Ok(())
    }

    fn compute_partials(&mut self, _inputs: &Inputs<'_, f64>, partials: &mut Partials) -> Result<()> {
        partials.set_scalar("con", self.input, self.sign)
    }
}

/// The two Sellar disciplines coupled under Newton.
pub fn sellar_cycle(partials: PartialSpec) -> Group {
    let mut cycle = Group::new();
    cycle
        .add_component("d1", SellarDis1 { partials: partials.clone() })
        .add_component("d2", SellarDis2 { partials })
        .connect("d1.y1", "d2.y1")
        .connect("d2.y2", "d1.y2")
        .set_solver(NonlinearSolver::newton());
    cycle
}

/// The Sellar problem around `cycle`, which must hold `d1` and `d2`.
pub fn sellar_with(cycle: Group) -> Group {
    let mut model = Group::new();
    model
        .add_component("px", IndepVarComp::with_output("x", VarSpec::scalar(1.0)))
        .add_component("pz", IndepVarComp::with_output("z", VarSpec::vector(&[5.0, 2.0])))
        .add_group("cycle", cycle)
        .add_component("obj_cmp", SellarObj)
        .add_component("con_cmp1", Shift { input: "y1", offset: 3.16, sign: -1.0 })
        .add_component("con_cmp2", Shift { input: "y2", offset: 24.0, sign: 1.0 })
        .connect("px.x", "cycle.d1.x")
        .connect("pz.z", "cycle.d1.z")
        .connect("pz.z", "cycle.d2.z")
        .connect("px.x", "obj_cmp.x")
        .connect("pz.z", "obj_cmp.z")
        .connect("cycle.d1.y1", "obj_cmp.y1")
        .connect("cycle.d2.y2", "obj_cmp.y2")
        .connect("cycle.d1.y1", "con_cmp1.y1")
        .connect("cycle.d2.y2", "con_cmp2.y2");
    model
}

pub fn sellar(partials: PartialSpec) -> Group {
    sellar_with(sellar_cycle(partials))
}

/// `f_xy = (x - 3)^2 + x y + (y + 4)^2 - 3`
pub struct Paraboloid {
    pub partials: PartialSpec,
}

impl ExplicitComponent for Paraboloid {
    fn setup(&mut self, decl: &mut Declarations) -> Result<()> {
        decl.add_input("x", VarSpec::scalar(0.0))?;
        decl.add_input("y", VarSpec::scalar(0.0))?;
        decl.add_output("f_xy", VarSpec::scalar(0.0))?;
        decl.declare_partials(Select::All, Select::All, self.partials.clone())
    }

    fn compute<T: Scalar>(&mut self, inputs: &Inputs<'_, T>, outputs: &mut Outputs<'_, T>) -> Result<()> {
        let x = inputs.scalar("x");
        let y = inputs.scalar("y");
        let dx = x - 3.0;
        let dy = y + 4.0;
        outputs.set_scalar("f_xy", dx * dx + x * y + dy * dy - 3.0);
        Ok(())
    }

    fn compute_partials(&mut self, inputs: &Inputs<'_, f64>, partials: &mut Partials) -> Result<()> {
        if self.partials.approx.is_some() {
            return Ok(());
        }
        let x = inputs.scalar("x");
        let y = inputs.scalar("y");
        partials.set_scalar("f_xy", "x", 2.0 * (x - 3.0) + y)?;
        partials.set_scalar("f_xy", "y", x + 2.0 * (y + 4.0))
    }
}

/// `px.x = 3`, `py.y = -4` feeding a paraboloid; `df/dx = -4`, `df/dy = 3`.
pub fn paraboloid(partials: PartialSpec) -> Group {
    let mut model = Group::new();
    model
        .add_component("px", IndepVarComp::with_output("x", VarSpec::scalar(3.0)))
        .add_component("py", IndepVarComp::with_output("y", VarSpec::scalar(-4.0)))
        .add_component("parab", Paraboloid { partials })
        .connect("px.x", "parab.x")
        .connect("py.y", "parab.y");
    model
}

/// `x = 2a`, `y = 3b`; declared per pair, or all-to-all when `wildcard`.
pub struct Split {
    pub wildcard: bool,
}

impl ExplicitComponent for Split {
    fn setup(&mut self, decl: &mut Declarations) -> Result<()> {
        decl.add_input("a", VarSpec::scalar(1.0))?;
        decl.add_input("b", VarSpec::scalar(1.0))?;
        decl.add_output("x", VarSpec::scalar(0.0))?;
        decl.add_output("y", VarSpec::scalar(0.0))?;
        if self.wildcard {
            decl.declare_partials(Select::All, Select::All, PartialSpec::fd())
        } else {
            decl.declare_partials("x", "a", PartialSpec::fd())?;
            decl.declare_partials("y", "b", PartialSpec::fd())
        }
    }

    fn compute<T: Scalar>(&mut self, inputs: &Inputs<'_, T>, outputs: &mut Outputs<'_, T>) -> Result<()> {
        outputs.set_scalar("x", inputs.scalar("a") * 2.0);
        outputs.set_scalar("y", inputs.scalar("b") * 3.0);
        Ok(())
    }
}

/// `s = u^2`
pub struct Square;

impl ExplicitComponent for Square {
    fn setup(&mut self, decl: &mut Declarations) -> Result<()> {
        decl.add_input("u", VarSpec::scalar(0.0))?;
        decl.add_output("s", VarSpec::scalar(0.0))?;
        decl.declare_partials("s", "u", PartialSpec::fd())
    }

    fn compute<T: Scalar>(&mut self, inputs: &Inputs<'_, T>, outputs: &mut Outputs<'_, T>) -> Result<()> {
        let u = inputs.scalar("u");
        outputs.set_scalar("s", u * u);
        Ok(())
    }
}

/// `indep -> comp1 -> sink1 (from x), sink2 (from y)`
pub fn fan_out(wildcard: bool) -> Group {
    let mut indep = IndepVarComp::new();
    indep
        .add_output("a", VarSpec::scalar(1.0))
        .add_output("b", VarSpec::scalar(2.0));
    let mut model = Group::new();
    model
        .add_component("indep", indep)
        .add_component("comp1", Split { wildcard })
        .add_component("sink1", Square)
        .add_component("sink2", Square)
        .connect("indep.a", "comp1.a")
        .connect("indep.b", "comp1.b")
        .connect("comp1.x", "sink1.u")
        .connect("comp1.y", "sink2.u");
    model
}

/// `y = x^3` entry by entry.
pub struct Cubes {
    pub size: usize,
    pub partials: PartialSpec,
}

impl ExplicitComponent for Cubes {
    fn setup(&mut self, decl: &mut Declarations) -> Result<()> {
        decl.add_input("x", VarSpec::zeros(self.size))?;
        decl.add_output("y", VarSpec::zeros(self.size))?;
        decl.declare_partials("y", "x", self.partials.clone())
    }

    fn compute<T: Scalar>(&mut self, inputs: &Inputs<'_, T>, outputs: &mut Outputs<'_, T>) -> Result<()> {
        for (y, &x) in outputs["y"].iter_mut().zip(&inputs["x"]) {
            *y = x * x * x;
        }
        Ok(())
    }
}

pub fn cubes(values: &[f64], partials: PartialSpec) -> Group {
    let mut model = Group::new();
    model
        .add_component("p", IndepVarComp::with_output("x", VarSpec::vector(values)))
        .add_component("comp", Cubes { size: values.len(), partials })
        .connect("p.x", "comp.x");
    model
}

/// `y = x^2 / 2` entry by entry, so `dy/dx = x`.
pub struct HalfSquares {
    pub size: usize,
    pub partials: PartialSpec,
}

impl ExplicitComponent for HalfSquares {
    fn setup(&mut self, decl: &mut Declarations) -> Result<()> {
        decl.add_input("x", VarSpec::zeros(self.size))?;
        decl.add_output("y", VarSpec::zeros(self.size))?;
        decl.declare_partials("y", "x", self.partials.clone())
    }

    fn compute<T: Scalar>(&mut self, inputs: &Inputs<'_, T>, outputs: &mut Outputs<'_, T>) -> Result<()> {
        for (y, &x) in outputs["y"].iter_mut().zip(&inputs["x"]) {
            *y = x * x * 0.5;
        }
        Ok(())
    }
}

pub fn half_squares(values: &[f64], partials: PartialSpec) -> Group {
    let mut model = Group::new();
    model
        .add_component("p", IndepVarComp::with_output("x", VarSpec::vector(values)))
        .add_component("comp", HalfSquares { size: values.len(), partials })
        .connect("p.x", "comp.x");
    model
}

/// `y = 3x + x^2`
pub struct LinearPlusSquare {
    pub partials: PartialSpec,
}

impl ExplicitComponent for LinearPlusSquare {
    fn setup(&mut self, decl: &mut Declarations) -> Result<()> {
        decl.add_input("x", VarSpec::scalar(0.0))?;
        decl.add_output("y", VarSpec::scalar(0.0))?;
        decl.declare_partials("y", "x", self.partials.clone())
    }

    fn compute<T: Scalar>(&mut self, inputs: &Inputs<'_, T>, outputs: &mut Outputs<'_, T>) -> Result<()> {
        let x = inputs.scalar("x");
        outputs.set_scalar("y", x * 3.0 + x * x);
        Ok(())
    }
}

/// Dense `y1 = A x0 + B x1` with `A[r][c] = r + c + 1` and `B[r][c] = 1`.
///
/// The sparsity declared for `y1` wrt `x0` leaves out entry `(1, 3)`.
pub struct BadSparsityComp;

pub const BAD_ROWS: usize = 5;
pub const BAD_COLS: usize = 7;

impl ExplicitComponent for BadSparsityComp {
    fn setup(&mut self, decl: &mut Declarations) -> Result<()> {
        decl.add_input("x0", VarSpec::vector(&[1.0; BAD_COLS]))?;
        decl.add_input("x1", VarSpec::vector(&[1.0; 2]))?;
        decl.add_output("y1", VarSpec::zeros(BAD_ROWS))?;

        let mut rows = Vec::new();
        let mut cols = Vec::new();
        for r in 0..BAD_ROWS {
            for c in 0..BAD_COLS {
                if (r, c) != (1, 3) {
                    rows.push(r);
                    cols.push(c);
                }
            }
        }
        decl.declare_partials("y1", "x0", PartialSpec::cs().with_sparsity(rows, cols))?;
        let rows: Vec<usize> = (0..BAD_ROWS).flat_map(|r| [r, r]).collect();
        let cols: Vec<usize> = (0..BAD_ROWS).flat_map(|_| [0, 1]).collect();
        decl.declare_partials("y1", "x1", PartialSpec::cs().with_sparsity(rows, cols))
    }

    fn compute<T: Scalar>(&mut self, inputs: &Inputs<'_, T>, outputs: &mut Outputs<'_, T>) -> Result<()> {
        let x0 = &inputs["x0"];
        let x1 = &inputs["x1"];
        for (r, y) in outputs["y1"].iter_mut().enumerate() {
            let mut acc = T::zero();
            for (c, &x) in x0.iter().enumerate() {
                acc += x * (r + c + 1) as f64;
            }
            for &x in x1 {
                acc += x;
            }
            *y = acc;
        }
        Ok(())
    }
}

/// `y = 2x`; fails whenever `x` exceeds `limit`.
pub struct Fragile {
    pub limit: f64,
}

impl ExplicitComponent for Fragile {
    fn setup(&mut self, decl: &mut Declarations) -> Result<()> {
        decl.add_input("x", VarSpec::scalar(0.0))?;
        decl.add_output("y", VarSpec::scalar(0.0))?;
        decl.declare_partials("y", "x", PartialSpec::analytic())
    }

    fn compute<T: Scalar>(&mut self, inputs: &Inputs<'_, T>, outputs: &mut Outputs<'_, T>) -> Result<()> {
        let x = inputs.scalar("x");
        if x.re() > self.limit {
            return Err(mdax_core::Error::Compute(format!("x = {} is out of range", x.re())));
        }
        outputs.set_scalar("y", x * 2.0);
        Ok(())
    }

    fn compute_partials(&mut self, _inputs: &Inputs<'_, f64>, partials: &mut Partials) -> Result<()> {
        partials.set_scalar("y", "x", 2.0)
    }
}
