//! Approximation settings shared by component declarations and group schemes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default finite-difference step.
pub const DEFAULT_FD_STEP: f64 = 1e-6;

/// Default floor for relative step calculations.
pub const DEFAULT_MINIMUM_STEP: f64 = 1e-12;

/// Approximation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Method {
    /// Finite difference.
    #[default]
    Fd,
    /// Complex step.
    Cs,
}

impl Method {
    pub const NAMES: [&'static str; 2] = ["fd", "cs"];

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Fd => "fd",
            Method::Cs => "cs",
        }
    }
}

/// Finite-difference form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FdForm {
    #[default]
    Forward,
    Backward,
    Central,
}

impl FdForm {
    pub const NAMES: [&'static str; 3] = ["forward", "backward", "central"];

    pub fn as_str(self) -> &'static str {
        match self {
            FdForm::Forward => "forward",
            FdForm::Backward => "backward",
            FdForm::Central => "central",
        }
    }

    /// Order used when none is requested.
    pub fn default_order(self) -> u8 {
        match self {
            FdForm::Forward | FdForm::Backward => 1,
            FdForm::Central => 2,
        }
    }

    /// Orders with a stencil available for this form.
    pub fn supported_orders(self) -> &'static [u8] {
        match self {
            FdForm::Forward | FdForm::Backward => &[1, 2],
            FdForm::Central => &[2, 4],
        }
    }
}

/// How the actual step is derived from the base step and the nominal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StepCalc {
    /// The base step, as given.
    #[default]
    Abs,
    /// Relative to the 2-norm of the variable.
    Rel,
    /// Same as [`StepCalc::Rel`]; kept for configurations written against the older name.
    RelLegacy,
    /// Relative to the mean absolute value of the variable.
    RelAvg,
    /// One step per entry, relative to that entry.
    RelElement,
}

impl StepCalc {
    pub const NAMES: [&'static str; 5] = ["abs", "rel", "rel_legacy", "rel_avg", "rel_element"];

    pub fn as_str(self) -> &'static str {
        match self {
            StepCalc::Abs => "abs",
            StepCalc::Rel => "rel",
            StepCalc::RelLegacy => "rel_legacy",
            StepCalc::RelAvg => "rel_avg",
            StepCalc::RelElement => "rel_element",
        }
    }
}

/// What to do when computed entries fall outside a declared sparsity pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SparsityBehavior {
    Ignore,
    #[default]
    Warn,
    Error,
}

impl SparsityBehavior {
    pub const NAMES: [&'static str; 3] = ["ignore", "warn", "error"];

    pub fn as_str(self) -> &'static str {
        match self {
            SparsityBehavior::Ignore => "ignore",
            SparsityBehavior::Warn => "warn",
            SparsityBehavior::Error => "error",
        }
    }
}

fn invalid_setting(value: &str, setting: &str, names: &[&str]) -> Error {
    let quoted: Vec<String> = names.iter().map(|n| format!("'{n}'")).collect();
    Error::InvalidConfiguration(format!(
        "'{value}' is not a valid setting for {setting}; must be one of [{}].",
        quoted.join(", ")
    ))
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fd" => Ok(Method::Fd),
            "cs" => Ok(Method::Cs),
            _ => Err(invalid_setting(s, "method", &Method::NAMES)),
        }
    }
}

impl FromStr for FdForm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "forward" => Ok(FdForm::Forward),
            "backward" => Ok(FdForm::Backward),
            "central" => Ok(FdForm::Central),
            _ => Err(invalid_setting(s, "form", &FdForm::NAMES)),
        }
    }
}

impl FromStr for StepCalc {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "abs" => Ok(StepCalc::Abs),
            "rel" => Ok(StepCalc::Rel),
            "rel_legacy" => Ok(StepCalc::RelLegacy),
            "rel_avg" => Ok(StepCalc::RelAvg),
            "rel_element" => Ok(StepCalc::RelElement),
            _ => Err(invalid_setting(s, "step_calc", &StepCalc::NAMES)),
        }
    }
}

impl FromStr for SparsityBehavior {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ignore" => Ok(SparsityBehavior::Ignore),
            "warn" => Ok(SparsityBehavior::Warn),
            "error" => Ok(SparsityBehavior::Error),
            _ => Err(invalid_setting(s, "sparsity_behavior", &SparsityBehavior::NAMES)),
        }
    }
}

macro_rules! string_conversions {
    ($($ty:ty),*) => {
        $(
            impl TryFrom<String> for $ty {
                type Error = Error;

                fn try_from(value: String) -> Result<Self> {
                    value.parse()
                }
            }

            impl From<$ty> for String {
                fn from(value: $ty) -> String {
                    value.as_str().to_string()
                }
            }

            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(self.as_str())
                }
            }
        )*
    };
}

string_conversions!(Method, FdForm, StepCalc, SparsityBehavior);

/// Settings for one approximated derivative.
///
/// A `step` of `None` defers to the defaults of the context doing the
/// approximation (component, group or check pass).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApproxOptions {
    /// Finite difference or complex step.
    pub method: Method,
    /// Base step size.
    pub step: Option<f64>,
    /// Finite-difference form. Ignored for complex step.
    pub form: FdForm,
    /// Finite-difference order; `None` uses the form's default.
    pub order: Option<u8>,
    /// Step calculation mode. Complex step always uses the step as given.
    pub step_calc: StepCalc,
    /// Floor for relative step calculations.
    pub minimum_step: f64,
    /// Perturb structurally independent columns together.
    pub directional: bool,
}

impl Default for ApproxOptions {
    fn default() -> Self {
        Self {
            method: Method::Fd,
            step: None,
            form: FdForm::Forward,
            order: None,
            step_calc: StepCalc::Abs,
            minimum_step: DEFAULT_MINIMUM_STEP,
            directional: false,
        }
    }
}

impl ApproxOptions {
    /// Finite-difference options with defaults.
    pub fn fd() -> Self {
        Self::default()
    }

    /// Complex-step options with defaults.
    pub fn cs() -> Self {
        Self {
            method: Method::Cs,
            ..Default::default()
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_step(mut self, step: f64) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_form(mut self, form: FdForm) -> Self {
        self.form = form;
        self
    }

    pub fn with_order(mut self, order: u8) -> Self {
        self.order = Some(order);
        self
    }

    pub fn with_step_calc(mut self, step_calc: StepCalc) -> Self {
        self.step_calc = step_calc;
        self
    }

    pub fn with_minimum_step(mut self, minimum_step: f64) -> Self {
        self.minimum_step = minimum_step;
        self
    }

    pub fn with_directional(mut self, directional: bool) -> Self {
        self.directional = directional;
        self
    }

    /// Finite-difference order after applying the form default.
    pub fn resolved_order(&self) -> u8 {
        self.order.unwrap_or_else(|| self.form.default_order())
    }

    /// Check the settings for combinations that can never be evaluated.
    pub fn validate(&self) -> Result<()> {
        if let Some(step) = self.step {
            if !step.is_finite() || step <= 0.0 {
                return Err(Error::InvalidConfiguration(format!(
                    "step must be positive and finite, got {step}."
                )));
            }
        }
        if !self.minimum_step.is_finite() || self.minimum_step <= 0.0 {
            return Err(Error::InvalidConfiguration(format!(
                "minimum_step must be positive and finite, got {}.",
                self.minimum_step
            )));
        }
        if self.directional && self.step_calc == StepCalc::RelElement {
            return Err(Error::InvalidConfiguration(
                "Option 'directional' is not supported when 'step_calc' is set to 'rel_element'."
                    .to_string(),
            ));
        }
        if self.method == Method::Fd {
            let order = self.resolved_order();
            if !self.form.supported_orders().contains(&order) {
                return Err(Error::InvalidConfiguration(format!(
                    "order {order} is not available for '{}' differences; must be one of {:?}.",
                    self.form,
                    self.form.supported_orders()
                )));
            }
        }
        Ok(())
    }
}
