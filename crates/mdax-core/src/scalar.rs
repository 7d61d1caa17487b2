//! Scalar abstraction over real and complex arithmetic.
//!
//! Component code is written once against [`Scalar`] and runs both for
//! ordinary evaluation (`f64`) and for complex-step evaluation (`Complex64`).

use std::fmt::Debug;
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

use num_complex::Complex64;

/// Numeric type a component can be evaluated with.
pub trait Scalar:
    Copy
    + Debug
    + PartialEq
    + Send
    + Sync
    + 'static
    + From<f64>
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + Add<f64, Output = Self>
    + Sub<f64, Output = Self>
    + Mul<f64, Output = Self>
    + Div<f64, Output = Self>
    + AddAssign
    + SubAssign
    + MulAssign
    + DivAssign
{
    /// True for the complex instantiation.
    const IS_COMPLEX: bool;

    /// Build from real and imaginary parts. The imaginary part is dropped for `f64`.
    fn from_parts(re: f64, im: f64) -> Self;

    fn re(self) -> f64;

    fn im(self) -> f64;

    fn zero() -> Self {
        Self::from(0.0)
    }

    fn sqrt(self) -> Self;
    fn exp(self) -> Self;
    fn ln(self) -> Self;
    fn sin(self) -> Self;
    fn cos(self) -> Self;
    fn tanh(self) -> Self;
    fn powi(self, n: i32) -> Self;
    fn powf(self, p: f64) -> Self;

    /// Absolute value that keeps the derivative information of the imaginary part.
    ///
    /// The sign is taken from the real part, so `cs_abs(x + ih) = |x| + sign(x) ih`.
    fn cs_abs(self) -> Self {
        if self.re() < 0.0 { -self } else { self }
    }
}

impl Scalar for f64 {
    const IS_COMPLEX: bool = false;

    #[inline]
    fn from_parts(re: f64, _im: f64) -> Self {
        re
    }

    #[inline]
    fn re(self) -> f64 {
        self
    }

    #[inline]
    fn im(self) -> f64 {
        0.0
    }

    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }

    fn exp(self) -> Self {
        f64::exp(self)
    }

    fn ln(self) -> Self {
        f64::ln(self)
    }

    fn sin(self) -> Self {
        f64::sin(self)
    }

    fn cos(self) -> Self {
        f64::cos(self)
    }

    fn tanh(self) -> Self {
        f64::tanh(self)
    }

    fn powi(self, n: i32) -> Self {
        f64::powi(self, n)
    }

    fn powf(self, p: f64) -> Self {
        f64::powf(self, p)
    }
}

impl Scalar for Complex64 {
    const IS_COMPLEX: bool = true;

    #[inline]
    fn from_parts(re: f64, im: f64) -> Self {
        Complex64::new(re, im)
    }

    #[inline]
    fn re(self) -> f64 {
        self.re
    }

    #[inline]
    fn im(self) -> f64 {
        self.im
    }

    fn sqrt(self) -> Self {
        Complex64::sqrt(self)
    }

    fn exp(self) -> Self {
        Complex64::exp(self)
    }

    fn ln(self) -> Self {
        Complex64::ln(self)
    }

    fn sin(self) -> Self {
        Complex64::sin(self)
    }

    fn cos(self) -> Self {
        Complex64::cos(self)
    }

    fn tanh(self) -> Self {
        Complex64::tanh(self)
    }

    fn powi(self, n: i32) -> Self {
        Complex64::powi(&self, n)
    }

    fn powf(self, p: f64) -> Self {
        Complex64::powf(self, p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_plus_sqrt<T: Scalar>(x: T) -> T {
        x * x + x.sqrt()
    }

    #[test]
    fn test_complex_step_derivative() {
        let h = 1e-20;
        let x = 2.0;
        let f = square_plus_sqrt(Complex64::from_parts(x, h));
        let deriv = f.im() / h;
        let expected = 2.0 * x + 0.5 / x.sqrt();
        assert!((deriv - expected).abs() < 1e-14, "deriv = {deriv}");
        assert!((f.re() - square_plus_sqrt(x)).abs() < 1e-15);
    }

    #[test]
    fn test_cs_abs_sign() {
        let z = Complex64::new(-3.0, 1e-20).cs_abs();
        assert_eq!(z.re, 3.0);
        assert_eq!(z.im, -1e-20);
        assert_eq!((-2.5f64).cs_abs(), 2.5);
    }

    #[test]
    fn test_real_drops_imaginary() {
        let x = <f64 as Scalar>::from_parts(1.5, 7.0);
        assert_eq!(x, 1.5);
        assert_eq!(Scalar::im(x), 0.0);
    }
}
