//! Flat variable storage with an optional imaginary shadow.

use num_complex::Complex64;

use crate::scalar::Scalar;

/// Contiguous storage for every variable of one kind.
///
/// The imaginary shadow only exists when the model was set up for complex
/// step. Real-mode code never touches it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Vector {
    real: Vec<f64>,
    imag: Option<Vec<f64>>,
}

impl Vector {
    pub fn zeros(len: usize, complex: bool) -> Self {
        Self {
            real: vec![0.0; len],
            imag: complex.then(|| vec![0.0; len]),
        }
    }

    pub fn len(&self) -> usize {
        self.real.len()
    }

    pub fn is_empty(&self) -> bool {
        self.real.is_empty()
    }

    /// Whether the imaginary shadow is allocated.
    pub fn is_complex(&self) -> bool {
        self.imag.is_some()
    }

    pub fn real(&self) -> &[f64] {
        &self.real
    }

    pub fn real_mut(&mut self) -> &mut [f64] {
        &mut self.real
    }

    pub fn imag(&self) -> Option<&[f64]> {
        self.imag.as_deref()
    }

    pub fn imag_mut(&mut self) -> Option<&mut [f64]> {
        self.imag.as_deref_mut()
    }

    /// Copy a range out as scalars of type `T`.
    pub fn gather<T: Scalar>(&self, range: std::ops::Range<usize>, out: &mut Vec<T>) {
        out.clear();
        match (&self.imag, T::IS_COMPLEX) {
            (Some(imag), true) => out.extend(
                self.real[range.clone()]
                    .iter()
                    .zip(&imag[range])
                    .map(|(&re, &im)| T::from_parts(re, im)),
            ),
            _ => out.extend(self.real[range].iter().map(|&re| T::from(re))),
        }
    }

    /// Write scalars into a range. Imaginary parts are kept only when the shadow exists.
    pub fn scatter<T: Scalar>(&mut self, offset: usize, values: &[T]) {
        for (slot, v) in self.real[offset..offset + values.len()].iter_mut().zip(values) {
            *slot = v.re();
        }
        if let Some(imag) = self.imag.as_mut() {
            for (slot, v) in imag[offset..offset + values.len()].iter_mut().zip(values) {
                *slot = v.im();
            }
        }
    }

    /// Complex value at `index`, with a zero imaginary part when there is no shadow.
    pub fn complex_at(&self, index: usize) -> Complex64 {
        let im = self.imag.as_ref().map_or(0.0, |imag| imag[index]);
        Complex64::new(self.real[index], im)
    }

    /// Add an imaginary perturbation. Returns false when there is no shadow.
    pub fn add_imag(&mut self, index: usize, delta: f64) -> bool {
        match self.imag.as_mut() {
            Some(imag) => {
                imag[index] += delta;
                true
            }
            None => false,
        }
    }

    /// Reset every imaginary part to exactly zero.
    pub fn clear_imag(&mut self) {
        if let Some(imag) = self.imag.as_mut() {
            imag.fill(0.0);
        }
    }

    /// Largest absolute imaginary part, or zero without a shadow.
    pub fn imag_max_abs(&self) -> f64 {
        self.imag
            .as_ref()
            .map_or(0.0, |imag| imag.iter().fold(0.0, |m, v| m.max(v.abs())))
    }

    /// Copy the real parts from `other` and zero the imaginary parts.
    ///
    /// Used to restore a checkpoint after a perturbation.
    pub fn restore_from(&mut self, other: &Vector) {
        self.real.copy_from_slice(&other.real);
        match (self.imag.as_mut(), other.imag.as_ref()) {
            (Some(dst), Some(src)) => dst.copy_from_slice(src),
            (Some(dst), None) => dst.fill(0.0),
            _ => {}
        }
    }
}
