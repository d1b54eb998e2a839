//! Closed-form, powder-averaged structure factor terms.
//!
//! For a transition built from modes `i, j, …` the isotropic average of the product of
//! quadratic forms `(Q·Bᵢ·Q)(Q·Bⱼ·Q)…` yields polynomials in Q² of the traces and double
//! contractions of the mode-resolved MSD tensors. Orders one to three are evaluated
//! exactly; higher orders use the isotropic product of traces.

use crate::core::constants::K_B_WAVENUMBER;
use nalgebra::Matrix3;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StructureFactorError {
    #[error("Mode index {mode} is out of range for {modes} modes")]
    ModeOutOfRange { mode: usize, modes: usize },

    #[error("Got {tensors} b-tensors for {frequencies} frequencies")]
    ShapeMismatch { tensors: usize, frequencies: usize },

    #[error("A transition must involve at least one mode")]
    EmptyTransition,
}

/// `coth(ω / 2k_BT)`, the Bose occupation enhancement of a mode. Equals 1 at T = 0.
pub fn thermal_factor(frequency: f64, temperature: f64) -> f64 {
    if temperature <= 0.0 {
        return 1.0;
    }
    let x = frequency / (2.0 * K_B_WAVENUMBER * temperature);
    1.0 / x.tanh()
}

/// The double contraction `X:Y = Σ_ab X_ab Y_ba`.
#[inline]
pub fn double_contraction(x: &Matrix3<f64>, y: &Matrix3<f64>) -> f64 {
    (x * y).trace()
}

/// Precomputed per-atom quantities of one k-point.
#[derive(Debug, Clone)]
pub struct AtomTensors<'a> {
    a_trace: f64,
    b_tensors: &'a [Matrix3<f64>],
    b_traces: Vec<f64>,
    thermal: Vec<f64>,
}

impl<'a> AtomTensors<'a> {
    /// # Errors
    ///
    /// Returns [`StructureFactorError::ShapeMismatch`] if the number of b-tensors does
    /// not match the number of frequencies.
    pub fn new(
        a_tensor: &Matrix3<f64>,
        b_tensors: &'a [Matrix3<f64>],
        frequencies: &[f64],
        temperature: f64,
    ) -> Result<Self, StructureFactorError> {
        if b_tensors.len() != frequencies.len() {
            return Err(StructureFactorError::ShapeMismatch {
                tensors: b_tensors.len(),
                frequencies: frequencies.len(),
            });
        }
        Ok(Self {
            a_trace: a_tensor.trace(),
            b_tensors,
            b_traces: b_tensors.iter().map(|b| b.trace()).collect(),
            thermal: frequencies
                .iter()
                .map(|&f| thermal_factor(f, temperature))
                .collect(),
        })
    }

    #[inline]
    pub fn a_trace(&self) -> f64 {
        self.a_trace
    }

    #[inline]
    pub fn b_traces(&self) -> &[f64] {
        &self.b_traces
    }

    #[inline]
    pub fn debye_waller(&self, q2: f64) -> f64 {
        (-q2 * self.a_trace / 3.0).exp()
    }

    /// Evaluates the discrete S of the transition described by `row` at momentum
    /// transfer squared `q2`.
    ///
    /// `row` lists the mode index of every phonon involved; its length is the quantum
    /// order. Repeated modes are normalised by the factorial of their multiplicity.
    pub fn discrete_s(&self, row: &[usize], q2: f64) -> Result<f64, StructureFactorError> {
        let modes = self.b_tensors.len();
        if let Some(&mode) = row.iter().find(|&&m| m >= modes) {
            return Err(StructureFactorError::ModeOutOfRange { mode, modes });
        }

        let b = |n: usize| &self.b_tensors[row[n]];
        let tr = |n: usize| self.b_traces[row[n]];

        let polynomial = match row.len() {
            0 => return Err(StructureFactorError::EmptyTransition),
            1 => q2 * tr(0) / 3.0,
            2 => q2.powi(2) * (tr(0) * tr(1) + 2.0 * double_contraction(b(0), b(1))) / 15.0,
            3 => {
                let pairs = tr(0) * double_contraction(b(1), b(2))
                    + tr(1) * double_contraction(b(0), b(2))
                    + tr(2) * double_contraction(b(0), b(1));
                let triples = (b(0) * b(1) * b(2)).trace() + (b(0) * b(2) * b(1)).trace();
                q2.powi(3) * (tr(0) * tr(1) * tr(2) + 2.0 * pairs + 4.0 * triples) / 105.0
            }
            _ => row.iter().map(|&m| q2 * self.b_traces[m] / 3.0).product(),
        };

        let thermal: f64 = row.iter().map(|&m| self.thermal[m]).product();
        Ok(polynomial / multiplicity_factorial(row) * thermal * self.debye_waller(q2))
    }
}

/// Π mₖ! over the multiplicities of the mode indices in `row`.
pub fn multiplicity_factorial(row: &[usize]) -> f64 {
    let mut sorted = row.to_vec();
    sorted.sort_unstable();
    sorted
        .chunk_by(|a, b| a == b)
        .map(|run| (1..=run.len()).map(|k| k as f64).product::<f64>())
        .product()
}
