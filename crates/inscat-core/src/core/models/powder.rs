use super::error::ValidationError;
use crate::core::constants::TENSOR_SUM_TOLERANCE;
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

/// Mean-square-displacement tensors of every atom at every k-point.
///
/// For k-point `k` and atom `i`, `a_tensor(k, i)` is the time-integrated MSD tensor and
/// `b_tensors(k, i)` holds one mode-resolved tensor per retained frequency. The
/// invariant `a = Σ_mode b` is checked at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PowderRepr", into = "PowderRepr")]
pub struct PowderData {
    a_tensors: Vec<Vec<Matrix3<f64>>>,
    b_tensors: Vec<Vec<Vec<Matrix3<f64>>>>,
    frequencies: Vec<Vec<f64>>,
    num_atoms: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PowderRepr {
    a_tensors: Vec<Vec<Matrix3<f64>>>,
    b_tensors: Vec<Vec<Vec<Matrix3<f64>>>>,
    frequencies: Vec<Vec<f64>>,
    num_atoms: usize,
}

impl PowderData {
    /// Validates and wraps per-k-point tensors.
    ///
    /// All outer vectors are indexed by k-point; `a_tensors[k]` and `b_tensors[k]` are
    /// indexed by atom, and `b_tensors[k][atom]` by mode.
    ///
    /// # Arguments
    ///
    /// * `num_atoms` - The expected atom count. When `None`, it is taken from the first
    ///   k-point.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] on any dimension mismatch or if `a` differs from
    /// the sum of the corresponding `b` tensors.
    pub fn new(
        a_tensors: Vec<Vec<Matrix3<f64>>>,
        b_tensors: Vec<Vec<Vec<Matrix3<f64>>>>,
        frequencies: Vec<Vec<f64>>,
        num_atoms: Option<usize>,
    ) -> Result<Self, ValidationError> {
        if a_tensors.len() != b_tensors.len() {
            return Err(ValidationError::LengthMismatch {
                left: "a_tensors",
                left_len: a_tensors.len(),
                right: "b_tensors",
                right_len: b_tensors.len(),
            });
        }
        if a_tensors.len() != frequencies.len() {
            return Err(ValidationError::LengthMismatch {
                left: "a_tensors",
                left_len: a_tensors.len(),
                right: "frequencies",
                right_len: frequencies.len(),
            });
        }
        let num_atoms = num_atoms
            .or_else(|| a_tensors.first().map(Vec::len))
            .unwrap_or(0);

        for (k, ((a_k, b_k), freqs)) in a_tensors
            .iter()
            .zip(&b_tensors)
            .zip(&frequencies)
            .enumerate()
        {
            for (found, name) in [(a_k.len(), "a_tensor"), (b_k.len(), "b_tensor")] {
                if found != num_atoms {
                    return Err(ValidationError::AtomCountMismatch {
                        context: format!("{name} of k-point {k}"),
                        expected: num_atoms,
                        found,
                    });
                }
            }
            for (atom, (a, b_modes)) in a_k.iter().zip(b_k).enumerate() {
                if b_modes.len() != freqs.len() {
                    return Err(ValidationError::ModeCountMismatch {
                        context: format!("b_tensor of atom {atom} at k-point {k}"),
                        expected: freqs.len(),
                        found: b_modes.len(),
                    });
                }
                let sum: Matrix3<f64> = b_modes.iter().sum();
                let scale = a.abs().max().max(1.0);
                if (a - sum).abs().max() > TENSOR_SUM_TOLERANCE * scale {
                    return Err(ValidationError::InvalidValue {
                        field: "a_tensor",
                        message: format!(
                            "a_tensor of atom {atom} at k-point {k} is not the sum of its b_tensors"
                        ),
                    });
                }
            }
        }

        Ok(Self {
            a_tensors,
            b_tensors,
            frequencies,
            num_atoms,
        })
    }

    #[inline]
    pub fn num_kpoints(&self) -> usize {
        self.frequencies.len()
    }

    #[inline]
    pub fn num_atoms(&self) -> usize {
        self.num_atoms
    }

    pub fn a_tensor(&self, kpoint: usize, atom: usize) -> Option<&Matrix3<f64>> {
        self.a_tensors.get(kpoint).and_then(|a_k| a_k.get(atom))
    }

    pub fn b_tensors(&self, kpoint: usize, atom: usize) -> Option<&[Matrix3<f64>]> {
        self.b_tensors
            .get(kpoint)
            .and_then(|b_k| b_k.get(atom))
            .map(Vec::as_slice)
    }

    /// Frequencies (cm⁻¹) of the modes retained at `kpoint`.
    pub fn frequencies(&self, kpoint: usize) -> Option<&[f64]> {
        self.frequencies.get(kpoint).map(Vec::as_slice)
    }
}

impl TryFrom<PowderRepr> for PowderData {
    type Error = ValidationError;

    fn try_from(repr: PowderRepr) -> Result<Self, Self::Error> {
        Self::new(
            repr.a_tensors,
            repr.b_tensors,
            repr.frequencies,
            Some(repr.num_atoms),
        )
    }
}

impl From<PowderData> for PowderRepr {
    fn from(data: PowderData) -> Self {
        Self {
            a_tensors: data.a_tensors,
            b_tensors: data.b_tensors,
            frequencies: data.frequencies,
            num_atoms: data.num_atoms,
        }
    }
}
