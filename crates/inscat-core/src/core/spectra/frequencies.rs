use crate::core::constants::{FUNDAMENTALS, MAX_QUANTUM_ORDER};
use crate::core::models::error::ValidationError;
use itertools::iproduct;

/// Row-major table of mode indices; row `r` lists the fundamentals whose sum gives
/// transition `r`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CoefficientTable {
    width: usize,
    data: Vec<usize>,
}

impl CoefficientTable {
    /// Builds a table from flat row-major data.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidValue`] if `width` is zero or does not divide
    /// the data length.
    pub fn from_flat(width: usize, data: Vec<usize>) -> Result<Self, ValidationError> {
        if width == 0 || data.len() % width != 0 {
            return Err(ValidationError::InvalidValue {
                field: "coefficients",
                message: format!("{} entries cannot form rows of width {width}", data.len()),
            });
        }
        Ok(Self { width, data })
    }

    /// The identity enumeration `0..n` as a single-column table.
    pub fn identity(n: usize) -> Self {
        Self {
            width: 1,
            data: (0..n).collect(),
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn len(&self) -> usize {
        if self.width == 0 {
            0
        } else {
            self.data.len() / self.width
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn row(&self, index: usize) -> &[usize] {
        &self.data[index * self.width..(index + 1) * self.width]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[usize]> {
        self.data.chunks_exact(self.width.max(1))
    }

    pub fn as_flat(&self) -> &[usize] {
        &self.data
    }

    /// Returns a new table containing only the listed rows, in the given order.
    pub fn select(&self, indices: &[usize]) -> Self {
        let mut data = Vec::with_capacity(indices.len() * self.width);
        for &index in indices {
            data.extend_from_slice(self.row(index));
        }
        Self {
            width: self.width,
            data,
        }
    }
}

/// Generates the transition energies of quantum order `n` from those of order `n - 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyPowderGenerator {
    max_wavenumber: f64,
    max_order: usize,
}

impl FrequencyPowderGenerator {
    pub fn new(max_wavenumber: f64, max_order: usize) -> Self {
        Self {
            max_wavenumber,
            max_order,
        }
    }

    /// A generator bounded by the largest explicitly computed quantum order.
    pub fn with_max_wavenumber(max_wavenumber: f64) -> Self {
        Self::new(max_wavenumber, MAX_QUANTUM_ORDER)
    }

    /// Combines every previous transition with every fundamental.
    ///
    /// For `order == 1` the fundamentals and their coefficients are returned unchanged.
    /// For higher orders the result is the full Cartesian sum (outer loop over previous
    /// transitions, inner loop over fundamentals); each coefficient row is the previous
    /// row extended by the index of the added fundamental. Transitions above the
    /// maximum wavenumber are dropped.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if `order` is outside `[1, max_order]`, if a
    /// coefficient table and its frequencies differ in length, if the fundamentals'
    /// coefficients are not a single column, or if the previous coefficient rows are not
    /// `order - 1` wide.
    pub fn construct_freq_combinations(
        &self,
        previous_freqs: &[f64],
        previous_coeffs: &CoefficientTable,
        fundamentals: &[f64],
        fundamentals_coeffs: &CoefficientTable,
        order: usize,
    ) -> Result<(Vec<f64>, CoefficientTable), ValidationError> {
        if order < FUNDAMENTALS || order > self.max_order {
            return Err(ValidationError::UnsupportedOrder {
                order,
                max_order: self.max_order,
            });
        }
        check_lengths("fundamentals", fundamentals, fundamentals_coeffs)?;
        if fundamentals_coeffs.width() != 1 {
            return Err(ValidationError::InvalidValue {
                field: "fundamentals_coeffs",
                message: format!(
                    "expected a single column of mode indices, found width {}",
                    fundamentals_coeffs.width()
                ),
            });
        }

        if order == FUNDAMENTALS {
            return Ok((fundamentals.to_vec(), fundamentals_coeffs.clone()));
        }

        check_lengths("previous_freqs", previous_freqs, previous_coeffs)?;
        if previous_coeffs.width() != order - 1 {
            return Err(ValidationError::InvalidValue {
                field: "previous_coeffs",
                message: format!(
                    "rows of order {order} need {} previous indices, found {}",
                    order - 1,
                    previous_coeffs.width()
                ),
            });
        }

        let mut frequencies = Vec::new();
        let mut data = Vec::new();
        for (prev, fund) in iproduct!(0..previous_freqs.len(), 0..fundamentals.len()) {
            let frequency = previous_freqs[prev] + fundamentals[fund];
            if frequency > self.max_wavenumber {
                continue;
            }
            frequencies.push(frequency);
            data.extend_from_slice(previous_coeffs.row(prev));
            data.push(fundamentals_coeffs.as_flat()[fund]);
        }

        Ok((frequencies, CoefficientTable { width: order, data }))
    }
}

fn check_lengths(
    name: &'static str,
    frequencies: &[f64],
    coefficients: &CoefficientTable,
) -> Result<(), ValidationError> {
    if frequencies.len() != coefficients.len() {
        return Err(ValidationError::LengthMismatch {
            left: name,
            left_len: frequencies.len(),
            right: "coefficients",
            right_len: coefficients.len(),
        });
    }
    if frequencies.iter().any(|f| !f.is_finite()) {
        return Err(ValidationError::InvalidValue {
            field: name,
            message: "frequencies must be finite".to_string(),
        });
    }
    Ok(())
}
