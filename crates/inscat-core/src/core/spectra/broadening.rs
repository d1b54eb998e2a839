use crate::core::constants::GAUSSIAN_TRUNCATION_SIGMAS;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GridError {
    #[error("Invalid energy range [{min}, {max}] with bin width {bin_width}")]
    InvalidRange { min: f64, max: f64, bin_width: f64 },

    #[error("Bin edges must be finite, strictly increasing and at least two: {0}")]
    InvalidEdges(String),
}

/// How discrete transitions are turned into a binned spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BroadeningScheme {
    /// Histogram the discrete intensities without any resolution function.
    None,
    /// Full normalised Gaussian per transition, evaluated at every bin centre.
    Gaussian,
    /// Gaussian kernel cut at a fixed number of standard deviations.
    #[default]
    GaussianTruncated,
}

/// A binned energy axis in cm⁻¹, described by its bin edges.
///
/// Bin centres and widths are derived once on construction; only the edges are serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GridEdges", into = "GridEdges")]
pub struct EnergyGrid {
    edges: Vec<f64>,
    centres: Vec<f64>,
    widths: Vec<f64>,
}

#[derive(Serialize, Deserialize)]
struct GridEdges {
    edges: Vec<f64>,
}

impl TryFrom<GridEdges> for EnergyGrid {
    type Error = GridError;

    fn try_from(value: GridEdges) -> Result<Self, Self::Error> {
        Self::from_edges(value.edges)
    }
}

impl From<EnergyGrid> for GridEdges {
    fn from(grid: EnergyGrid) -> Self {
        Self { edges: grid.edges }
    }
}

impl EnergyGrid {
    /// Uniform bins of `bin_width` starting at `min`; the last edge does not exceed `max`.
    pub fn from_range(min: f64, max: f64, bin_width: f64) -> Result<Self, GridError> {
        let invalid = || GridError::InvalidRange {
            min,
            max,
            bin_width,
        };
        if !(min.is_finite() && max.is_finite() && bin_width.is_finite()) || bin_width <= 0.0 {
            return Err(invalid());
        }
        let bins = ((max - min) / bin_width + 1e-9).floor();
        if bins < 1.0 {
            return Err(invalid());
        }
        let edges = (0..=bins as usize)
            .map(|i| min + i as f64 * bin_width)
            .collect();
        Ok(Self::with_edges(edges))
    }

    pub fn from_edges(edges: Vec<f64>) -> Result<Self, GridError> {
        if edges.len() < 2 {
            return Err(GridError::InvalidEdges(format!("{} edge(s)", edges.len())));
        }
        if edges.iter().any(|e| !e.is_finite()) || edges.windows(2).any(|w| w[1] <= w[0]) {
            return Err(GridError::InvalidEdges(
                "edges are not finite and increasing".to_string(),
            ));
        }
        Ok(Self::with_edges(edges))
    }

    fn with_edges(edges: Vec<f64>) -> Self {
        let centres = edges.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect();
        let widths = edges.windows(2).map(|w| w[1] - w[0]).collect();
        Self {
            edges,
            centres,
            widths,
        }
    }

    #[inline]
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Number of bins.
    #[inline]
    pub fn len(&self) -> usize {
        self.edges.len() - 1
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn centres(&self) -> &[f64] {
        &self.centres
    }

    #[inline]
    pub fn widths(&self) -> &[f64] {
        &self.widths
    }

    /// Width of the first bin; the width of every bin for grids built with `from_range`.
    pub fn bin_width(&self) -> f64 {
        self.edges[1] - self.edges[0]
    }

    /// Index of the bin containing `x` (half-open `[lo, hi)`), if any.
    pub fn bin_index(&self, x: f64) -> Option<usize> {
        let first = self.edges[0];
        let last = self.edges[self.edges.len() - 1];
        if !(x >= first && x < last) {
            return None;
        }
        Some(self.edges.partition_point(|&e| e <= x) - 1)
    }
}

/// Convolves discrete transitions with an energy-dependent Gaussian resolution and bins
/// the result onto `grid`.
///
/// `sigma` gives the standard deviation (cm⁻¹) at each transition energy. Transitions
/// whose kernel width is not positive are histogrammed. Intensity falling outside the
/// grid is dropped.
pub fn broaden<F>(
    frequencies: &[f64],
    intensities: &[f64],
    sigma: F,
    grid: &EnergyGrid,
    scheme: BroadeningScheme,
) -> Vec<f64>
where
    F: Fn(f64) -> f64,
{
    let mut spectrum = vec![0.0; grid.len()];
    let centres = grid.centres();
    let widths = grid.widths();

    for (&frequency, &intensity) in frequencies.iter().zip(intensities) {
        let width = sigma(frequency);
        if scheme == BroadeningScheme::None || !(width > 0.0) {
            if let Some(bin) = grid.bin_index(frequency) {
                spectrum[bin] += intensity;
            }
            continue;
        }

        let (start, end) = match scheme {
            BroadeningScheme::GaussianTruncated => {
                let reach = GAUSSIAN_TRUNCATION_SIGMAS * width;
                (
                    centres.partition_point(|&c| c < frequency - reach),
                    centres.partition_point(|&c| c <= frequency + reach),
                )
            }
            _ => (0, centres.len()),
        };

        let norm = intensity / (width * (2.0 * PI).sqrt());
        for bin in start..end {
            let z = (centres[bin] - frequency) / width;
            spectrum[bin] += norm * (-0.5 * z * z).exp() * widths[bin];
        }
    }
    spectrum
}
