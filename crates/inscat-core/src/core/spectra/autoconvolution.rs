//! Order extrapolation by repeated convolution with the fundamental spectrum,
//! plus histogram re-aggregation onto a different output grid.

use nalgebra::DMatrix;

/// Full discrete convolution of `spectrum` with `fundamental`, shifted by `offset` bins
/// and truncated to the length of `spectrum`.
///
/// Bin `i` stands for the energy `min + i * bin_width` on a uniform grid, so the sum of
/// bins `i` and `j` lands in bin `i + j + offset` with `offset = round(min / bin_width)`.
/// Contributions shifted outside the grid are dropped.
pub fn convolve_truncated(spectrum: &[f64], fundamental: &[f64], offset: isize) -> Vec<f64> {
    let len = spectrum.len();
    let mut out = vec![0.0; len];
    for (i, &a) in spectrum.iter().enumerate() {
        if a == 0.0 {
            continue;
        }
        for (j, &b) in fundamental.iter().enumerate() {
            let target = (i + j) as isize + offset;
            if target < 0 {
                continue;
            }
            match out.get_mut(target as usize) {
                Some(slot) => *slot += a * b,
                None => break,
            }
        }
    }
    out
}

/// Bin shift applied by [`convolve_truncated`] on a uniform grid starting at `min`.
pub fn grid_offset(min: f64, bin_width: f64) -> isize {
    (min / bin_width).round() as isize
}

/// Row-wise [`convolve_truncated`] for spectra sampled at several angles or |Q| points.
///
/// Returns `None` if the matrices do not share a shape.
pub fn convolve_rows(
    spectrum: &DMatrix<f64>,
    fundamental: &DMatrix<f64>,
    offset: isize,
) -> Option<DMatrix<f64>> {
    if spectrum.shape() != fundamental.shape() {
        return None;
    }
    let (rows, cols) = spectrum.shape();
    let mut out = DMatrix::zeros(rows, cols);
    for r in 0..rows {
        let a: Vec<f64> = spectrum.row(r).iter().copied().collect();
        let b: Vec<f64> = fundamental.row(r).iter().copied().collect();
        for (c, value) in convolve_truncated(&a, &b, offset).into_iter().enumerate() {
            out[(r, c)] = value;
        }
    }
    Some(out)
}

/// Sums bin-integrated `values` located at `centres` into the bins delimited by `edges`.
///
/// Values whose centre falls outside `[edges[0], edges[last])` are dropped.
pub fn rebin_histogram(centres: &[f64], values: &[f64], edges: &[f64]) -> Vec<f64> {
    let bins = edges.len().saturating_sub(1);
    let mut out = vec![0.0; bins];
    if bins == 0 {
        return out;
    }
    for (&x, &v) in centres.iter().zip(values) {
        if x < edges[0] || x >= edges[bins] {
            continue;
        }
        let idx = edges.partition_point(|&e| e <= x) - 1;
        out[idx] += v;
    }
    out
}
