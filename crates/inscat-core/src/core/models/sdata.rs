use crate::core::spectra::autoconvolution::{convolve_rows, grid_offset, rebin_histogram};
use crate::core::spectra::broadening::EnergyGrid;
use crate::core::spectra::instruments::{Instrument, InstrumentKind};
use crate::core::utils::parallel::map_in_pool;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{info, warn};

/// A spectrum of shape `[sample points, energy bins]`.
pub type Spectrum = DMatrix<f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SampleForm {
    #[default]
    Powder,
}

impl std::fmt::Display for SampleForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleForm::Powder => write!(f, "Powder"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SDataError {
    #[error("Requested {requested} quantum order(s) but only {available} are available")]
    OrdersUnavailable { requested: usize, available: usize },

    #[error("Spectrum shape mismatch for {context}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        context: String,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Atom {atom} has invalid quantum orders: {message}")]
    InvalidOrders { atom: usize, message: String },

    #[error("Atom {atom} has no fundamental (order 1) spectrum")]
    MissingFundamental { atom: usize },

    #[error("Invalid temperature {0} K")]
    InvalidTemperature(f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SDataRepr {
    grid: EnergyGrid,
    temperature: f64,
    sample_form: SampleForm,
    data: BTreeMap<usize, BTreeMap<usize, Spectrum>>,
}

/// Per-atom, per-quantum-order spectra over one shared energy grid.
///
/// Every atom carries orders `1..=order_count()` and every spectrum has the same shape,
/// with one column per energy bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SDataRepr", into = "SDataRepr")]
pub struct SData {
    grid: EnergyGrid,
    temperature: f64,
    sample_form: SampleForm,
    data: BTreeMap<usize, BTreeMap<usize, Spectrum>>,
}

impl SData {
    pub fn new(
        grid: EnergyGrid,
        temperature: f64,
        sample_form: SampleForm,
        data: BTreeMap<usize, BTreeMap<usize, Spectrum>>,
    ) -> Result<Self, SDataError> {
        if !(temperature >= 0.0) || !temperature.is_finite() {
            return Err(SDataError::InvalidTemperature(temperature));
        }

        let mut expected_shape: Option<(usize, usize)> = None;
        let mut expected_orders: Option<usize> = None;
        for (&atom, orders) in &data {
            let count = orders.len();
            if count == 0 {
                return Err(SDataError::InvalidOrders {
                    atom,
                    message: "no spectra".to_string(),
                });
            }
            if orders.keys().copied().ne(1..=count) {
                return Err(SDataError::InvalidOrders {
                    atom,
                    message: format!("orders are not contiguous from 1: {:?}", orders.keys()),
                });
            }
            match expected_orders {
                Some(n) if n != count => {
                    return Err(SDataError::InvalidOrders {
                        atom,
                        message: format!("{count} order(s) where other atoms have {n}"),
                    });
                }
                _ => expected_orders = Some(count),
            }

            for (&order, spectrum) in orders {
                let shape = spectrum.shape();
                let expected = *expected_shape.get_or_insert((shape.0, grid.len()));
                if shape != expected {
                    return Err(SDataError::ShapeMismatch {
                        context: format!("atom {atom}, order {order}"),
                        expected,
                        found: shape,
                    });
                }
            }
        }

        Ok(Self {
            grid,
            temperature,
            sample_form,
            data,
        })
    }

    #[inline]
    pub fn grid(&self) -> &EnergyGrid {
        &self.grid
    }

    /// Energy bin centres in cm⁻¹.
    pub fn frequencies(&self) -> Vec<f64> {
        self.grid.centres().to_vec()
    }

    #[inline]
    pub fn bin_width(&self) -> f64 {
        self.grid.bin_width()
    }

    #[inline]
    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    #[inline]
    pub fn sample_form(&self) -> SampleForm {
        self.sample_form
    }

    #[inline]
    pub fn num_atoms(&self) -> usize {
        self.data.len()
    }

    /// Number of quantum orders stored for every atom.
    pub fn order_count(&self) -> usize {
        self.data.values().next().map_or(0, BTreeMap::len)
    }

    /// Rows per spectrum: 1 for angle-averaged data, one per |Q| point otherwise.
    pub fn sample_points(&self) -> usize {
        self.data
            .values()
            .flat_map(BTreeMap::values)
            .next()
            .map_or(0, |s| s.nrows())
    }

    pub fn get(&self, atom: usize, order: usize) -> Option<&Spectrum> {
        self.data.get(&atom)?.get(&order)
    }

    pub fn atoms(&self) -> impl Iterator<Item = (usize, &BTreeMap<usize, Spectrum>)> {
        self.data.iter().map(|(&atom, orders)| (atom, orders))
    }

    /// A copy holding only orders `1..=n`.
    pub fn extract_orders(&self, n: usize) -> Result<SData, SDataError> {
        let available = self.order_count();
        if n == 0 || n > available {
            return Err(SDataError::OrdersUnavailable {
                requested: n,
                available,
            });
        }
        let data = self
            .data
            .iter()
            .map(|(&atom, orders)| {
                let kept = orders
                    .iter()
                    .filter(|(order, _)| **order <= n)
                    .map(|(&order, s)| (order, s.clone()))
                    .collect();
                (atom, kept)
            })
            .collect();
        Ok(Self {
            data,
            ..self.clone_header()
        })
    }

    /// Flags (atom, order) pairs whose peak intensity scaled by `relative_threshold`
    /// falls below `absolute_threshold`.
    ///
    /// Diagnostic only: every flagged pair is logged and the data is left untouched.
    pub fn check_thresholds(
        &self,
        absolute_threshold: f64,
        relative_threshold: f64,
    ) -> Vec<(usize, usize)> {
        let mut flagged = Vec::new();
        for (&atom, orders) in &self.data {
            for (&order, spectrum) in orders {
                let peak = spectrum.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                if peak * relative_threshold < absolute_threshold {
                    warn!(
                        atom,
                        order,
                        peak,
                        "Spectrum is below the significance threshold and may be numerical noise."
                    );
                    flagged.push((atom, order));
                }
            }
        }
        flagged
    }

    /// Extends every atom up to `max_order` by convolving its highest stored order with
    /// its fundamental spectrum, optionally re-binning the result onto `output_grid`.
    ///
    /// Atoms are processed independently on a pool of `threads` workers.
    pub fn add_autoconvolution_spectra(
        &self,
        max_order: usize,
        output_grid: Option<&EnergyGrid>,
        threads: usize,
    ) -> Result<SData, SDataError> {
        let atoms: Vec<(usize, &BTreeMap<usize, Spectrum>)> = self.atoms().collect();
        let start = self.order_count();
        if max_order > start {
            info!(from = start + 1, to = max_order, "Synthesizing higher orders by autoconvolution.");
        }

        let offset = grid_offset(self.grid.edges()[0], self.grid.bin_width());
        let results = map_in_pool(threads, &atoms, |(atom, orders)| {
            let mut orders = (*orders).clone();
            let fundamental = orders
                .get(&1)
                .cloned()
                .ok_or(SDataError::MissingFundamental { atom: *atom })?;
            for order in (start + 1)..=max_order {
                let previous = orders
                    .get(&(order - 1))
                    .ok_or(SDataError::MissingFundamental { atom: *atom })?;
                let next = convolve_rows(previous, &fundamental, offset).ok_or_else(|| {
                    SDataError::ShapeMismatch {
                        context: format!("autoconvolution of atom {atom}"),
                        expected: fundamental.shape(),
                        found: previous.shape(),
                    }
                })?;
                orders.insert(order, next);
            }
            Ok((*atom, orders))
        });

        let data = results
            .into_iter()
            .collect::<Result<BTreeMap<_, _>, SDataError>>()?;
        let extended = Self {
            data,
            ..self.clone_header()
        };
        Ok(match output_grid {
            Some(grid) => extended.rebin(grid),
            None => extended,
        })
    }

    /// Re-aggregates every spectrum onto `grid` by histogramming the bin-integrated
    /// intensities at the current bin centres.
    pub fn rebin(&self, grid: &EnergyGrid) -> SData {
        let centres = self.grid.centres();
        let edges = grid.edges();
        let rebin_one = |spectrum: &Spectrum| {
            let mut out = Spectrum::zeros(spectrum.nrows(), grid.len());
            for r in 0..spectrum.nrows() {
                let row: Vec<f64> = spectrum.row(r).iter().copied().collect();
                for (c, v) in rebin_histogram(centres, &row, edges).into_iter().enumerate() {
                    out[(r, c)] = v;
                }
            }
            out
        };
        let data = self
            .data
            .iter()
            .map(|(&atom, orders)| {
                let orders = orders.iter().map(|(&o, s)| (o, rebin_one(s))).collect();
                (atom, orders)
            })
            .collect();
        Self {
            grid: grid.clone(),
            temperature: self.temperature,
            sample_form: self.sample_form,
            data,
        }
    }

    /// Masks (|Q|, E) bins the instrument cannot reach with NaN, in place.
    ///
    /// Only meaningful for 2-D instruments; for 1-D instruments a warning is logged and
    /// the data is left untouched.
    pub fn apply_kinematic_constraints(
        &mut self,
        instrument: &Instrument,
    ) -> Result<(), SDataError> {
        if instrument.kind() == InstrumentKind::OneDimensional {
            warn!(
                instrument = instrument.name(),
                "Kinematic constraints are not supported for 1-D instruments; data left untouched."
            );
            return Ok(());
        }
        let q_points = instrument.q_points().unwrap_or_default();
        let shape = (q_points.len(), self.grid.len());
        let centres = self.grid.centres();
        let limits: Vec<Option<(f64, f64)>> =
            centres.iter().map(|&e| instrument.q_limits(e)).collect();

        for (&atom, orders) in self.data.iter_mut() {
            for (&order, spectrum) in orders.iter_mut() {
                if spectrum.shape() != shape {
                    return Err(SDataError::ShapeMismatch {
                        context: format!("kinematic mask of atom {atom}, order {order}"),
                        expected: shape,
                        found: spectrum.shape(),
                    });
                }
                for (c, limit) in limits.iter().enumerate() {
                    for (r, &q) in q_points.iter().enumerate() {
                        let accessible = matches!(limit, Some((lo, hi)) if q >= *lo && q <= *hi);
                        if !accessible {
                            spectrum[(r, c)] = f64::NAN;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Sum over all atoms and orders.
    pub fn total_spectrum(&self) -> Option<Spectrum> {
        self.data
            .values()
            .flat_map(BTreeMap::values)
            .cloned()
            .reduce(|acc, s| acc + s)
    }

    /// Sum over all orders of one atom.
    pub fn atom_total(&self, atom: usize) -> Option<Spectrum> {
        self.data
            .get(&atom)?
            .values()
            .cloned()
            .reduce(|acc, s| acc + s)
    }

    fn clone_header(&self) -> Self {
        Self {
            grid: self.grid.clone(),
            temperature: self.temperature,
            sample_form: self.sample_form,
            data: BTreeMap::new(),
        }
    }
}

impl TryFrom<SDataRepr> for SData {
    type Error = SDataError;

    fn try_from(repr: SDataRepr) -> Result<Self, Self::Error> {
        SData::new(repr.grid, repr.temperature, repr.sample_form, repr.data)
    }
}

impl From<SData> for SDataRepr {
    fn from(s: SData) -> Self {
        SDataRepr {
            grid: s.grid,
            temperature: s.temperature,
            sample_form: s.sample_form,
            data: s.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::spectra::instruments::default_instruments;

    fn row(values: &[f64]) -> Spectrum {
        Spectrum::from_row_slice(1, values.len(), values)
    }

    fn sample() -> SData {
        let grid = EnergyGrid::from_range(0.0, 4.0, 1.0).unwrap();
        let mut data = BTreeMap::new();
        data.insert(
            0,
            BTreeMap::from([(1, row(&[0.0, 1.0, 0.0, 0.0])), (2, row(&[0.0, 0.0, 0.5, 0.0]))]),
        );
        data.insert(
            1,
            BTreeMap::from([(1, row(&[0.0, 2.0, 0.0, 0.0])), (2, row(&[0.0, 0.0, 1e-12, 0.0]))]),
        );
        SData::new(grid, 300.0, SampleForm::Powder, data).unwrap()
    }

    #[test]
    fn new_validates_shapes_and_orders() {
        let grid = EnergyGrid::from_range(0.0, 4.0, 1.0).unwrap();
        let wrong_cols = BTreeMap::from([(0, BTreeMap::from([(1, row(&[1.0, 2.0]))]))]);
        assert!(matches!(
            SData::new(grid.clone(), 0.0, SampleForm::Powder, wrong_cols),
            Err(SDataError::ShapeMismatch { .. })
        ));

        let gap = BTreeMap::from([(0, BTreeMap::from([(2, row(&[0.0; 4]))]))]);
        assert!(matches!(
            SData::new(grid.clone(), 0.0, SampleForm::Powder, gap),
            Err(SDataError::InvalidOrders { .. })
        ));

        assert!(matches!(
            SData::new(grid, -1.0, SampleForm::Powder, BTreeMap::new()),
            Err(SDataError::InvalidTemperature(_))
        ));
    }

    #[test]
    fn extract_orders_truncates_and_rejects_excess() {
        let s = sample();
        assert_eq!(s.order_count(), 2);
        let first = s.extract_orders(1).unwrap();
        assert_eq!(first.order_count(), 1);
        assert!(first.get(0, 2).is_none());
        assert_eq!(
            s.extract_orders(3),
            Err(SDataError::OrdersUnavailable {
                requested: 3,
                available: 2
            })
        );
    }

    #[test]
    fn check_thresholds_flags_weak_spectra_without_mutation() {
        let s = sample();
        let before = s.clone();
        let flagged = s.check_thresholds(1e-7, 0.01);
        assert_eq!(flagged, vec![(1, 2)]);
        assert_eq!(s, before);
    }

    #[test]
    fn autoconvolution_appends_convolved_orders() {
        let s = sample().extract_orders(1).unwrap();
        let extended = s.add_autoconvolution_spectra(3, None, 2).unwrap();
        assert_eq!(extended.order_count(), 3);
        // fundamental peaked in bin 1: order 2 lands in bin 2, order 3 in bin 3
        let second = extended.get(1, 2).unwrap();
        assert!((second[(0, 2)] - 4.0).abs() < 1e-12);
        let third = extended.get(1, 3).unwrap();
        assert!((third[(0, 3)] - 8.0).abs() < 1e-12);
        assert_eq!(extended.get(0, 1), s.get(0, 1));
    }

    #[test]
    fn autoconvolution_respects_grid_start() {
        // bins start at 100 cm-1: 100 + 100 = 200 is past the last edge
        let grid = EnergyGrid::from_range(100.0, 104.0, 1.0).unwrap();
        let data = BTreeMap::from([(0, BTreeMap::from([(1, row(&[1.0, 0.0, 0.0, 0.0]))]))]);
        let s = SData::new(grid, 300.0, SampleForm::Powder, data).unwrap();
        let extended = s.add_autoconvolution_spectra(2, None, 1).unwrap();
        assert!(extended.get(0, 2).unwrap().iter().all(|&v| v.abs() < 1e-12));

        // bins at 2, 4, 6, 8, 10 cm-1: 4 + 4 = 8 lands in bin 3
        let grid = EnergyGrid::from_range(2.0, 12.0, 2.0).unwrap();
        let data =
            BTreeMap::from([(0, BTreeMap::from([(1, row(&[0.0, 1.0, 0.0, 0.0, 0.0]))]))]);
        let s = SData::new(grid, 300.0, SampleForm::Powder, data).unwrap();
        let second = s.add_autoconvolution_spectra(2, None, 1).unwrap();
        let second = second.get(0, 2).unwrap();
        assert!((second[(0, 3)] - 1.0).abs() < 1e-12);
        assert!((second.sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn autoconvolution_below_current_order_is_a_no_op() {
        let s = sample();
        assert_eq!(s.add_autoconvolution_spectra(1, None, 1).unwrap(), s);
    }

    #[test]
    fn autoconvolution_can_rebin_output() {
        let s = sample();
        let coarse = EnergyGrid::from_range(0.0, 4.0, 2.0).unwrap();
        let rebinned = s.add_autoconvolution_spectra(2, Some(&coarse), 1).unwrap();
        assert_eq!(rebinned.grid(), &coarse);
        let first = rebinned.get(0, 1).unwrap();
        assert_eq!(first.shape(), (1, 2));
        assert!((first[(0, 0)] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn totals_sum_over_atoms_and_orders() {
        let s = sample();
        let total = s.total_spectrum().unwrap();
        assert!((total[(0, 1)] - 3.0).abs() < 1e-12);
        assert!((total[(0, 2)] - 0.5).abs() < 1e-9);
        let atom0 = s.atom_total(0).unwrap();
        assert!((atom0.sum() - 1.5).abs() < 1e-12);
        assert!(s.atom_total(7).is_none());
    }

    #[test]
    fn kinematic_constraints_mask_inaccessible_bins() {
        let maps = Instrument::from_parameters("MAPS", Some("100"), &default_instruments()).unwrap();
        let q = maps.q_points().unwrap();
        let grid = EnergyGrid::from_range(0.0, 1000.0, 100.0).unwrap();
        let spectrum = Spectrum::from_element(q.len(), grid.len(), 1.0);
        let data = BTreeMap::from([(0, BTreeMap::from([(1, spectrum)]))]);
        let mut s = SData::new(grid, 10.0, SampleForm::Powder, data).unwrap();
        s.apply_kinematic_constraints(&maps).unwrap();

        let masked = s.get(0, 1).unwrap();
        // 950 cm⁻¹ exceeds the 806.6 cm⁻¹ incident energy
        assert!(masked.column(9).iter().all(|v| v.is_nan()));
        // the lowest |Q| point is below Q(θ_min) at 50 cm⁻¹ transfer
        assert!(masked[(0, 0)].is_nan());
        let (lo, hi) = maps.q_limits(50.0).unwrap();
        let inside = q.iter().position(|&x| x >= lo && x <= hi).unwrap();
        assert_eq!(masked[(inside, 0)], 1.0);
    }

    #[test]
    fn kinematic_constraints_skip_one_dimensional_instruments() {
        let tosca = Instrument::from_parameters("TOSCA", None, &default_instruments()).unwrap();
        let mut s = sample();
        let before = s.clone();
        s.apply_kinematic_constraints(&tosca).unwrap();
        assert_eq!(s, before);
    }

    #[test]
    fn json_round_trip_revalidates() {
        let s = sample();
        let text = serde_json::to_string(&s).unwrap();
        let back: SData = serde_json::from_str(&text).unwrap();
        assert_eq!(back, s);
    }
}
