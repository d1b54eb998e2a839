use crate::core::constants::FUNDAMENTALS;
use crate::core::io::cache::{CacheAttributes, CacheError};
use crate::core::models::abins_data::AbinsData;
use crate::core::models::error::ValidationError;
use crate::core::models::powder::PowderData;
use crate::core::models::sdata::{SData, Spectrum};
use crate::core::spectra::broadening::{EnergyGrid, broaden};
use crate::core::spectra::frequencies::{CoefficientTable, FrequencyPowderGenerator};
use crate::core::spectra::instruments::InstrumentKind;
use crate::core::spectra::structure_factor::AtomTensors;
use crate::core::utils::parallel::map_in_pool;
use crate::engine::config::{CacheSettings, SCalculatorConfig};
use crate::engine::error::EngineError;
use crate::engine::powder::PowderCalculator;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::state::CalculatorState;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument, warn};

const S_DATA_GROUP: &str = "s_data";

/// Number of transitions produced and kept by pruning, summed over all tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionCounts {
    pub generated: usize,
    pub retained: usize,
}

#[derive(Debug)]
struct WorkUnit {
    atom: usize,
    kpoint: usize,
}

struct UnitOutcome {
    spectra: Vec<Spectrum>,
    counts: Vec<TransitionCounts>,
    worst_loss: f64,
}

type WorkResult = Result<(usize, UnitOutcome), EngineError>;

/// Computes powder-averaged S(Q, ω) per atom and quantum order for one instrument.
///
/// The calculator follows [`CalculatorState`]: a cache check first, then either a load
/// (truncated to the requested orders) or a full computation that is written back to the
/// cache. Cache problems never fail a run; they only force recomputation.
pub struct SPowderSemiEmpiricalCalculator<'a> {
    data: &'a AbinsData,
    config: SCalculatorConfig,
    grid: EnergyGrid,
    generator: FrequencyPowderGenerator,
    fingerprint: String,
    state: CalculatorState,
    from_cache: bool,
    transition_counts: BTreeMap<usize, TransitionCounts>,
}

impl<'a> SPowderSemiEmpiricalCalculator<'a> {
    pub fn new(data: &'a AbinsData, config: SCalculatorConfig) -> Result<Self, EngineError> {
        let grid = config.parameters.energy_grid()?;
        let fingerprint = config.parameters.fingerprint()?;
        let generator =
            FrequencyPowderGenerator::with_max_wavenumber(config.parameters.sampling.max_wavenumber);
        Ok(Self {
            data,
            config,
            grid,
            generator,
            fingerprint,
            state: CalculatorState::default(),
            from_cache: false,
            transition_counts: BTreeMap::new(),
        })
    }

    #[inline]
    pub fn state(&self) -> CalculatorState {
        self.state
    }

    #[inline]
    pub fn config(&self) -> &SCalculatorConfig {
        &self.config
    }

    /// Whether the last result was served from the cache.
    #[inline]
    pub fn is_from_cache(&self) -> bool {
        self.from_cache
    }

    /// Transition statistics of the last computation, keyed by quantum order. Empty after
    /// a cache hit.
    pub fn transition_counts(&self) -> &BTreeMap<usize, TransitionCounts> {
        &self.transition_counts
    }

    #[instrument(skip_all, name = "s_powder_calculation")]
    pub fn get_formatted_data(&mut self, reporter: &ProgressReporter) -> Result<SData, EngineError> {
        self.state.advance(CalculatorState::CacheCheck);
        self.from_cache = false;
        self.transition_counts.clear();

        if let Some(sdata) = self.load_from_cache() {
            self.state.advance(CalculatorState::Loaded);
            self.from_cache = true;
            self.state.advance(CalculatorState::Done);
            return Ok(sdata);
        }

        self.state.advance(CalculatorState::Computing);
        let powder = PowderCalculator::new(
            self.data,
            &self.config.parameters,
            self.config.cache.clone(),
        )?
        .get_formatted_data(reporter)?;

        let (mut sdata, counts) = self.calculate(&powder, reporter)?;
        self.transition_counts = counts;

        if self.config.autoconvolution {
            reporter.report(Progress::PhaseStart {
                name: "Autoconvolution",
            });
            sdata = sdata.add_autoconvolution_spectra(
                self.config.target_orders(),
                None,
                self.config.parameters.performance.threads,
            )?;
            reporter.report(Progress::PhaseFinish);
        }

        self.save_to_cache(&sdata);
        self.state.advance(CalculatorState::Done);
        Ok(sdata)
    }

    fn attributes(&self, settings: &CacheSettings) -> CacheAttributes {
        CacheAttributes::new(settings.input_hash.clone(), self.fingerprint.clone())
            .with_instrument(self.config.instrument.label())
            .with_autoconvolution(self.config.autoconvolution)
            .with_temperature(self.config.temperature)
            .with_sample_form(self.config.sample_form.to_string())
    }

    fn load_from_cache(&self) -> Option<SData> {
        let settings = self.config.cache.as_ref()?;
        let target = self.config.target_orders();
        let loaded = settings
            .cache()
            .load::<SData>(S_DATA_GROUP, &self.attributes(settings))
            .and_then(|sdata| {
                if sdata.order_count() < target {
                    Err(CacheError::Inconsistent {
                        field: "order_count",
                        cached: sdata.order_count().to_string(),
                        expected: target.to_string(),
                    })
                } else {
                    Ok(sdata)
                }
            });

        match loaded.map(|sdata| sdata.extract_orders(target)) {
            Ok(Ok(sdata)) => {
                info!(orders = target, "Loaded S data from cache.");
                Some(sdata)
            }
            Ok(Err(e)) => {
                debug!("Cached S data is unusable: {e}");
                None
            }
            Err(e) => {
                info!("S data cache miss, recomputing: {e}");
                None
            }
        }
    }

    fn save_to_cache(&self, sdata: &SData) {
        let Some(settings) = &self.config.cache else {
            return;
        };
        if let Err(e) = settings
            .cache()
            .save(S_DATA_GROUP, &self.attributes(settings), sdata)
        {
            warn!("Failed to cache S data: {e}");
        }
    }

    fn calculate(
        &self,
        powder: &PowderData,
        reporter: &ProgressReporter,
    ) -> Result<(SData, BTreeMap<usize, TransitionCounts>), EngineError> {
        reporter.report(Progress::PhaseStart {
            name: "Structure factor",
        });
        let work_list = build_work_list(powder);
        info!(
            tasks = work_list.len(),
            orders = self.config.quantum_order,
            instrument = %self.config.instrument.label(),
            "Computing S for every atom and k-point."
        );
        reporter.report(Progress::TaskStart {
            total_steps: work_list.len() as u64,
        });

        let threads = self.config.parameters.performance.threads;
        let results: Vec<WorkResult> = map_in_pool(threads, &work_list, |unit| {
            let result = self.compute_unit(unit, powder);
            reporter.report(Progress::TaskIncrement);
            result
        });
        reporter.report(Progress::TaskFinish);

        let mut data: BTreeMap<usize, BTreeMap<usize, Spectrum>> = BTreeMap::new();
        let mut counts: BTreeMap<usize, TransitionCounts> = BTreeMap::new();
        let mut worst_loss = 0.0_f64;
        for result in results {
            let (atom, outcome) = result?;
            let per_order = data.entry(atom).or_default();
            for (index, spectrum) in outcome.spectra.into_iter().enumerate() {
                let order = index + FUNDAMENTALS;
                match per_order.get_mut(&order) {
                    Some(total) => *total += spectrum,
                    None => {
                        per_order.insert(order, spectrum);
                    }
                }
            }
            for (index, c) in outcome.counts.into_iter().enumerate() {
                let entry = counts.entry(index + FUNDAMENTALS).or_default();
                entry.generated += c.generated;
                entry.retained += c.retained;
            }
            worst_loss = worst_loss.max(outcome.worst_loss);
        }

        if worst_loss > self.config.parameters.sampling.max_signal_loss {
            warn!(
                lost_fraction = worst_loss,
                "Pruning discarded a significant share of the signal; consider lowering \
                 s-absolute-threshold or raising min-retained-transitions."
            );
        }

        let sdata = SData::new(
            self.grid.clone(),
            self.config.temperature,
            self.config.sample_form,
            data,
        )?;
        reporter.report(Progress::PhaseFinish);
        Ok((sdata, counts))
    }

    fn compute_unit(&self, unit: &WorkUnit, powder: &PowderData) -> WorkResult {
        let missing = |what: &str| EngineError::Computation {
            stage: "powder tensors",
            message: format!(
                "no {what} for atom {} at k-point {}",
                unit.atom, unit.kpoint
            ),
        };
        let a_tensor = powder
            .a_tensor(unit.kpoint, unit.atom)
            .ok_or_else(|| missing("a-tensor"))?;
        let b_tensors = powder
            .b_tensors(unit.kpoint, unit.atom)
            .ok_or_else(|| missing("b-tensors"))?;
        let frequencies = powder
            .frequencies(unit.kpoint)
            .ok_or_else(|| missing("frequencies"))?;
        let weight = self
            .data
            .get_kpoints_data()
            .get(unit.kpoint)
            .map(|k| k.weight())
            .ok_or_else(|| missing("k-point weight"))?;

        let tensors = AtomTensors::new(a_tensor, b_tensors, frequencies, self.config.temperature)?;
        let orders = self.config.quantum_order;
        let instrument = &self.config.instrument;
        let points = instrument.sample_points();

        let mut expansion = TransitionExpansion {
            calculator: self,
            tensors: &tensors,
            fundamentals: frequencies,
            spectra: vec![Spectrum::zeros(points, self.grid.len()); orders],
            counts: vec![TransitionCounts::default(); orders],
            worst_loss: 0.0,
        };
        expansion.run()?;

        let spectra = expansion
            .spectra
            .into_iter()
            .map(|s| {
                let s = s * weight;
                match instrument.kind() {
                    InstrumentKind::OneDimensional => {
                        let mean = s.row_mean();
                        Spectrum::from_row_slice(1, mean.len(), mean.as_slice())
                    }
                    InstrumentKind::TwoDimensional => s,
                }
            })
            .collect();

        Ok((
            unit.atom,
            UnitOutcome {
                spectra,
                counts: expansion.counts,
                worst_loss: expansion.worst_loss,
            },
        ))
    }
}

fn build_work_list(powder: &PowderData) -> Vec<WorkUnit> {
    (0..powder.num_atoms())
        .flat_map(|atom| (0..powder.num_kpoints()).map(move |kpoint| WorkUnit { atom, kpoint }))
        .collect()
}

/// Order-by-order generation of the transitions of one atom at one k-point.
///
/// Each order is generated in full (in chunks of fundamentals), reduced to distinct
/// mode multisets, evaluated and pruned once. Only the pruned set seeds the next order.
struct TransitionExpansion<'c, 't> {
    calculator: &'c SPowderSemiEmpiricalCalculator<'c>,
    tensors: &'t AtomTensors<'t>,
    fundamentals: &'t [f64],
    spectra: Vec<Spectrum>,
    counts: Vec<TransitionCounts>,
    worst_loss: f64,
}

impl TransitionExpansion<'_, '_> {
    fn run(&mut self) -> Result<(), EngineError> {
        let n = self.fundamentals.len();
        if n == 0 {
            return Ok(());
        }
        let orders = self.calculator.config.quantum_order;

        let mut previous: Option<(Vec<f64>, CoefficientTable)> = None;
        for order in FUNDAMENTALS..=orders {
            let (freqs, coeffs) = match previous.take() {
                None => (self.fundamentals.to_vec(), CoefficientTable::identity(n)),
                Some((prev_freqs, prev_coeffs)) => {
                    self.combine(order, &prev_freqs, &prev_coeffs)?
                }
            };
            let kept = self.process(order, &freqs, &coeffs)?;
            if order < orders {
                self.worst_loss = self.worst_loss.max(kept.lost_fraction);
                let next_freqs = kept.indices.iter().map(|&i| freqs[i]).collect();
                previous = Some((next_freqs, coeffs.select(&kept.indices)));
            }
        }
        Ok(())
    }

    /// All distinct transitions of `order` reachable from the retained transitions of
    /// the previous order.
    fn combine(
        &self,
        order: usize,
        previous_freqs: &[f64],
        previous_coeffs: &CoefficientTable,
    ) -> Result<(Vec<f64>, CoefficientTable), EngineError> {
        let generator = &self.calculator.generator;
        let n = self.fundamentals.len();
        let chunk = self.chunk_size(previous_freqs.len(), order);

        let mut rows = BTreeSet::new();
        for start in (0..n).step_by(chunk) {
            let end = (start + chunk).min(n);
            let chunk_coeffs = CoefficientTable::from_flat(1, (start..end).collect())
                .map_err(combination_error)?;
            let (_, coeffs) = generator
                .construct_freq_combinations(
                    previous_freqs,
                    previous_coeffs,
                    &self.fundamentals[start..end],
                    &chunk_coeffs,
                    order,
                )
                .map_err(combination_error)?;
            insert_canonical_rows(&mut rows, &coeffs);
        }
        canonical_transitions(self.fundamentals, rows, order).map_err(combination_error)
    }

    /// Fundamentals per chunk when combining `previous` transitions at `order`.
    fn chunk_size(&self, previous: usize, order: usize) -> usize {
        let n = self.fundamentals.len();
        let performance = &self.calculator.config.parameters.performance;
        if previous.saturating_mul(n) <= performance.optimal_size {
            return n;
        }
        let depth = self.calculator.config.quantum_order.saturating_sub(order) as u32;
        let shrink = performance.chunk_shrink_factor.max(1).saturating_pow(depth);
        let size = (performance.optimal_size / previous.saturating_mul(shrink).max(1)).max(1);
        debug!(order, previous, chunk = size, "Splitting fundamentals into chunks.");
        size.min(n)
    }

    /// Adds the broadened S of every transition to the order's spectrum and prunes the
    /// transitions on their angle-averaged S.
    fn process(
        &mut self,
        order: usize,
        freqs: &[f64],
        coeffs: &CoefficientTable,
    ) -> Result<PruneOutcome, EngineError> {
        let slot = order - FUNDAMENTALS;
        self.counts[slot].generated += freqs.len();

        let calculator = self.calculator;
        let instrument = &calculator.config.instrument;
        let sampling = &calculator.config.parameters.sampling;
        let points = instrument.sample_points();

        let mut mean_s = vec![0.0; freqs.len()];
        if !freqs.is_empty() {
            let mut local = Spectrum::zeros(points, calculator.grid.len());
            for point in 0..points {
                let s = freqs
                    .iter()
                    .zip(coeffs.rows())
                    .map(|(&f, row)| self.tensors.discrete_s(row, instrument.q2(point, f)))
                    .collect::<Result<Vec<f64>, _>>()?;
                for (mean, value) in mean_s.iter_mut().zip(&s) {
                    *mean += value / points as f64;
                }
                let binned = broaden(
                    freqs,
                    &s,
                    |f| instrument.resolution_sigma(f),
                    &calculator.grid,
                    sampling.broadening,
                );
                for (bin, value) in binned.into_iter().enumerate() {
                    local[(point, bin)] += value;
                }
            }
            self.spectra[slot] += local;
        }

        let kept = prune_transitions(
            &mean_s,
            sampling.s_absolute_threshold,
            sampling.min_retained_transitions,
        );
        self.counts[slot].retained += kept.indices.len();
        Ok(kept)
    }
}

fn combination_error(e: impl std::fmt::Display) -> EngineError {
    EngineError::Computation {
        stage: "frequency combinations",
        message: e.to_string(),
    }
}

/// Adds every row of `coeffs` to `rows` with its mode indices sorted, so permutations of
/// one mode multiset collapse into a single entry.
pub(crate) fn insert_canonical_rows(rows: &mut BTreeSet<Vec<usize>>, coeffs: &CoefficientTable) {
    for row in coeffs.rows() {
        let mut row = row.to_vec();
        row.sort_unstable();
        rows.insert(row);
    }
}

/// Builds the transitions of the given sorted mode multisets. Each frequency is the sum
/// of its fundamentals in ascending mode order.
pub(crate) fn canonical_transitions(
    fundamentals: &[f64],
    rows: BTreeSet<Vec<usize>>,
    width: usize,
) -> Result<(Vec<f64>, CoefficientTable), ValidationError> {
    let mut freqs: Vec<f64> = Vec::with_capacity(rows.len());
    let mut data = Vec::with_capacity(rows.len() * width);
    for row in rows {
        freqs.push(row.iter().map(|&mode| fundamentals[mode]).sum());
        data.extend(row);
    }
    Ok((freqs, CoefficientTable::from_flat(width, data)?))
}

#[derive(Debug, PartialEq)]
pub(crate) struct PruneOutcome {
    /// Indices of the kept transitions, ascending.
    pub indices: Vec<usize>,
    /// Share of the summed S carried by the dropped transitions.
    pub lost_fraction: f64,
}

/// Keeps transitions whose S exceeds `threshold`, or the `min_retained` largest when
/// fewer clear it.
pub(crate) fn prune_transitions(values: &[f64], threshold: f64, min_retained: usize) -> PruneOutcome {
    let floor = min_retained.min(values.len());
    let mut indices: Vec<usize> = (0..values.len()).filter(|&i| values[i] > threshold).collect();
    if indices.len() < floor {
        let mut ranked: Vec<usize> = (0..values.len()).collect();
        ranked.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
        ranked.truncate(floor);
        ranked.sort_unstable();
        indices = ranked;
    }

    let total: f64 = values.iter().sum();
    let kept: f64 = indices.iter().map(|&i| values[i]).sum();
    let lost_fraction = if total > 0.0 {
        ((total - kept) / total).max(0.0)
    } else {
        0.0
    };
    PruneOutcome {
        indices,
        lost_fraction,
    }
}
