use crate::core::constants::{MSD_CONSTANT, NUMERICAL_ZERO};
use crate::core::io::cache::CacheAttributes;
use crate::core::models::abins_data::AbinsData;
use crate::core::models::kpoints::{Displacement, KpointData};
use crate::core::models::powder::PowderData;
use crate::core::utils::parallel::map_in_pool;
use crate::engine::config::{CacheSettings, Parameters};
use crate::engine::error::EngineError;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::state::CalculatorState;
use nalgebra::Matrix3;
use tracing::{debug, info, instrument, warn};

const POWDER_GROUP: &str = "powder_data";

/// Per-atom a-tensors, per-atom b-tensors and the retained frequencies of one k-point.
type KpointTensors = (Vec<Matrix3<f64>>, Vec<Vec<Matrix3<f64>>>, Vec<f64>);

/// Computes mean-square displacement tensors from k-point eigenvectors.
pub struct PowderCalculator<'a> {
    data: &'a AbinsData,
    threads: usize,
    acoustic_threshold: f64,
    fingerprint: String,
    cache: Option<CacheSettings>,
    state: CalculatorState,
}

impl<'a> PowderCalculator<'a> {
    pub fn new(
        data: &'a AbinsData,
        parameters: &Parameters,
        cache: Option<CacheSettings>,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            data,
            threads: parameters.performance.threads,
            acoustic_threshold: parameters.sampling.acoustic_threshold,
            fingerprint: parameters.fingerprint()?,
            cache,
            state: CalculatorState::default(),
        })
    }

    #[inline]
    pub fn state(&self) -> CalculatorState {
        self.state
    }

    /// Returns cached tensors when the cache matches the input, computing and caching
    /// them otherwise.
    #[instrument(skip_all, name = "powder_calculation")]
    pub fn get_formatted_data(
        &mut self,
        reporter: &ProgressReporter,
    ) -> Result<PowderData, EngineError> {
        self.state.advance(CalculatorState::CacheCheck);
        if let Some(cache) = &self.cache {
            match cache.cache().load::<PowderData>(POWDER_GROUP, &self.attributes(cache)) {
                Ok(data) if data.num_atoms() == self.data.get_atoms_data().len() => {
                    info!("Loaded powder tensors from cache.");
                    self.state.advance(CalculatorState::Loaded);
                    self.state.advance(CalculatorState::Done);
                    return Ok(data);
                }
                Ok(_) => debug!("Cached powder tensors describe a different structure."),
                Err(e) => debug!("Powder cache miss: {e}"),
            }
        }

        self.state.advance(CalculatorState::Computing);
        let powder = self.calculate_data(reporter)?;
        if let Some(cache) = &self.cache {
            if let Err(e) = cache
                .cache()
                .save(POWDER_GROUP, &self.attributes(cache), &powder)
            {
                warn!("Failed to cache powder tensors: {e}");
            }
        }
        self.state.advance(CalculatorState::Done);
        Ok(powder)
    }

    /// Computes the tensors of every k-point without touching the cache.
    pub fn calculate_data(&self, reporter: &ProgressReporter) -> Result<PowderData, EngineError> {
        reporter.report(Progress::PhaseStart {
            name: "Powder tensors",
        });
        let masses = self.data.get_atoms_data().masses();
        let kpoints: Vec<&KpointData> = self.data.get_kpoints_data().iter().collect();
        reporter.report(Progress::TaskStart {
            total_steps: kpoints.len() as u64,
        });

        let results: Vec<KpointTensors> = map_in_pool(self.threads, &kpoints, |kpoint| {
            let tensors = kpoint_tensors(kpoint, &masses, self.acoustic_threshold);
            reporter.report(Progress::TaskIncrement);
            tensors
        });
        reporter.report(Progress::TaskFinish);

        let mut a_tensors = Vec::with_capacity(results.len());
        let mut b_tensors = Vec::with_capacity(results.len());
        let mut frequencies = Vec::with_capacity(results.len());
        for (a, b, f) in results {
            a_tensors.push(a);
            b_tensors.push(b);
            frequencies.push(f);
        }

        let powder = PowderData::new(a_tensors, b_tensors, frequencies, Some(masses.len()))?;
        info!(
            kpoints = powder.num_kpoints(),
            atoms = powder.num_atoms(),
            "Powder tensors computed."
        );
        reporter.report(Progress::PhaseFinish);
        Ok(powder)
    }

    fn attributes(&self, cache: &CacheSettings) -> CacheAttributes {
        CacheAttributes::new(cache.input_hash.clone(), self.fingerprint.clone())
    }
}

/// `b[mode] = MSD_CONSTANT / (m ω) · Re(u uᴴ)` for every atom, with tiny entries clamped
/// to [`NUMERICAL_ZERO`], and `a = Σ_mode b`.
///
/// Modes at or below `acoustic_threshold` are skipped. The input data was already
/// filtered with its own threshold, so a lower value here has no effect.
fn kpoint_tensors(kpoint: &KpointData, masses: &[f64], acoustic_threshold: f64) -> KpointTensors {
    let retained: Vec<usize> = kpoint
        .frequencies()
        .iter()
        .enumerate()
        .filter(|&(_, &frequency)| frequency > acoustic_threshold)
        .map(|(mode, _)| mode)
        .collect();
    let frequencies: Vec<f64> = retained.iter().map(|&m| kpoint.frequencies()[m]).collect();
    let mut a_tensors = Vec::with_capacity(masses.len());
    let mut b_tensors = Vec::with_capacity(masses.len());

    for (atom, &mass) in masses.iter().enumerate() {
        let displacements = kpoint.displacements(atom).unwrap_or_default();
        let b: Vec<Matrix3<f64>> = retained
            .iter()
            .zip(&frequencies)
            .filter_map(|(&mode, &frequency)| {
                displacements
                    .get(mode)
                    .map(|u| mode_tensor(u, MSD_CONSTANT / (mass * frequency)))
            })
            .collect();
        a_tensors.push(b.iter().sum());
        b_tensors.push(b);
    }
    (a_tensors, b_tensors, frequencies)
}

fn mode_tensor(u: &Displacement, factor: f64) -> Matrix3<f64> {
    Matrix3::from_fn(|r, c| {
        let value = factor * (u[r] * u[c].conj()).re;
        if value.abs() < NUMERICAL_ZERO {
            NUMERICAL_ZERO
        } else {
            value
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::atoms::{Atom, AtomsData};
    use crate::core::models::kpoints::{KpointsData, RawKpoint};
    use crate::core::io::cache::StructuredCache;
    use num_complex::Complex64;
    use tempfile::tempdir;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    fn sample() -> AbinsData {
        let atoms = AtomsData::new(vec![
            Atom::new("H", 1.008, 0, [0.0; 3]),
            Atom::new("C", 12.011, 1, [1.1, 0.0, 0.0]),
        ])
        .unwrap();
        let kpoint = |weight: f64| RawKpoint {
            weight,
            k_vector: [0.0; 3],
            frequencies: vec![400.0, 1200.0],
            atomic_displacements: vec![
                vec![
                    [c(0.3, 0.1), c(0.0, 0.0), c(0.0, 0.0)],
                    [c(0.0, 0.0), c(0.2, 0.0), c(0.1, -0.1)],
                ],
                vec![
                    [c(0.05, 0.0), c(0.0, 0.0), c(0.0, 0.0)],
                    [c(0.0, 0.0), c(0.01, 0.0), c(0.0, 0.0)],
                ],
            ],
        };
        let kpoints = KpointsData::new(
            [[5.0, 0.0, 0.0], [0.0, 5.0, 0.0], [0.0, 0.0, 5.0]],
            vec![kpoint(0.5), kpoint(0.5)],
        )
        .unwrap();
        AbinsData::new(atoms, kpoints).unwrap()
    }

    #[test]
    fn b_tensor_follows_msd_formula() {
        let data = sample();
        let mut calculator = PowderCalculator::new(&data, &Parameters::default(), None).unwrap();
        let powder = calculator.get_formatted_data(&ProgressReporter::new()).unwrap();
        assert_eq!(calculator.state(), CalculatorState::Done);

        let b = &powder.b_tensors(0, 0).unwrap()[0];
        let factor = MSD_CONSTANT / (1.008 * 400.0);
        assert!((b[(0, 0)] - factor * (0.3 * 0.3 + 0.1 * 0.1)).abs() < 1e-12);
        // zero entries are clamped, never exactly zero
        assert_eq!(b[(1, 1)], NUMERICAL_ZERO);

        let b2 = &powder.b_tensors(0, 0).unwrap()[1];
        let factor2 = MSD_CONSTANT / (1.008 * 1200.0);
        // Re((0.2)(0.1 + 0.1i)) = 0.02
        assert!((b2[(1, 2)] - factor2 * 0.02).abs() < 1e-12);
        assert!((b2[(1, 2)] - b2[(2, 1)]).abs() < 1e-12);

        let a = powder.a_tensor(0, 0).unwrap();
        assert!((a - (b + b2)).abs().max() < 1e-12);
    }

    #[test]
    fn sampling_acoustic_threshold_removes_low_modes() {
        let data = sample();
        let mut parameters = Parameters::default();
        parameters.sampling.acoustic_threshold = 500.0;
        let powder = PowderCalculator::new(&data, &parameters, None)
            .unwrap()
            .calculate_data(&ProgressReporter::new())
            .unwrap();

        assert_eq!(powder.frequencies(0).unwrap(), &[1200.0]);
        let b = powder.b_tensors(0, 0).unwrap();
        assert_eq!(b.len(), 1);
        let factor = MSD_CONSTANT / (1.008 * 1200.0);
        assert!((b[0][(1, 1)] - factor * 0.04).abs() < 1e-12);
        assert!((powder.a_tensor(0, 0).unwrap() - b[0]).abs().max() < 1e-12);
    }

    #[test]
    fn parallel_and_sequential_results_match() {
        let data = sample();
        let mut parameters = Parameters::default();
        let sequential = PowderCalculator::new(&data, &parameters, None)
            .unwrap()
            .calculate_data(&ProgressReporter::new())
            .unwrap();
        parameters.performance.threads = 3;
        let parallel = PowderCalculator::new(&data, &parameters, None)
            .unwrap()
            .calculate_data(&ProgressReporter::new())
            .unwrap();
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn cached_tensors_are_reused_until_input_changes() {
        let dir = tempdir().unwrap();
        let data = sample();
        let settings = CacheSettings {
            directory: dir.path().to_path_buf(),
            input_name: "sample".to_string(),
            input_hash: "abc".to_string(),
        };

        let mut first =
            PowderCalculator::new(&data, &Parameters::default(), Some(settings.clone())).unwrap();
        let computed = first.get_formatted_data(&ProgressReporter::new()).unwrap();

        let mut second =
            PowderCalculator::new(&data, &Parameters::default(), Some(settings.clone())).unwrap();
        let loaded = second.get_formatted_data(&ProgressReporter::new()).unwrap();
        assert_eq!(loaded, computed);
        assert!(StructuredCache::for_input(dir.path(), "sample").path().exists());

        let changed = CacheSettings {
            input_hash: "def".to_string(),
            ..settings
        };
        let mut third = PowderCalculator::new(&data, &Parameters::default(), Some(changed)).unwrap();
        assert_eq!(third.get_formatted_data(&ProgressReporter::new()).unwrap(), computed);
    }
}
