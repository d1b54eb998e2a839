use crate::core::models::abins_data::AbinsData;
use crate::core::models::sdata::SData;
use crate::core::spectra::instruments::InstrumentKind;
use crate::engine::config::SCalculatorConfig;
use crate::engine::error::EngineError;
use crate::engine::progress::ProgressReporter;
use crate::engine::spowder::{SPowderSemiEmpiricalCalculator, TransitionCounts};
use std::collections::BTreeMap;
use tracing::{info, instrument};

#[derive(Debug, Clone)]
pub struct SimulationResult {
    /// Per-atom, per-order spectra; inaccessible (|Q|, E) bins of 2-D instruments are NaN.
    pub sdata: SData,
    /// (atom, order) pairs whose intensity is below the significance threshold.
    pub weak_spectra: Vec<(usize, usize)>,
    pub from_cache: bool,
    pub transition_counts: BTreeMap<usize, TransitionCounts>,
}

#[instrument(skip_all, name = "simulation_workflow")]
pub fn run(
    data: &AbinsData,
    config: SCalculatorConfig,
    reporter: &ProgressReporter,
) -> Result<SimulationResult, EngineError> {
    info!(
        instrument = %config.instrument.label(),
        temperature = config.temperature,
        orders = config.quantum_order,
        autoconvolution = config.autoconvolution,
        "Starting simulation."
    );
    let sampling = config.parameters.sampling.clone();
    let instrument = config.instrument.clone();

    let mut calculator = SPowderSemiEmpiricalCalculator::new(data, config)?;
    let mut sdata = calculator.get_formatted_data(reporter)?;

    let weak_spectra = reporter.phase("Diagnostics", || {
        let weak =
            sdata.check_thresholds(sampling.s_absolute_threshold, sampling.s_relative_threshold);
        if instrument.kind() == InstrumentKind::TwoDimensional {
            sdata.apply_kinematic_constraints(&instrument)?;
        }
        Ok::<_, EngineError>(weak)
    })?;
    if calculator.is_from_cache() {
        reporter.message("Spectra loaded from cache");
    }

    info!(
        atoms = sdata.num_atoms(),
        orders = sdata.order_count(),
        weak = weak_spectra.len(),
        "Simulation complete."
    );
    Ok(SimulationResult {
        sdata,
        weak_spectra,
        from_cache: calculator.is_from_cache(),
        transition_counts: calculator.transition_counts().clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::atoms::{Atom, AtomsData};
    use crate::core::models::kpoints::{KpointsData, RawKpoint};
    use crate::core::spectra::broadening::BroadeningScheme;
    use crate::engine::config::{CacheSettings, Parameters, SCalculatorConfigBuilder};
    use num_complex::Complex64;
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn sample() -> AbinsData {
        let atoms = AtomsData::new(vec![
            Atom::new("O", 15.999, 0, [0.0; 3]),
            Atom::new("H", 1.008, 1, [0.96, 0.0, 0.0]),
        ])
        .unwrap();
        let u = |x: f64| [Complex64::new(x, 0.0), Complex64::new(0.5 * x, 0.0), Complex64::new(0.0, 0.1 * x)];
        let kpoints = KpointsData::new(
            [[8.0, 0.0, 0.0], [0.0, 8.0, 0.0], [0.0, 0.0, 8.0]],
            vec![RawKpoint {
                weight: 1.0,
                k_vector: [0.0; 3],
                frequencies: vec![3.0, 1600.0, 3650.0],
                atomic_displacements: vec![
                    vec![u(0.01), u(0.02), u(0.01)],
                    vec![u(0.1), u(0.25), u(0.2)],
                ],
            }],
        )
        .unwrap();
        AbinsData::new(atoms, kpoints).unwrap()
    }

    fn parameters() -> Parameters {
        let mut parameters = Parameters::default();
        parameters.sampling.bin_width = 4.0;
        parameters
    }

    #[test]
    fn indirect_instrument_yields_finite_angle_averaged_spectra() {
        let data = sample();
        let config = SCalculatorConfigBuilder::new()
            .instrument("TOSCA")
            .temperature(10.0)
            .quantum_order(2)
            .parameters(parameters())
            .build()
            .unwrap();
        let events = Mutex::new(0usize);
        let reporter = ProgressReporter::with_callback(Box::new(|_| {
            *events.lock().unwrap() += 1;
        }));
        let result = run(&data, config, &reporter).unwrap();
        drop(reporter);

        assert!(*events.lock().unwrap() > 0);
        assert!(!result.from_cache);
        assert_eq!(result.sdata.num_atoms(), 2);
        assert_eq!(result.sdata.sample_points(), 1);
        let total = result.sdata.total_spectrum().unwrap();
        assert!(total.iter().all(|v| v.is_finite()));
        // the 1600 cm⁻¹ hydrogen mode dominates the spectrum
        let (peak, _) = total
            .row(0)
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap();
        let centre = result.sdata.frequencies()[peak];
        assert!((centre - 1600.0).abs() < 8.0, "peak at {centre}");
    }

    #[test]
    fn direct_instrument_masks_inaccessible_region() {
        let data = sample();
        let config = SCalculatorConfigBuilder::new()
            .instrument("MAPS")
            .setting("100")
            .temperature(10.0)
            .quantum_order(1)
            .parameters(parameters())
            .build()
            .unwrap();
        let result = run(&data, config, &ProgressReporter::new()).unwrap();
        let spectrum = result.sdata.get(1, 1).unwrap();
        let last = spectrum.ncols() - 1;
        // 4100 cm⁻¹ exceeds the 806 cm⁻¹ incident energy
        assert!(spectrum.column(last).iter().all(|v| v.is_nan()));
        assert!(spectrum.iter().any(|v| v.is_finite()));
    }

    #[test]
    fn weak_spectra_are_reported() {
        let data = sample();
        let mut parameters = parameters();
        parameters.sampling.broadening = BroadeningScheme::None;
        parameters.sampling.s_absolute_threshold = 1e6;
        let config = SCalculatorConfigBuilder::new()
            .instrument("TOSCA")
            .temperature(0.0)
            .quantum_order(1)
            .parameters(parameters)
            .build()
            .unwrap();
        let result = run(&data, config, &ProgressReporter::new()).unwrap();
        assert_eq!(result.weak_spectra, vec![(0, 1), (1, 1)]);
    }

    #[test]
    fn second_run_is_served_from_cache() {
        let dir = tempdir().unwrap();
        let data = sample();
        let build = || {
            SCalculatorConfigBuilder::new()
                .instrument("TOSCA")
                .temperature(50.0)
                .quantum_order(1)
                .parameters(parameters())
                .cache(CacheSettings {
                    directory: dir.path().join("cache"),
                    input_name: "water".to_string(),
                    input_hash: "0123".to_string(),
                })
                .build()
                .unwrap()
        };
        let first = run(&data, build(), &ProgressReporter::new()).unwrap();
        let second = run(&data, build(), &ProgressReporter::new()).unwrap();
        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(first.sdata, second.sdata);
        assert!(second.transition_counts.is_empty());
    }
}
