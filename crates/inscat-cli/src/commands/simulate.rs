use crate::cli::SimulateArgs;
use crate::config::build_config;
use crate::error::{CliError, Result};
use crate::output::write_spectra_to_path;
use crate::utils::progress::CliProgressHandler;
use inscat::core::io::document::load_json;
use inscat::engine::progress::ProgressReporter;
use inscat::workflows::simulate::{self, SimulationResult};
use tracing::{info, warn};

pub fn run(args: SimulateArgs, threads: Option<usize>) -> Result<()> {
    run_with_handler(args, threads, CliProgressHandler::new()).map(|_| ())
}

fn run_with_handler(
    args: SimulateArgs,
    threads: Option<usize>,
    handler: CliProgressHandler,
) -> Result<SimulationResult> {
    info!("Starting simulate command.");
    let config = build_config(&args, threads)?;
    let q_points = config.instrument.q_points().map(<[f64]>::to_vec);

    info!(path = %args.input.display(), "Loading vibrational data.");
    let data = load_json(&args.input).map_err(|e| CliError::FileParsing {
        path: args.input.clone(),
        source: anyhow::Error::new(e),
    })?;

    let reporter = ProgressReporter::with_callback(handler.get_callback());
    let result = simulate::run(&data, config, &reporter)?;

    if result.from_cache {
        info!("Spectra were loaded from the cache.");
    }
    for (order, counts) in &result.transition_counts {
        info!(
            order,
            generated = counts.generated,
            retained = counts.retained,
            "Transition statistics."
        );
    }
    if !result.weak_spectra.is_empty() {
        warn!(
            count = result.weak_spectra.len(),
            "Some atom/order spectra are below the significance threshold."
        );
    }

    write_spectra_to_path(&args.output, &result.sdata, q_points.as_deref())?;
    info!(path = %args.output.display(), "Spectra written.");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use inscat::core::io::document::save_json;
    use inscat::core::models::abins_data::AbinsData;
    use inscat::core::models::atoms::{Atom, AtomsData};
    use inscat::core::models::kpoints::{KpointsData, RawKpoint};
    use num_complex::Complex64;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn write_sample(path: &Path) {
        let atoms = AtomsData::new(vec![
            Atom::new("O", 15.999, 0, [0.0; 3]),
            Atom::new("H", 1.008, 1, [0.96, 0.0, 0.0]),
        ])
        .unwrap();
        let u = |x: f64| {
            [
                Complex64::new(x, 0.0),
                Complex64::new(0.5 * x, 0.0),
                Complex64::new(0.0, 0.1 * x),
            ]
        };
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
        save_json(&AbinsData::new(atoms, kpoints).unwrap(), path).unwrap();
    }

    fn args(dir: &Path, instrument: &str, setting: Option<&str>) -> SimulateArgs {
        let params = dir.join("params.toml");
        fs::write(&params, "[sampling]\nbin-width = 4.0\n").unwrap();
        SimulateArgs {
            input: dir.join("water.json"),
            instrument: instrument.to_string(),
            setting: setting.map(str::to_string),
            temperature: 10.0,
            orders: 2,
            autoconvolution: false,
            config: Some(params),
            cache_dir: Some(dir.join("cache")),
            output: dir.join("spectrum.csv"),
        }
    }

    #[test]
    fn simulate_writes_csv_and_reuses_cache() {
        let dir = tempdir().unwrap();
        write_sample(&dir.path().join("water.json"));

        let first = run_with_handler(
            args(dir.path(), "TOSCA", None),
            Some(2),
            CliProgressHandler::hidden(),
        )
        .unwrap();
        assert!(!first.from_cache);

        let mut reader = csv::Reader::from_path(dir.path().join("spectrum.csv")).unwrap();
        let header = reader.headers().unwrap().clone();
        assert_eq!(&header[0], "energy");
        assert_eq!(header.len(), 2 + 2 * 2);
        assert_eq!(reader.records().count(), first.sdata.frequencies().len());

        let second = run_with_handler(
            args(dir.path(), "TOSCA", None),
            Some(1),
            CliProgressHandler::hidden(),
        )
        .unwrap();
        assert!(second.from_cache);
        assert_eq!(first.sdata, second.sdata);
    }

    #[test]
    fn direct_geometry_rows_carry_q() {
        let dir = tempdir().unwrap();
        write_sample(&dir.path().join("water.json"));
        let mut args = args(dir.path(), "MAPS", Some("100"));
        args.orders = 1;

        let result = run_with_handler(args, None, CliProgressHandler::hidden()).unwrap();
        let mut reader = csv::Reader::from_path(dir.path().join("spectrum.csv")).unwrap();
        assert_eq!(&reader.headers().unwrap()[0], "q");
        assert_eq!(
            reader.records().count(),
            result.sdata.sample_points() * result.sdata.frequencies().len()
        );
    }

    #[test]
    fn missing_input_is_reported_as_parsing_error() {
        let dir = tempdir().unwrap();
        let mut args = args(dir.path(), "TOSCA", None);
        args.cache_dir = None;
        let err = run_with_handler(args, None, CliProgressHandler::hidden()).unwrap_err();
        assert!(matches!(err, CliError::FileParsing { .. }));
    }
}
