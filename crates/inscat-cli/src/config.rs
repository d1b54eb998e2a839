use crate::cli::SimulateArgs;
use crate::error::{CliError, Result};
use inscat::core::io::cache::hash_file;
use inscat::engine::config::{CacheSettings, Parameters, SCalculatorConfig, SCalculatorConfigBuilder};
use inscat::engine::error::EngineError;
use std::path::Path;
use tracing::debug;

/// Reads the parameter file, if any, and applies the command-line thread override.
pub fn load_parameters(path: Option<&Path>, threads: Option<usize>) -> Result<Parameters> {
    let mut parameters = match path {
        Some(path) => {
            debug!(path = %path.display(), "Loading parameter file.");
            Parameters::from_file(path).map_err(|e| CliError::FileParsing {
                path: path.to_path_buf(),
                source: anyhow::Error::new(e),
            })?
        }
        None => Parameters::default(),
    };

    if let Some(threads) = threads {
        if threads == 0 {
            return Err(CliError::Argument(
                "--threads must be at least 1".to_string(),
            ));
        }
        parameters.performance.threads = threads;
    }
    Ok(parameters)
}

/// Cache key for an input file: its file name plus a hash of its contents.
fn cache_settings(args: &SimulateArgs) -> Result<Option<CacheSettings>> {
    let Some(directory) = &args.cache_dir else {
        return Ok(None);
    };
    let input_name = args
        .input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| CliError::Argument(format!("'{}' is not a file", args.input.display())))?;
    let input_hash = hash_file(&args.input).map_err(|e| CliError::FileParsing {
        path: args.input.clone(),
        source: anyhow::Error::new(e),
    })?;
    Ok(Some(CacheSettings {
        directory: directory.clone(),
        input_name,
        input_hash,
    }))
}

pub fn build_config(args: &SimulateArgs, threads: Option<usize>) -> Result<SCalculatorConfig> {
    let parameters = load_parameters(args.config.as_deref(), threads)?;

    let mut builder = SCalculatorConfigBuilder::new()
        .instrument(&args.instrument)
        .temperature(args.temperature)
        .quantum_order(args.orders)
        .autoconvolution(args.autoconvolution)
        .parameters(parameters);
    if let Some(setting) = &args.setting {
        builder = builder.setting(setting);
    }
    if let Some(cache) = cache_settings(args)? {
        builder = builder.cache(cache);
    }

    let config = builder.build().map_err(EngineError::from)?;
    debug!("Final configuration: {:?}", config);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn args(input: PathBuf) -> SimulateArgs {
        SimulateArgs {
            input,
            instrument: "TOSCA".to_string(),
            setting: None,
            temperature: 10.0,
            orders: 2,
            autoconvolution: false,
            config: None,
            cache_dir: None,
            output: PathBuf::from("out.csv"),
        }
    }

    #[test]
    fn thread_override_replaces_file_value() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("params.toml");
        fs::write(&path, "[performance]\nthreads = 2\n").unwrap();

        assert_eq!(load_parameters(Some(&path), None).unwrap().performance.threads, 2);
        assert_eq!(
            load_parameters(Some(&path), Some(6)).unwrap().performance.threads,
            6
        );
    }

    #[test]
    fn zero_threads_is_rejected() {
        assert!(matches!(
            load_parameters(None, Some(0)),
            Err(CliError::Argument(_))
        ));
    }

    #[test]
    fn malformed_parameter_file_is_a_parsing_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("params.toml");
        fs::write(&path, "[sampling\nbin-width = ").unwrap();
        assert!(matches!(
            load_parameters(Some(&path), None),
            Err(CliError::FileParsing { .. })
        ));
    }

    #[test]
    fn config_resolves_default_setting_without_cache() {
        let config = build_config(&args(PathBuf::from("water.json")), None).unwrap();
        assert_eq!(config.instrument.name(), "TOSCA");
        assert_eq!(config.quantum_order, 2);
        assert!(config.cache.is_none());
    }

    #[test]
    fn cache_key_uses_input_name_and_content_hash() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("water.json");
        fs::write(&input, "{}").unwrap();
        let mut args = args(input);
        args.cache_dir = Some(dir.path().join("cache"));

        let config = build_config(&args, Some(3)).unwrap();
        let cache = config.cache.unwrap();
        assert_eq!(cache.input_name, "water.json");
        assert_eq!(cache.input_hash.len(), 64);
        assert_eq!(config.parameters.performance.threads, 3);
    }

    #[test]
    fn unknown_instrument_is_an_engine_error() {
        let mut args = args(PathBuf::from("water.json"));
        args.instrument = "IRIS".to_string();
        assert!(matches!(build_config(&args, None), Err(CliError::Core(_))));
    }
}
