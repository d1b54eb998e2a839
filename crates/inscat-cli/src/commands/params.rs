use crate::cli::ParamsArgs;
use crate::error::{CliError, Result};
use inscat::engine::config::Parameters;
use std::fs;
use tracing::info;

pub fn run(args: ParamsArgs) -> Result<()> {
    let content = Parameters::default()
        .to_toml_string()
        .map_err(|e| CliError::Config(e.to_string()))?;

    match args.output {
        Some(path) => {
            fs::write(&path, content)?;
            info!(path = %path.display(), "Default parameters written.");
        }
        None => print!("{content}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn written_defaults_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inscat.toml");
        run(ParamsArgs {
            output: Some(path.clone()),
        })
        .unwrap();

        let loaded = Parameters::from_file(&path).unwrap();
        assert_eq!(loaded, Parameters::default());
    }
}
