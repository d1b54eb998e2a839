use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author = "INSCAT Developers",
    version,
    about = "INSCAT CLI - Simulate inelastic neutron scattering spectra of powders from ab-initio phonon data.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Number of worker threads, overriding `performance.threads` from the parameter file
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compute S(Q, ω) for one instrument setting and write the spectra as CSV.
    Simulate(SimulateArgs),
    /// Print the default parameter file.
    Params(ParamsArgs),
}

/// Arguments for the `simulate` subcommand.
#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Path to the vibrational input document (JSON).
    #[arg(short, long, required = true, value_name = "PATH")]
    pub input: PathBuf,

    /// Instrument name, e.g. TOSCA or MAPS.
    #[arg(long, required = true, value_name = "NAME")]
    pub instrument: String,

    /// Instrument setting; the instrument's default setting when omitted.
    #[arg(long, value_name = "NAME")]
    pub setting: Option<String>,

    /// Sample temperature in Kelvin.
    #[arg(short, long, required = true, value_name = "K")]
    pub temperature: f64,

    /// Number of quantum orders computed explicitly (1-4).
    #[arg(long, default_value_t = 1, value_name = "N")]
    pub orders: usize,

    /// Extend the spectrum to higher orders by autoconvolution.
    #[arg(long)]
    pub autoconvolution: bool,

    /// Parameter file in TOML format; built-in defaults fill any missing value.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory of the result cache. Caching is disabled when omitted.
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Output CSV file.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub output: PathBuf,
}

/// Arguments for the `params` subcommand.
#[derive(Args, Debug)]
pub struct ParamsArgs {
    /// Write the parameters to a file instead of standard output.
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulate_arguments_parse() {
        let cli = Cli::try_parse_from([
            "inscat",
            "-vv",
            "simulate",
            "--input",
            "benzene.json",
            "--instrument",
            "TOSCA",
            "--setting",
            "Forward (TOSCA)",
            "--temperature",
            "10",
            "--orders",
            "3",
            "--autoconvolution",
            "--output",
            "out.csv",
            "-j",
            "4",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.threads, Some(4));
        let Commands::Simulate(args) = cli.command else {
            panic!("expected the simulate command");
        };
        assert_eq!(args.instrument, "TOSCA");
        assert_eq!(args.setting.as_deref(), Some("Forward (TOSCA)"));
        assert_eq!(args.orders, 3);
        assert!(args.autoconvolution);
        assert!(args.cache_dir.is_none());
    }

    #[test]
    fn simulate_requires_input_and_output() {
        assert!(
            Cli::try_parse_from(["inscat", "simulate", "--instrument", "TOSCA", "-t", "5"])
                .is_err()
        );
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["inscat", "-q", "-v", "params"]).is_err());
    }
}
