//! BEARINGPF: bearing-only tracking with a sequential importance sampling particle filter.
//!
//! Subcommands:
//!
//! - `run`: triangulate a bearing series into a baseline, run the particle filter and write the
//!   baseline, posterior mean, weights and effective sample size as CSV files.
//! - `simulate`: write a synthetic straight-line scenario (bearings, truth and a matching
//!   configuration file) to try the filter on.
//! - `init-config`: write the default configuration (TOML/JSON/YAML by extension).
//!
//! A run can be configured entirely from a configuration file, entirely from flags, or from a
//! file with individual flags overriding it.

mod common;

use std::error::Error;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};

use bearingpf::config::RunConfig;
use bearingpf::sim::{
    StraightLineScenario, read_measurements, write_matrix_csv, write_vector_csv,
};
use bearingpf::triangulation::triangulate;
use bearingpf::{BearingsModel, ParticleFilter, ParticleResamplingStrategy, ProcessMeanMode};
use common::{LogLevel, ensure_parent_dir, init_logger, validate_input_file};

const LONG_ABOUT: &str = "BEARINGPF: bearing-only tracking with a sequential importance sampling particle filter.

Two fixed sensors report the bearing to a moving object at every time step. The bearings are first
triangulated into a rough baseline trajectory, which centers the importance proposal of the particle
filter. The filter then estimates the position and velocity of the object at every step.

Measurement files hold one row per step with the two bearings in radians, separated by whitespace or
commas. Lines starting with '#' are ignored.";

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about = "Bearing-only tracking with a particle filter.", long_about = LONG_ABOUT)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level; RUST_LOG refines it per module
    #[arg(long, value_enum, default_value_t = LogLevel::Info, global = true)]
    log_level: LogLevel,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Clone)]
enum Command {
    #[command(about = "Run the particle filter on a bearing series")]
    Run(RunArgs),
    #[command(about = "Generate a synthetic straight-line scenario")]
    Simulate(SimulateArgs),
    #[command(name = "init-config", about = "Write the default configuration file")]
    InitConfig(InitConfigArgs),
}

#[derive(Args, Clone, Debug)]
struct RunArgs {
    /// Configuration file (TOML/JSON/YAML); flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Measurement file with two bearing columns
    #[arg(short, long)]
    measurements: Option<PathBuf>,

    /// Output directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of particles
    #[arg(short = 'n', long)]
    particles: Option<usize>,

    /// RNG seed
    #[arg(long)]
    seed: Option<u64>,

    /// Resampling strategy
    #[arg(long, value_enum)]
    resampling: Option<ParticleResamplingStrategy>,

    /// Resample when ESS drops below this fraction of the particle count
    #[arg(long)]
    threshold: Option<f64>,

    /// Center of the process density
    #[arg(long, value_enum)]
    process_mean: Option<ProcessMeanMode>,
}

#[derive(Args, Clone, Debug)]
struct SimulateArgs {
    /// Output directory for measurements.csv, truth.csv and config.toml
    #[arg(short, long, default_value = "simulation")]
    output: PathBuf,

    /// Number of measurement steps
    #[arg(long, default_value_t = 10)]
    steps: usize,

    /// Noise seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Bearing noise standard deviation (radians)
    #[arg(long, default_value_t = 0.01)]
    measurement_std: f64,
}

#[derive(Args, Clone, Debug)]
struct InitConfigArgs {
    /// Where to write the configuration; the extension selects the format
    #[arg(default_value = "bearingpf.toml")]
    output: PathBuf,
}

/// Merge the configuration file (if any) with command line overrides.
fn resolve_run_config(args: &RunArgs) -> Result<RunConfig, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => {
            validate_input_file(path)?;
            info!("Loading configuration from {}", path.display());
            RunConfig::from_file(path)?
        }
        None => RunConfig::default(),
    };
    if let Some(measurements) = &args.measurements {
        config.measurements = Some(measurements.clone());
    }
    if let Some(output) = &args.output {
        config.output_dir = output.clone();
    }
    if let Some(particles) = args.particles {
        config.filter.num_particles = particles;
    }
    if let Some(seed) = args.seed {
        config.filter.seed = Some(seed);
    }
    if let Some(strategy) = args.resampling {
        config.filter.resampling_strategy = strategy;
    }
    if let Some(threshold) = args.threshold {
        config.filter.effective_sample_threshold = threshold;
    }
    if let Some(mode) = args.process_mean {
        config.model.process_mean = mode;
    }
    Ok(config)
}

fn run_filter(args: &RunArgs) -> Result<(), Box<dyn Error>> {
    let config = resolve_run_config(args)?;
    let measurements_path = config
        .measurements
        .clone()
        .ok_or("no measurement file given; use --measurements or set it in the configuration")?;
    validate_input_file(&measurements_path)?;

    let measurements = read_measurements(&measurements_path)?;
    info!(
        "Read {} bearing pairs from {}",
        measurements.nrows(),
        measurements_path.display()
    );

    let baseline = triangulate(&measurements, &config.model.sensor_1, &config.model.sensor_2)?;
    let model = BearingsModel::new(config.model.clone(), baseline)?;
    let filter = ParticleFilter::new(model, config.filter.clone())?;
    let output = filter.run(&measurements)?;

    std::fs::create_dir_all(&config.output_dir)?;
    let dir = &config.output_dir;
    write_matrix_csv(filter.model().baseline(), dir.join("baseline.csv"))?;
    write_matrix_csv(&output.posterior_mean, dir.join("posterior_mean.csv"))?;
    write_matrix_csv(&output.weights, dir.join("weights.csv"))?;
    write_vector_csv(&output.ess, dir.join("ess.csv"))?;
    info!("Results written to {}", dir.display());

    let min_ess = output.min_ess();
    let num_particles = filter.config().num_particles;
    if min_ess < 0.1 * num_particles as f64 {
        warn!(
            "Minimum ESS {:.2} is below 10% of {} particles; consider resampling or a wider proposal",
            min_ess, num_particles
        );
    }
    Ok(())
}

fn simulate(args: &SimulateArgs) -> Result<(), Box<dyn Error>> {
    let scenario = StraightLineScenario {
        steps: args.steps,
        seed: args.seed,
        measurement_std: args.measurement_std,
        ..StraightLineScenario::default()
    };
    std::fs::create_dir_all(&args.output)?;
    let measurements_path = args.output.join("measurements.csv");
    write_matrix_csv(&scenario.noisy_bearings(), &measurements_path)?;
    write_matrix_csv(&scenario.truth(), args.output.join("truth.csv"))?;

    let config = RunConfig {
        measurements: Some(measurements_path),
        output_dir: args.output.join("results"),
        model: scenario.model_config(),
        ..RunConfig::default()
    };
    let config_path = args.output.join("config.toml");
    config.to_file(&config_path)?;
    info!(
        "Wrote {}-step scenario to {}; run it with `bearingpf run --config {}`",
        args.steps,
        args.output.display(),
        config_path.display()
    );
    Ok(())
}

fn init_config(args: &InitConfigArgs) -> Result<(), Box<dyn Error>> {
    ensure_parent_dir(&args.output)?;
    RunConfig::default().to_file(&args.output)?;
    info!("Default configuration written to {}", args.output.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logger(cli.log_level, cli.log_file.as_deref())?;

    let result = match &cli.command {
        Command::Run(args) => run_filter(args),
        Command::Simulate(args) => simulate(args),
        Command::InitConfig(args) => init_config(args),
    };
    if let Err(e) = &result {
        error!("{}", e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_args_parse() {
        let cli = Cli::try_parse_from([
            "bearingpf",
            "run",
            "--measurements",
            "bearings.txt",
            "-n",
            "500",
            "--resampling",
            "systematic",
            "--process-mean",
            "constant-velocity",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.log_level, LogLevel::Debug);
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.particles, Some(500));
                assert_eq!(args.resampling, Some(ParticleResamplingStrategy::Systematic));
                assert_eq!(args.process_mean, Some(ProcessMeanMode::ConstantVelocity));
                let config = resolve_run_config(&args).unwrap();
                assert_eq!(config.filter.num_particles, 500);
                assert_eq!(config.measurements, Some(PathBuf::from("bearings.txt")));
                assert_eq!(config.model.process_mean, ProcessMeanMode::ConstantVelocity);
                assert_eq!(config.filter.seed, Some(42));
            }
            _ => panic!("expected run subcommand"),
        }
    }

    #[test]
    fn test_unknown_log_level_rejected() {
        assert!(Cli::try_parse_from(["bearingpf", "--log-level", "verbose", "init-config"]).is_err());
    }

    #[test]
    fn test_init_config_default_path() {
        let cli = Cli::try_parse_from(["bearingpf", "init-config"]).unwrap();
        match cli.command {
            Command::InitConfig(args) => assert_eq!(args.output, PathBuf::from("bearingpf.toml")),
            _ => panic!("expected init-config subcommand"),
        }
    }

    #[test]
    fn test_simulate_then_run() {
        let dir = std::env::temp_dir().join(format!("bearingpf_cli_{}", std::process::id()));
        simulate(&SimulateArgs {
            output: dir.clone(),
            steps: 5,
            seed: 3,
            measurement_std: 0.01,
        })
        .unwrap();
        let args = RunArgs {
            config: Some(dir.join("config.toml")),
            measurements: None,
            output: None,
            particles: Some(50),
            seed: None,
            resampling: None,
            threshold: None,
            process_mean: None,
        };
        run_filter(&args).unwrap();
        for name in ["baseline.csv", "posterior_mean.csv", "weights.csv", "ess.csv"] {
            assert!(dir.join("results").join(name).is_file(), "{name}");
        }
        let _ = std::fs::remove_dir_all(&dir);
    }
}
