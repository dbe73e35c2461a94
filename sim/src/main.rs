//! GRIDLOC SIM: A simulator for Monte Carlo localization on occupancy grids.
//!
//! A noise-free robot is placed on a known map and driven by a list of actions (scripted or random). After
//! every action it takes four range readings, and a particle filter that starts from a uniform prior over
//! the free cells tries to recover the robot's cell and heading from those readings alone.
//!
//! You can run simulations either by:
//!   1. Loading all parameters from a scenario file (TOML/JSON/YAML) with `run`
//!   2. Specifying parameters via command-line flags with `walk`
//!
//! Both write `steps.csv` (one row per filter step) and `particles.csv` (the final particle set) to the
//! output directory.

mod common;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use common::{ensure_output_dir, init_logger, resolve_map_path, validate_input_file};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gridloc::filter::{
    AveragingStrategy, DEFAULT_LIKELIHOOD_SIGMA, DEFAULT_NUM_PARTICLES, FilterConfig,
};
use gridloc::sim::{ParticleRecord, ScenarioConfig, SimulationOutput, StepRecord, run_scenario};
use gridloc::{Action, Grid, Heading, NoiseModel, RelativeDirection};

const LONG_ABOUT: &str =
    "GRIDLOC SIM: A simulator for Monte Carlo localization on occupancy grids.

A noise-free robot is placed on a known map and driven by a list of actions (scripted or random). After
every action it takes four range readings, and a particle filter that starts from a uniform prior over the
free cells tries to recover the robot's cell and heading from those readings alone.

You can run simulations either by:
  1. Loading all parameters from a scenario file (TOML/JSON/YAML) with `run`
  2. Specifying parameters via command-line flags with `walk`

Maps are ASCII text ('#' obstacle, '.' free; .txt or .map) or serialized grids (.json, .yaml, .toml).";

const STEPS_FILE: &str = "steps.csv";
const PARTICLES_FILE: &str = "particles.csv";

/// Command line arguments
#[derive(Parser)]
#[command(
    author,
    version,
    about = "A simulator for Monte Carlo localization on occupancy grids.",
    long_about = LONG_ABOUT
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

/// Top-level commands
#[derive(Subcommand, Clone)]
enum Command {
    #[command(
        name = "run",
        about = "Run a scenario file",
        long_about = "Run the drive described by a scenario file (TOML/JSON/YAML). A relative map path inside the scenario is resolved against the directory holding the scenario file."
    )]
    Run(RunArgs),

    #[command(
        name = "walk",
        about = "Run a drive configured from flags",
        long_about = "Run a drive on a map file with the filter tuned from command-line flags. Without --actions the robot takes --steps random actions; without --start it starts from a random free cell."
    )]
    Walk(WalkArgs),

    #[command(name = "config", about = "Generate a template scenario file")]
    CreateConfig(CreateConfigArgs),
}

/// Arguments for the run command
#[derive(Args, Clone, Debug)]
struct RunArgs {
    /// Scenario file (.toml, .json, .yaml/.yml)
    #[arg(short, long, value_parser)]
    config: PathBuf,

    /// Output directory for steps.csv and particles.csv
    #[arg(short, long, value_parser)]
    output: PathBuf,
}

/// Arguments for the walk command
#[derive(Args, Clone, Debug)]
struct WalkArgs {
    /// Map file (.txt/.map ASCII, or .json/.yaml/.toml)
    #[arg(short, long, value_parser)]
    map: PathBuf,

    /// Output directory for steps.csv and particles.csv
    #[arg(short, long, value_parser)]
    output: PathBuf,

    /// Number of particles
    #[arg(long, default_value_t = DEFAULT_NUM_PARTICLES)]
    particles: usize,

    /// Number of random actions when --actions is not given
    #[arg(long, default_value_t = 25)]
    steps: usize,

    /// Comma-separated actions, e.g. `forward,left,north,east`
    #[arg(long, value_delimiter = ',')]
    actions: Vec<Action>,

    /// Robot start cell as `i,j`
    #[arg(long, value_delimiter = ',')]
    start: Option<Vec<i64>>,

    /// Robot start heading
    #[arg(long, default_value_t = Heading::North)]
    heading: Heading,

    /// RNG seed for stochastic processes
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Motion noise standard deviation of each particle (cells)
    #[arg(long, default_value_t = NoiseModel::DEFAULT_SIGMA)]
    motion_sigma: f64,

    /// Range noise standard deviation of each particle (cells)
    #[arg(long, default_value_t = NoiseModel::DEFAULT_SIGMA)]
    measurement_sigma: f64,

    /// Standard deviation of the sensor likelihood (cells)
    #[arg(long, default_value_t = DEFAULT_LIKELIHOOD_SIGMA)]
    likelihood_sigma: f64,

    /// How the particle set is collapsed into one pose
    #[arg(long, value_enum, default_value_t = AveragingStrategy::WeightedAverage)]
    averaging: AveragingStrategy,

    /// Spread per-particle work over all cores
    #[arg(long)]
    parallel: bool,
}

/// Arguments for create-config command
#[derive(Args, Clone, Debug)]
struct CreateConfigArgs {
    /// Output file path for the scenario file
    /// File extension determines format: .json, .yaml/.yml, or .toml (recommended)
    #[arg(short, long, value_parser)]
    output: PathBuf,
}

impl WalkArgs {
    fn scenario(&self) -> Result<ScenarioConfig> {
        let start = match self.start.as_deref() {
            Some(&[i, j]) => Some([i, j]),
            Some(other) => anyhow::bail!("--start takes two values, got {}", other.len()),
            None => None,
        };
        Ok(ScenarioConfig {
            map: self.map.clone(),
            seed: self.seed,
            start,
            start_heading: self.heading,
            actions: self.actions.clone(),
            random_steps: self.steps,
            filter: FilterConfig {
                num_particles: self.particles,
                likelihood_sigma: self.likelihood_sigma,
                motion_sigma: self.motion_sigma,
                measurement_sigma: self.measurement_sigma,
                averaging: self.averaging,
                parallel: self.parallel,
                ..FilterConfig::default()
            },
        })
    }
}

/// Load the map, run the scenario and write both CSV files
fn simulate(scenario: &ScenarioConfig, map_path: &Path, output: &Path) -> Result<()> {
    validate_input_file(map_path)?;
    ensure_output_dir(output)?;
    let grid = Grid::from_file(map_path)
        .with_context(|| format!("failed to load map '{}'", map_path.display()))?;
    info!(
        "Loaded {} x {} map '{}' with {} free cells",
        grid.rows(),
        grid.cols(),
        map_path.display(),
        grid.free_cells().len()
    );

    let result = run_scenario(scenario, Arc::new(grid))?;
    report(&result);

    let steps_path = output.join(STEPS_FILE);
    StepRecord::to_csv(&result.steps, &steps_path)
        .with_context(|| format!("failed to write '{}'", steps_path.display()))?;
    let particles_path = output.join(PARTICLES_FILE);
    ParticleRecord::to_csv(&result.particles, &particles_path)
        .with_context(|| format!("failed to write '{}'", particles_path.display()))?;
    info!(
        "Results written to {} and {}",
        steps_path.display(),
        particles_path.display()
    );
    Ok(())
}

fn report(result: &SimulationOutput) {
    let Some(last) = result.steps.last() else {
        warn!("Scenario contained no actions; only the prior was written");
        return;
    };
    let truth = match (last.true_i, last.true_j, last.true_heading) {
        (Some(i), Some(j), Some(heading)) => format!("({i}, {j}) facing {heading}"),
        _ => "unknown".to_string(),
    };
    info!(
        "After {} steps: estimate ({:.2}, {:.2}) facing {} [{:.0}%], truth {}, error {}",
        last.step,
        last.mean_i,
        last.mean_j,
        last.heading,
        100.0 * last.heading_confidence,
        truth,
        last.position_error
            .map(|e| format!("{e:.2} cells"))
            .unwrap_or_else(|| "n/a".to_string())
    );
}

fn run_from_config(args: &RunArgs) -> Result<()> {
    validate_input_file(&args.config)?;
    let scenario = ScenarioConfig::from_file(&args.config)
        .with_context(|| format!("failed to read scenario '{}'", args.config.display()))?;
    let map_path = resolve_map_path(&args.config, &scenario.map);
    info!(
        "Running scenario '{}' on map '{}'",
        args.config.display(),
        map_path.display()
    );
    simulate(&scenario, &map_path, &args.output)
}

fn run_walk(args: &WalkArgs) -> Result<()> {
    let scenario = args.scenario()?;
    simulate(&scenario, &args.map, &args.output)
}

fn create_config_file(args: &CreateConfigArgs) -> Result<()> {
    let template = ScenarioConfig {
        start: Some([1, 1]),
        start_heading: Heading::East,
        actions: vec![
            Action::Relative(RelativeDirection::Forward),
            Action::Relative(RelativeDirection::Forward),
            Action::Relative(RelativeDirection::Right),
            Action::Absolute(Heading::South),
            Action::Relative(RelativeDirection::Left),
        ],
        ..ScenarioConfig::default()
    };
    if let Some(parent) = args.output.parent()
        && !parent.as_os_str().is_empty()
    {
        ensure_output_dir(parent)?;
    }
    template
        .to_file(&args.output)
        .with_context(|| format!("failed to write '{}'", args.output.display()))?;
    println!("Template scenario written to {}", args.output.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(&cli.log_level, cli.log_file.as_ref())?;

    match cli.command {
        Command::Run(args) => run_from_config(&args),
        Command::Walk(args) => run_walk(&args),
        Command::CreateConfig(args) => create_config_file(&args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const MAP: &str = "\
########
#......#
#.##...#
#......#
########
";

    #[test]
    fn test_cli_parses_walk() {
        let cli = Cli::try_parse_from([
            "gridloc-sim",
            "walk",
            "--map",
            "maps/office.txt",
            "--output",
            "out",
            "--actions",
            "forward,left,north",
            "--start",
            "1,2",
            "--heading",
            "east",
            "--averaging",
            "highest-weight",
        ])
        .unwrap();
        let Command::Walk(args) = cli.command else {
            panic!("expected walk");
        };
        let scenario = args.scenario().unwrap();
        assert_eq!(scenario.start, Some([1, 2]));
        assert_eq!(scenario.start_heading, Heading::East);
        assert_eq!(
            scenario.actions,
            vec![
                Action::Relative(RelativeDirection::Forward),
                Action::Relative(RelativeDirection::Left),
                Action::Absolute(Heading::North),
            ]
        );
        assert_eq!(scenario.filter.averaging, AveragingStrategy::HighestWeight);
        assert_eq!(scenario.filter.num_particles, DEFAULT_NUM_PARTICLES);
    }

    #[test]
    fn test_start_needs_two_coordinates() {
        for start in ["3", "1,2,3"] {
            let cli = Cli::try_parse_from([
                "gridloc-sim",
                "walk",
                "--map",
                "m.txt",
                "--output",
                "out",
                "--start",
                start,
            ])
            .unwrap();
            let Command::Walk(args) = cli.command else {
                panic!("expected walk");
            };
            assert!(args.scenario().is_err(), "start {start}");
        }
    }

    #[test]
    fn test_cli_rejects_unknown_action() {
        let result = Cli::try_parse_from([
            "gridloc-sim",
            "walk",
            "--map",
            "m.txt",
            "--output",
            "out",
            "--actions",
            "sideways",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_create_config_then_run() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("scenario.toml");
        create_config_file(&CreateConfigArgs {
            output: config_path.clone(),
        })
        .unwrap();

        // Point the template at a map next to it
        let mut scenario = ScenarioConfig::from_file(&config_path).unwrap();
        scenario.map = PathBuf::from("map.txt");
        scenario.filter.num_particles = 100;
        scenario.to_file(&config_path).unwrap();
        fs::write(dir.path().join("map.txt"), MAP).unwrap();

        let output = dir.path().join("out");
        run_from_config(&RunArgs {
            config: config_path,
            output: output.clone(),
        })
        .unwrap();

        let steps = StepRecord::from_csv(output.join(STEPS_FILE)).unwrap();
        assert_eq!(steps.len(), 5);
        assert_eq!(steps[0].true_i, Some(2));
        assert_eq!(steps[0].true_j, Some(1));
        let particles = fs::read_to_string(output.join(PARTICLES_FILE)).unwrap();
        // Header plus one line per particle
        assert_eq!(particles.lines().count(), 101);
    }

    #[test]
    fn test_run_missing_map_fails() {
        let dir = tempdir().unwrap();
        let args = WalkArgs {
            map: dir.path().join("missing.txt"),
            output: dir.path().join("out"),
            particles: 10,
            steps: 3,
            actions: Vec::new(),
            start: None,
            heading: Heading::North,
            seed: 1,
            motion_sigma: 0.0,
            measurement_sigma: 0.0,
            likelihood_sigma: DEFAULT_LIKELIHOOD_SIGMA,
            averaging: AveragingStrategy::WeightedAverage,
            parallel: false,
        };
        assert!(run_walk(&args).is_err());
    }
}
