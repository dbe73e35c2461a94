//! Simulation utilities for driving the particle filter.
//!
//! This module provides:
//! - The [`Agent`] trait, the seam between the filter and whatever executes
//!   actions and produces range readings (a simulated robot here, a hardware
//!   driver elsewhere)
//! - [`ScenarioConfig`], a scripted or random drive over a map, readable from
//!   JSON, YAML or TOML
//! - [`run_simulation`] / [`run_scenario`], the act → sense → filter loop
//! - CSV records of each step ([`StepRecord`]) and of the final particle set
//!   ([`ParticleRecord`])
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{LocalizationError, Result};
use crate::filter::{FilterConfig, ParticleFilter, PoseEstimate};
use crate::grid::Grid;
use crate::orientation::Heading;
use crate::particle::{Action, Measurement, Particle};

/// Something that can execute actions on the map and report range readings.
pub trait Agent {
    /// Carry out `action`.
    fn execute<R: Rng>(&mut self, action: Action, grid: &Grid, rng: &mut R);
    /// Range readings in the agent's current measurement order.
    fn sense<R: Rng>(&mut self, grid: &Grid, rng: &mut R) -> Result<Measurement>;
    /// Ground-truth pose `(i, j, heading)`, if the agent knows it.
    fn pose(&self, _grid: &Grid) -> Option<(i64, i64, Heading)> {
        None
    }
}

impl Agent for Particle {
    fn execute<R: Rng>(&mut self, action: Action, grid: &Grid, rng: &mut R) {
        self.apply(action, grid, rng);
    }

    fn sense<R: Rng>(&mut self, grid: &Grid, rng: &mut R) -> Result<Measurement> {
        Ok(self.measure(grid, rng))
    }

    fn pose(&self, grid: &Grid) -> Option<(i64, i64, Heading)> {
        let (i, j) = self.coordinates(grid);
        Some((i, j, self.heading))
    }
}

/// Uniformly random actions, relative and absolute alike.
pub fn random_actions<R: Rng>(count: usize, rng: &mut R) -> Vec<Action> {
    (0..count)
        .map(|_| Action::ALL[rng.random_range(0..Action::ALL.len())])
        .collect()
}

/// One row of simulation output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: usize,
    pub action: Action,
    /// Readings in measurement order (current heading first)
    pub range_0: i64,
    pub range_1: i64,
    pub range_2: i64,
    pub range_3: i64,
    pub true_i: Option<i64>,
    pub true_j: Option<i64>,
    pub true_heading: Option<Heading>,
    pub mean_i: f64,
    pub mean_j: f64,
    pub var_i: f64,
    pub var_j: f64,
    pub heading: Heading,
    /// Weight mass on `heading`
    pub heading_confidence: f64,
    pub effective_sample_size: f64,
    /// Euclidean distance (cells) between the mean and the true cell
    pub position_error: Option<f64>,
}

impl StepRecord {
    pub fn new(
        step: usize,
        action: Action,
        measured: &Measurement,
        estimate: &PoseEstimate,
        truth: Option<(i64, i64, Heading)>,
    ) -> Self {
        let heading_slot = Heading::COMPASS
            .iter()
            .position(|&h| h == estimate.heading)
            .unwrap_or(0);
        StepRecord {
            step,
            action,
            range_0: measured[0],
            range_1: measured[1],
            range_2: measured[2],
            range_3: measured[3],
            true_i: truth.map(|t| t.0),
            true_j: truth.map(|t| t.1),
            true_heading: truth.map(|t| t.2),
            mean_i: estimate.mean[0],
            mean_j: estimate.mean[1],
            var_i: estimate.covariance[(0, 0)],
            var_j: estimate.covariance[(1, 1)],
            heading: estimate.heading,
            heading_confidence: estimate.heading_weights[heading_slot],
            effective_sample_size: estimate.effective_sample_size,
            position_error: truth.map(|(i, j, _)| {
                ((estimate.mean[0] - i as f64).powi(2) + (estimate.mean[1] - j as f64).powi(2))
                    .sqrt()
            }),
        }
    }

    pub fn measured(&self) -> Measurement {
        [self.range_0, self.range_1, self.range_2, self.range_3]
    }

    pub fn to_csv<P: AsRef<Path>>(records: &[Self], path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Self>> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        for result in reader.deserialize() {
            records.push(result?);
        }
        Ok(records)
    }
}

/// Snapshot of one particle for display or offline analysis.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticleRecord {
    pub i: i64,
    pub j: i64,
    pub heading: Heading,
    pub weight: f64,
}

impl ParticleRecord {
    pub fn from_particles(particles: &[Particle], grid: &Grid) -> Vec<Self> {
        particles
            .iter()
            .map(|p| {
                let (i, j) = p.coordinates(grid);
                ParticleRecord {
                    i,
                    j,
                    heading: p.heading,
                    weight: p.weight,
                }
            })
            .collect()
    }

    pub fn to_csv<P: AsRef<Path>>(records: &[Self], path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Act, sense and filter once per action, recording the estimate after each step.
pub fn run_simulation<A: Agent, R: Rng>(
    filter: &mut ParticleFilter,
    agent: &mut A,
    actions: &[Action],
    rng: &mut R,
) -> Result<Vec<StepRecord>> {
    let mut records = Vec::with_capacity(actions.len());
    for &action in actions {
        agent.execute(action, filter.grid(), rng);
        let measured = agent.sense(filter.grid(), rng)?;
        filter.step(&measured, action, rng)?;
        let estimate = filter.estimate()?;
        let record = StepRecord::new(
            filter.steps(),
            action,
            &measured,
            &estimate,
            agent.pose(filter.grid()),
        );
        info!(
            "Step {}: {} -> {:?}, estimate ({:.2}, {:.2}) {} [{:.0}%], ESS {:.1}",
            record.step,
            action,
            measured,
            record.mean_i,
            record.mean_j,
            record.heading,
            100.0 * record.heading_confidence,
            record.effective_sample_size
        );
        records.push(record);
    }
    Ok(records)
}

/// A drive over one map: where the robot starts, what it does and how the filter is tuned.
///
/// When `actions` is empty, `random_steps` random actions are generated instead.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Map file (.txt/.map/.json/.yaml/.yml/.toml)
    pub map: PathBuf,
    pub seed: u64,
    /// Robot start cell `[i, j]`; a random free cell if absent
    pub start: Option<[i64; 2]>,
    pub start_heading: Heading,
    pub actions: Vec<Action>,
    pub random_steps: usize,
    pub filter: FilterConfig,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        ScenarioConfig {
            map: PathBuf::from("maps/office.txt"),
            seed: 42,
            start: None,
            start_heading: Heading::North,
            actions: Vec::new(),
            random_steps: 25,
            filter: FilterConfig::default(),
        }
    }
}

impl ScenarioConfig {
    /// Write the configuration to a JSON file (pretty-printed).
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// Read the configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self)?;
        file.write_all(s.as_bytes())?;
        Ok(())
    }

    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_yaml::from_reader(file)?)
    }

    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self)?;
        file.write_all(s.as_bytes())?;
        Ok(())
    }

    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut s = String::new();
        File::open(path)?.read_to_string(&mut s)?;
        Ok(toml::from_str(&s)?)
    }

    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(LocalizationError::InvalidParameter(format!(
                "unsupported config extension: {}",
                p.display()
            ))),
        }
    }

    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(LocalizationError::InvalidParameter(format!(
                "unsupported config extension: {}",
                p.display()
            ))),
        }
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

/// Everything a scenario run produces.
#[derive(Clone, Debug)]
pub struct SimulationOutput {
    pub steps: Vec<StepRecord>,
    pub particles: Vec<ParticleRecord>,
    /// Cell the robot started from
    pub start: (i64, i64),
}

/// Run `config` on an already loaded map (`config.map` is not read).
pub fn run_scenario(config: &ScenarioConfig, grid: Arc<Grid>) -> Result<SimulationOutput> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let start = match config.start {
        Some([i, j]) => match grid.to_index(i, j) {
            Some(index) if !grid.is_occupied_or_border(i, j) => index,
            _ => {
                return Err(LocalizationError::InvalidParameter(format!(
                    "start cell ({i}, {j}) is not a free cell"
                )));
            }
        },
        None => {
            let free = grid.free_cells();
            if free.is_empty() {
                return Err(LocalizationError::InsufficientFreeSpace { requested: 1 });
            }
            free[rng.random_range(0..free.len())]
        }
    };
    let mut robot = Particle::robot(start, config.start_heading);
    let start = robot.coordinates(&grid);
    info!(
        "Robot starts at {:?} facing {} on a {} x {} map",
        start,
        config.start_heading,
        grid.rows(),
        grid.cols()
    );

    let mut filter = ParticleFilter::new(grid, config.filter.clone(), &mut rng)?;
    let actions = if config.actions.is_empty() {
        random_actions(config.random_steps, &mut rng)
    } else {
        config.actions.clone()
    };
    let steps = run_simulation(&mut filter, &mut robot, &actions, &mut rng)?;
    Ok(SimulationOutput {
        steps,
        particles: ParticleRecord::from_particles(filter.particles(), filter.grid()),
        start,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orientation::RelativeDirection;
    use assert_approx_eq::assert_approx_eq;

    const CORRIDOR: &str = "\
#######
#.....#
#.###.#
#.....#
#######
";

    fn small_config() -> ScenarioConfig {
        ScenarioConfig {
            start: Some([1, 1]),
            start_heading: Heading::East,
            actions: vec![
                Action::Relative(RelativeDirection::Forward),
                Action::Relative(RelativeDirection::Forward),
                Action::Relative(RelativeDirection::Right),
                Action::Absolute(Heading::South),
            ],
            filter: FilterConfig {
                num_particles: 200,
                ..FilterConfig::default()
            },
            ..ScenarioConfig::default()
        }
    }

    #[test]
    fn test_particle_agent_reports_pose() {
        let grid = Grid::from_ascii(CORRIDOR).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let mut robot = Particle::robot(grid.to_index(1, 1).unwrap(), Heading::East);
        robot.execute(Action::Relative(RelativeDirection::Forward), &grid, &mut rng);
        assert_eq!(robot.pose(&grid), Some((2, 1, Heading::East)));
        // Facing east: east, north, south, west
        assert_eq!(robot.sense(&grid, &mut rng).unwrap(), [3, 0, 0, 1]);
    }

    #[test]
    fn test_random_actions_count() {
        let mut rng = StdRng::seed_from_u64(9);
        let actions = random_actions(40, &mut rng);
        assert_eq!(actions.len(), 40);
    }

    #[test]
    fn test_run_scenario_records_every_step() {
        let grid = Arc::new(Grid::from_ascii(CORRIDOR).unwrap());
        let output = run_scenario(&small_config(), grid).unwrap();
        assert_eq!(output.start, (1, 1));
        assert_eq!(output.steps.len(), 4);
        assert_eq!(output.particles.len(), 200);
        for (k, record) in output.steps.iter().enumerate() {
            assert_eq!(record.step, k + 1);
            assert!(record.position_error.is_some());
            assert!(record.effective_sample_size > 0.0);
        }
        // East twice, then two moves south that the inner wall blocks
        let last = &output.steps[3];
        assert_eq!((last.true_i, last.true_j), (Some(3), Some(1)));
        assert_eq!(last.true_heading, Some(Heading::South));
        let total: f64 = output.particles.iter().map(|p| p.weight).sum();
        assert_approx_eq!(total, 1.0, 1e-9);
    }

    #[test]
    fn test_run_scenario_is_reproducible() {
        let grid = Arc::new(Grid::from_ascii(CORRIDOR).unwrap());
        let a = run_scenario(&small_config(), grid.clone()).unwrap();
        let b = run_scenario(&small_config(), grid).unwrap();
        assert_eq!(a.steps, b.steps);
        assert_eq!(a.particles, b.particles);
    }

    #[test]
    fn test_run_scenario_rejects_blocked_start() {
        let grid = Arc::new(Grid::from_ascii(CORRIDOR).unwrap());
        let config = ScenarioConfig {
            start: Some([0, 0]),
            ..small_config()
        };
        assert!(matches!(
            run_scenario(&config, grid),
            Err(LocalizationError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_step_records_csv_round_trip() {
        let grid = Arc::new(Grid::from_ascii(CORRIDOR).unwrap());
        let output = run_scenario(&small_config(), grid).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steps.csv");
        StepRecord::to_csv(&output.steps, &path).unwrap();
        let read = StepRecord::from_csv(&path).unwrap();
        assert_eq!(read.len(), output.steps.len());
        for (a, b) in read.iter().zip(&output.steps) {
            assert_eq!(a.action, b.action);
            assert_eq!(a.measured(), b.measured());
            assert_eq!(a.true_heading, b.true_heading);
        }
        ParticleRecord::to_csv(&output.particles, dir.path().join("particles.csv")).unwrap();
    }

    #[test]
    fn test_scenario_config_file_formats() {
        let config = small_config();
        let dir = tempfile::tempdir().unwrap();
        for name in ["scenario.json", "scenario.yaml", "scenario.toml"] {
            let path = dir.path().join(name);
            config.to_file(&path).unwrap();
            assert_eq!(ScenarioConfig::from_file(&path).unwrap(), config, "format {name}");
        }
        assert!(config.to_file(dir.path().join("scenario.ini")).is_err());
    }

    #[test]
    fn test_scenario_config_defaults_fill_missing_fields() {
        let config: ScenarioConfig =
            toml::from_str("map = \"maps/hall.txt\"\nactions = [\"forward\", \"west\"]\n").unwrap();
        assert_eq!(config.map, PathBuf::from("maps/hall.txt"));
        assert_eq!(
            config.actions,
            vec![Action::Relative(RelativeDirection::Forward), Action::Absolute(Heading::West)]
        );
        assert_eq!(config.seed, 42);
        assert_eq!(config.filter, FilterConfig::default());
    }
}
