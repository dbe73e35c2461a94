//! Grid Monte Carlo localization toolbox
//!
//! This crate estimates the pose of an agent that lives on an occupancy grid: which cell it occupies and
//! which of the four compass headings it faces. The agent only knows the relative motion commands it was
//! given and the four range readings (free cells to the nearest obstacle) it takes after each move. The map
//! is known and static. Estimation is done with a particle filter (Monte Carlo Localization): a population
//! of weighted pose hypotheses is resampled, moved and reweighted once per executed action.
//!
//! This crate is primarily built off of the following dependencies:
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr): random
//!   number generation for the motion and sensor noise and for resampling.
//! - [`nalgebra`](https://crates.io/crates/nalgebra): mean and covariance of the pose estimate.
//! - [`rayon`](https://crates.io/crates/rayon): optional data-parallel filter steps.
//! - [`serde`](https://crates.io/crates/serde) with `csv`, `serde_json`, `serde_yaml` and `toml`: map,
//!   scenario and result I/O.
//!
//! ## Crate overview
//!
//! - [grid]: the occupancy grid, index/coordinate mapping and map file formats.
//! - [orientation]: headings, relative directions and the measurement ordering.
//! - [particle]: particles, noise, and the motion and measurement models.
//! - [filter]: the initializer, the importance-resampling step and the pose estimate.
//! - [sim]: the agent seam, scripted and random drives, and CSV output.
//!
//! ## Conventions
//!
//! Cells are addressed by column `i` and row `j`; rows grow southwards, so North is `(0, -1)`. The flat index
//! of a cell is `j * cols + i`. Anything outside the grid counts as an obstacle, which is what bounds every
//! range reading.
//!
//! Range readings are always reported in the fixed order North, South, West, East, rotated so that the
//! agent's current heading comes first. A robot facing West therefore reports `[west, east, north, south]`.
//! Simulated and measured readings are compared component-wise, so both sides must use this order.
//!
//! Noise is drawn from a normal distribution and truncated toward zero before it is added to a cell offset or
//! a range reading.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rand::SeedableRng;
//! use rand::rngs::StdRng;
//! use gridloc::{Action, FilterConfig, Grid, Heading, Particle, ParticleFilter, RelativeDirection};
//!
//! let grid = Arc::new(Grid::from_ascii("#######\n#.....#\n#.#...#\n#######\n").unwrap());
//! let mut rng = StdRng::seed_from_u64(42);
//! let config = FilterConfig { num_particles: 500, ..FilterConfig::default() };
//! let mut filter = ParticleFilter::new(grid.clone(), config, &mut rng).unwrap();
//!
//! let mut robot = Particle::robot(grid.to_index(1, 1).unwrap(), Heading::East);
//! let action = Action::Relative(RelativeDirection::Forward);
//! robot.apply(action, &grid, &mut rng);
//! let measured = robot.measure(&grid, &mut rng);
//! filter.step(&measured, action, &mut rng).unwrap();
//!
//! let estimate = filter.estimate().unwrap();
//! println!("mean cell {:?}, facing {}", estimate.mean, estimate.heading);
//! ```
pub mod error;
pub mod filter;
pub mod grid;
pub mod orientation;
pub mod particle;
pub mod sim;

pub use error::{LocalizationError, Result};
pub use filter::{
    AveragingStrategy, FilterConfig, ParticleFilter, PoseEstimate, initialize_particles,
    resample_step, resample_step_parallel,
};
pub use grid::Grid;
pub use orientation::{CANONICAL_ORDER, Heading, RelativeDirection};
pub use particle::{Action, Measurement, NoiseModel, Particle};
