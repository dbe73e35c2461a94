//! Particles and their motion and measurement models.
//!
//! A [`Particle`] is one weighted pose hypothesis: a grid cell, a heading and a
//! [`NoiseModel`]. The same type doubles as the ground-truth robot in
//! simulation; a robot is simply a particle whose noise is disabled.
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;

use crate::error::{LocalizationError, Result};
use crate::grid::Grid;
use crate::orientation::{Heading, RelativeDirection};

/// Four range readings ordered by [`Heading::measurement_order`].
pub type Measurement = [i64; 4];

/// A motion command: a turn relative to the current heading, or an absolute heading.
///
/// Either way the agent ends up facing the resulting heading and tries to step
/// one cell in that direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Action {
    Relative(RelativeDirection),
    Absolute(Heading),
}

impl Action {
    pub const ALL: [Action; 8] = [
        Action::Relative(RelativeDirection::Forward),
        Action::Relative(RelativeDirection::Right),
        Action::Relative(RelativeDirection::Back),
        Action::Relative(RelativeDirection::Left),
        Action::Absolute(Heading::North),
        Action::Absolute(Heading::East),
        Action::Absolute(Heading::South),
        Action::Absolute(Heading::West),
    ];

    /// Heading an agent currently facing `current` ends up with.
    pub fn target_heading(self, current: Heading) -> Heading {
        match self {
            Action::Relative(direction) => current.absolute(direction),
            Action::Absolute(heading) => heading,
        }
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Relative(direction) => Display::fmt(direction, f),
            Action::Absolute(heading) => Display::fmt(heading, f),
        }
    }
}

impl FromStr for Action {
    type Err = LocalizationError;

    fn from_str(s: &str) -> Result<Self> {
        if let Ok(heading) = s.parse::<Heading>() {
            return Ok(Action::Absolute(heading));
        }
        s.parse::<RelativeDirection>()
            .map(Action::Relative)
            .map_err(|_| LocalizationError::InvalidParameter(format!("unknown action '{s}'")))
    }
}

impl TryFrom<String> for Action {
    type Error = LocalizationError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        action.to_string()
    }
}

/// Gaussian motion and measurement noise applied per particle.
///
/// Noise draws are truncated toward zero before being added to integer cell
/// offsets and range readings, so sigmas below 1.0 rarely perturb anything.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoiseModel {
    enabled: bool,
    motion_sigma: f64,
    measurement_sigma: f64,
}

impl Default for NoiseModel {
    fn default() -> Self {
        NoiseModel {
            enabled: true,
            motion_sigma: NoiseModel::DEFAULT_SIGMA,
            measurement_sigma: NoiseModel::DEFAULT_SIGMA,
        }
    }
}

impl NoiseModel {
    pub const DEFAULT_SIGMA: f64 = 1.5;

    /// Enabled noise with the given standard deviations (in cells).
    pub fn new(motion_sigma: f64, measurement_sigma: f64) -> Result<NoiseModel> {
        for (name, sigma) in [("motion", motion_sigma), ("measurement", measurement_sigma)] {
            if !sigma.is_finite() || sigma < 0.0 {
                return Err(LocalizationError::InvalidParameter(format!(
                    "{name} sigma must be finite and non-negative, got {sigma}"
                )));
            }
        }
        Ok(NoiseModel {
            enabled: true,
            motion_sigma,
            measurement_sigma,
        })
    }

    /// Perfect motion and sensing.
    pub fn disabled() -> NoiseModel {
        NoiseModel {
            enabled: false,
            ..NoiseModel::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn motion_sigma(&self) -> f64 {
        self.motion_sigma
    }

    pub fn measurement_sigma(&self) -> f64 {
        self.measurement_sigma
    }

    fn truncated_sample<R: Rng>(&self, sigma: f64, rng: &mut R) -> i64 {
        if !self.enabled {
            return 0;
        }
        let z: f64 = StandardNormal.sample(rng);
        // `as` truncates toward zero
        (z * sigma) as i64
    }

    fn motion_offset<R: Rng>(&self, rng: &mut R) -> i64 {
        self.truncated_sample(self.motion_sigma, rng)
    }

    fn measurement_offset<R: Rng>(&self, rng: &mut R) -> i64 {
        self.truncated_sample(self.measurement_sigma, rng)
    }
}

/// One weighted pose hypothesis.
#[derive(Clone, Debug, PartialEq)]
pub struct Particle {
    pub weight: f64,
    /// Flat grid index of the occupied cell
    pub position: usize,
    pub heading: Heading,
    pub noise: NoiseModel,
}

impl Display for Particle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Particle")
            .field("position", &self.position)
            .field("heading", &self.heading.name())
            .field("weight", &self.weight)
            .field("noisy", &self.noise.is_enabled())
            .finish()
    }
}

impl Particle {
    pub fn new(position: usize, heading: Heading, weight: f64, noise: NoiseModel) -> Particle {
        Particle {
            weight,
            position,
            heading,
            noise,
        }
    }

    /// A noise-free agent, used as simulated ground truth.
    pub fn robot(position: usize, heading: Heading) -> Particle {
        Particle::new(position, heading, 1.0, NoiseModel::disabled())
    }

    pub fn coordinates(&self, grid: &Grid) -> (i64, i64) {
        grid.to_coordinates(self.position)
    }

    /// Motion model: turn to the action's heading, then try to step one cell.
    ///
    /// The heading is always committed. The position only changes if the
    /// (possibly noisy) target cell is free; a blocked move is a normal
    /// outcome. Returns whether the position changed.
    pub fn apply<R: Rng>(&mut self, action: Action, grid: &Grid, rng: &mut R) -> bool {
        let new_heading = action.target_heading(self.heading);
        let (di, dj) = new_heading.delta();
        let (i, j) = self.coordinates(grid);
        let i = i + di + self.noise.motion_offset(rng);
        let j = j + dj + self.noise.motion_offset(rng);
        self.heading = new_heading;
        match grid.to_index(i, j) {
            Some(index) if !grid.is_occupied_or_border(i, j) => {
                self.position = index;
                true
            }
            _ => false,
        }
    }

    /// Measurement model: free cells between the particle and the nearest
    /// obstacle in each direction of the current measurement order.
    pub fn measure<R: Rng>(&self, grid: &Grid, rng: &mut R) -> Measurement {
        let origin = self.coordinates(grid);
        self.heading.measurement_order().map(|heading| {
            cast_ray(grid, origin, heading) as i64 + self.noise.measurement_offset(rng)
        })
    }
}

/// Number of free cells stepped over from `origin` before hitting an obstacle
/// or the border. Bounded by [`Grid::max_range`].
pub fn cast_ray(grid: &Grid, origin: (i64, i64), heading: Heading) -> usize {
    let (di, dj) = heading.delta();
    let (i, j) = origin;
    (1..=grid.max_range() as i64)
        .take_while(|&s| !grid.is_occupied_or_border(i + s * di, j + s * dj))
        .count()
}

/// Sum of squared component differences between two readings.
///
/// Differences are taken in `f64`; measured readings come from outside and
/// may be arbitrarily large.
pub fn squared_error(measured: &Measurement, expected: &Measurement) -> f64 {
    measured
        .iter()
        .zip(expected.iter())
        .map(|(&m, &e)| (m as f64 - e as f64).powi(2))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn bordered_room() -> Grid {
        // 3x3 free interior inside a wall ring
        Grid::from_ascii("#####\n#...#\n#...#\n#...#\n#####\n").unwrap()
    }

    #[test]
    fn test_action_parse_and_display() {
        assert_eq!(
            "forward".parse::<Action>().unwrap(),
            Action::Relative(RelativeDirection::Forward)
        );
        assert_eq!("South".parse::<Action>().unwrap(), Action::Absolute(Heading::South));
        assert!("jump".parse::<Action>().is_err());
        for action in Action::ALL {
            assert_eq!(action.to_string().parse::<Action>().unwrap(), action);
        }
    }

    #[test]
    fn test_noise_model_rejects_bad_sigma() {
        assert!(NoiseModel::new(-1.0, 1.0).is_err());
        assert!(NoiseModel::new(1.0, f64::NAN).is_err());
        let noise = NoiseModel::new(0.5, 2.0).unwrap();
        assert!(noise.is_enabled());
        assert_eq!(noise.motion_sigma(), 0.5);
        assert_eq!(noise.measurement_sigma(), 2.0);
        assert!(!NoiseModel::disabled().is_enabled());
    }

    #[test]
    fn test_robot_moves_forward() {
        let grid = bordered_room();
        let mut rng = StdRng::seed_from_u64(1);
        let mut robot = Particle::robot(grid.to_index(2, 2).unwrap(), Heading::North);
        assert!(robot.apply(Action::Relative(RelativeDirection::Forward), &grid, &mut rng));
        assert_eq!(robot.coordinates(&grid), (2, 1));
        assert_eq!(robot.heading, Heading::North);
    }

    #[test]
    fn test_relative_turn_then_step() {
        let grid = bordered_room();
        let mut rng = StdRng::seed_from_u64(1);
        let mut robot = Particle::robot(grid.to_index(2, 2).unwrap(), Heading::North);
        robot.apply(Action::Relative(RelativeDirection::Right), &grid, &mut rng);
        assert_eq!(robot.heading, Heading::East);
        assert_eq!(robot.coordinates(&grid), (3, 2));
        robot.apply(Action::Absolute(Heading::South), &grid, &mut rng);
        assert_eq!(robot.heading, Heading::South);
        assert_eq!(robot.coordinates(&grid), (3, 3));
    }

    #[test]
    fn test_blocked_move_keeps_position_but_turns() {
        let grid = Grid::open(1, 1);
        let mut rng = StdRng::seed_from_u64(7);
        for action in Action::ALL {
            let mut robot = Particle::robot(0, Heading::North);
            let expected = action.target_heading(Heading::North);
            assert!(!robot.apply(action, &grid, &mut rng));
            assert_eq!(robot.position, 0);
            assert_eq!(robot.heading, expected);
        }
    }

    #[test]
    fn test_blocked_by_wall() {
        let grid = bordered_room();
        let mut rng = StdRng::seed_from_u64(3);
        let mut robot = Particle::robot(grid.to_index(1, 1).unwrap(), Heading::East);
        assert!(!robot.apply(Action::Absolute(Heading::West), &grid, &mut rng));
        assert_eq!(robot.coordinates(&grid), (1, 1));
        assert_eq!(robot.heading, Heading::West);
    }

    #[test]
    fn test_measure_center_of_room_every_heading() {
        let grid = bordered_room();
        let mut rng = StdRng::seed_from_u64(11);
        for heading in Heading::COMPASS {
            let robot = Particle::robot(grid.to_index(2, 2).unwrap(), heading);
            assert_eq!(robot.measure(&grid, &mut rng), [1, 1, 1, 1]);
        }
    }

    #[test]
    fn test_measure_follows_rotated_order() {
        // Corner cell of a 3x5 open grid: 4 cells east, 2 south, none north/west
        let grid = Grid::open(3, 5);
        let mut rng = StdRng::seed_from_u64(5);
        let north = Particle::robot(0, Heading::North);
        assert_eq!(north.measure(&grid, &mut rng), [0, 2, 0, 4]);
        let west = Particle::robot(0, Heading::West);
        assert_eq!(west.measure(&grid, &mut rng), [0, 4, 0, 2]);
        let east = Particle::robot(0, Heading::East);
        assert_eq!(east.measure(&grid, &mut rng), [4, 0, 2, 0]);
    }

    #[test]
    fn test_noisy_measurement_stays_near_truth() {
        let grid = Grid::open(21, 21);
        let mut rng = StdRng::seed_from_u64(99);
        let particle = Particle::new(
            grid.to_index(10, 10).unwrap(),
            Heading::North,
            1.0,
            NoiseModel::new(0.0, 1.5).unwrap(),
        );
        let mut total = 0i64;
        for _ in 0..500 {
            let reading = particle.measure(&grid, &mut rng);
            total += reading.iter().sum::<i64>();
        }
        let mean = total as f64 / 2000.0;
        assert!((mean - 10.0).abs() < 0.3, "mean reading {mean}");
    }

    #[test]
    fn test_squared_error() {
        assert_eq!(squared_error(&[1, 2, 3, 4], &[1, 2, 3, 4]), 0.0);
        assert_eq!(squared_error(&[1, 2, 3, 4], &[2, 0, 3, 7]), 14.0);
    }

    #[test]
    fn test_squared_error_extreme_readings() {
        let error = squared_error(&[i64::MIN; 4], &[i64::MAX; 4]);
        assert!(error.is_finite());
        assert!(error > 1e38);
        let error = squared_error(&[i64::MAX, 0, 0, 0], &[0, 0, 0, 0]);
        assert_eq!(error, (i64::MAX as f64).powi(2));
    }

    /// Scaled standard normal draws, in the order a `NoiseModel` consumes them.
    fn scaled_draws(seed: u64, sigma: f64, count: usize) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|_| {
                let z: f64 = StandardNormal.sample(&mut rng);
                z * sigma
            })
            .collect()
    }

    #[test]
    fn test_noise_offsets_truncate_toward_zero() {
        let noise = NoiseModel::new(0.9, 0.9).unwrap();
        let draws = scaled_draws(17, 0.9, 400);
        let mut rng = StdRng::seed_from_u64(17);
        let offsets: Vec<i64> = (0..400)
            .map(|k| {
                if k % 2 == 0 {
                    noise.motion_offset(&mut rng)
                } else {
                    noise.measurement_offset(&mut rng)
                }
            })
            .collect();

        let mut small_negative = 0;
        let mut large_negative = 0;
        for (&x, &offset) in draws.iter().zip(&offsets) {
            assert_eq!(offset, x.trunc() as i64, "draw {x}");
            if x.abs() < 1.0 {
                assert_eq!(offset, 0, "draw {x}");
            }
            if (-1.0..-0.5).contains(&x) {
                small_negative += 1;
            }
            if x < -1.0 {
                // -1.7 becomes -1, not -2
                assert_eq!(offset, x.ceil() as i64, "draw {x}");
                large_negative += 1;
            }
        }
        assert!(small_negative > 0 && large_negative > 0);
        assert!(offsets.iter().all(|o| o.abs() <= 4));
    }

    #[test]
    fn test_motion_noise_truncates_toward_zero() {
        let grid = Grid::open(41, 41);
        let noise = NoiseModel::new(0.9, 0.0).unwrap();
        let mut rng = StdRng::seed_from_u64(23);
        let draws = scaled_draws(23, 0.9, 2 * 50);
        for step in draws.chunks(2) {
            let start = grid.to_index(20, 20).unwrap();
            let mut particle = Particle::new(start, Heading::North, 1.0, noise);
            let forward = Action::Relative(RelativeDirection::Forward);
            assert!(particle.apply(forward, &grid, &mut rng));
            let expected = (20 + step[0].trunc() as i64, 19 + step[1].trunc() as i64);
            assert_eq!(particle.coordinates(&grid), expected, "draws {step:?}");
        }
    }

    #[test]
    fn test_measurement_noise_truncates_toward_zero() {
        let grid = Grid::open(21, 21);
        let noise = NoiseModel::new(0.0, 0.9).unwrap();
        let particle = Particle::new(grid.to_index(10, 10).unwrap(), Heading::East, 1.0, noise);
        let mut rng = StdRng::seed_from_u64(31);
        let draws = scaled_draws(31, 0.9, 4 * 50);
        for sample in draws.chunks(4) {
            let reading = particle.measure(&grid, &mut rng);
            for (slot, &x) in sample.iter().enumerate() {
                assert_eq!(reading[slot], 10 + x.trunc() as i64, "draw {x}");
            }
        }
    }
}
