//! Importance-resampling particle filter over an occupancy grid.
//!
//! One call to [`resample_step`] is a full Bayesian update: draw N particles
//! from the prior in proportion to their weights (roulette wheel over the
//! cumulative weights), push each copy through the motion model, weigh it by a
//! Gaussian likelihood of its simulated range readings against the measured
//! ones, and normalize. The prior set is never mutated and every output
//! particle is an independent copy, so a failed step leaves the caller's set
//! untouched.
//!
//! The likelihood is floored (`weight_floor`, 1e-4 by default). Without the
//! floor a run of bad readings can drive every weight to zero and the
//! cumulative array would stall; in that case the step fails with
//! [`LocalizationError::DegenerateFilter`] instead of dividing by zero.
use log::{debug, trace, warn};
use nalgebra::{Matrix2, Vector2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt::{self, Debug};
use std::sync::Arc;

use crate::error::{LocalizationError, Result};
use crate::grid::Grid;
use crate::orientation::Heading;
use crate::particle::{Action, Measurement, NoiseModel, Particle, squared_error};

pub const DEFAULT_WEIGHT_FLOOR: f64 = 1e-4;
pub const DEFAULT_LIKELIHOOD_SIGMA: f64 = 2.0;
pub const DEFAULT_NUM_PARTICLES: usize = 1000;

/// How [`PoseEstimate`] collapses the particle set into one pose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum AveragingStrategy {
    WeightedAverage,
    UnweightedAverage,
    HighestWeight,
}
impl Default for AveragingStrategy {
    fn default() -> Self {
        AveragingStrategy::WeightedAverage
    }
}

/// Particle filter tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub num_particles: usize,
    /// Lower bound on any particle's likelihood weight
    pub weight_floor: f64,
    /// Standard deviation (cells) of the Gaussian sensor likelihood
    pub likelihood_sigma: f64,
    /// Per-axis motion noise of each particle (cells)
    pub motion_sigma: f64,
    /// Range noise of each particle's simulated readings (cells)
    pub measurement_sigma: f64,
    pub averaging: AveragingStrategy,
    /// Spread per-particle work over the rayon thread pool
    pub parallel: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            num_particles: DEFAULT_NUM_PARTICLES,
            weight_floor: DEFAULT_WEIGHT_FLOOR,
            likelihood_sigma: DEFAULT_LIKELIHOOD_SIGMA,
            motion_sigma: NoiseModel::DEFAULT_SIGMA,
            measurement_sigma: NoiseModel::DEFAULT_SIGMA,
            averaging: AveragingStrategy::default(),
            parallel: false,
        }
    }
}

impl FilterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_particles == 0 {
            return Err(LocalizationError::InvalidParameter(
                "num_particles must be positive".to_string(),
            ));
        }
        self.validate_weighting()
    }

    /// Everything but the particle count, which an explicit particle set overrides.
    fn validate_weighting(&self) -> Result<()> {
        if !self.weight_floor.is_finite() || self.weight_floor < 0.0 {
            return Err(LocalizationError::InvalidParameter(format!(
                "weight_floor must be finite and non-negative, got {}",
                self.weight_floor
            )));
        }
        if !self.likelihood_sigma.is_finite() || self.likelihood_sigma <= 0.0 {
            return Err(LocalizationError::InvalidParameter(format!(
                "likelihood_sigma must be finite and positive, got {}",
                self.likelihood_sigma
            )));
        }
        self.noise_model().map(|_| ())
    }

    /// Noise model handed to every initialized particle.
    pub fn noise_model(&self) -> Result<NoiseModel> {
        NoiseModel::new(self.motion_sigma, self.measurement_sigma)
    }
}

/// Normal probability density.
pub fn gaussian_pdf(x: f64, mean: f64, sigma: f64) -> f64 {
    let z = (x - mean) / sigma;
    (-0.5 * z * z).exp() / (sigma * (2.0 * PI).sqrt())
}

/// Uniform prior: `n` particles spread over the free cells with random headings.
///
/// When there are fewer free cells than particles the pool of free cells is
/// doubled until it is large enough, then `n` entries are drawn without
/// replacement. Each free cell then holds `n / |free|` particles in
/// expectation.
pub fn initialize_particles<R: Rng>(
    grid: &Grid,
    n: usize,
    noise: NoiseModel,
    rng: &mut R,
) -> Result<Vec<Particle>> {
    if n == 0 {
        return Err(LocalizationError::InvalidParameter(
            "particle count must be positive".to_string(),
        ));
    }
    let mut pool = grid.free_cells();
    if pool.is_empty() {
        return Err(LocalizationError::InsufficientFreeSpace { requested: n });
    }
    while pool.len() < n {
        pool.extend_from_within(..);
    }
    let weight = 1.0 / n as f64;
    let picks = rand::seq::index::sample(rng, pool.len(), n);
    Ok(picks
        .into_iter()
        .map(|k| {
            let heading = Heading::COMPASS[rng.random_range(0..Heading::COMPASS.len())];
            Particle::new(pool[k], heading, weight, noise)
        })
        .collect())
}

fn cumulative_weights(particles: &[Particle]) -> Result<Vec<f64>> {
    if particles.is_empty() {
        return Err(LocalizationError::DegenerateFilter(
            "cannot resample an empty particle set".to_string(),
        ));
    }
    if let Some(bad) = particles.iter().find(|p| !(p.weight >= 0.0)) {
        return Err(LocalizationError::DegenerateFilter(format!(
            "invalid particle weight {}",
            bad.weight
        )));
    }
    let cumulative: Vec<f64> = particles
        .iter()
        .scan(0.0, |running, p| {
            *running += p.weight;
            Some(*running)
        })
        .collect();
    let total = cumulative[cumulative.len() - 1];
    if !(total.is_finite() && total > 0.0) {
        warn!("Prior weights sum to {total}; refusing to resample");
        return Err(LocalizationError::DegenerateFilter(format!(
            "prior weights sum to {total}"
        )));
    }
    Ok(cumulative)
}

/// Smallest `k` with `cumulative[k] > r`, or the last index if none qualifies.
pub fn select_index(cumulative: &[f64], r: f64) -> usize {
    cumulative
        .partition_point(|&c| c <= r)
        .min(cumulative.len().saturating_sub(1))
}

fn propagate_and_weigh<R: Rng>(
    mut particle: Particle,
    grid: &Grid,
    measured: &Measurement,
    action: Action,
    config: &FilterConfig,
    rng: &mut R,
) -> Particle {
    particle.apply(action, grid, rng);
    let expected = particle.measure(grid, rng);
    let error = squared_error(measured, &expected);
    particle.weight =
        gaussian_pdf(error.sqrt(), 0.0, config.likelihood_sigma).max(config.weight_floor);
    particle
}

fn normalize(particles: &mut [Particle]) -> Result<f64> {
    let weight_sum: f64 = particles.iter().map(|p| p.weight).sum();
    if !(weight_sum.is_finite() && weight_sum > 0.0) {
        warn!("Posterior weights sum to {weight_sum}");
        return Err(LocalizationError::DegenerateFilter(format!(
            "posterior weights sum to {weight_sum}"
        )));
    }
    for particle in particles.iter_mut() {
        particle.weight /= weight_sum;
    }
    Ok(weight_sum)
}

/// One filter step: resample, apply `action`, reweigh against `measured`, normalize.
pub fn resample_step<R: Rng>(
    particles: &[Particle],
    grid: &Grid,
    measured: &Measurement,
    action: Action,
    config: &FilterConfig,
    rng: &mut R,
) -> Result<Vec<Particle>> {
    let cumulative = cumulative_weights(particles)?;
    let total = cumulative[cumulative.len() - 1];
    let mut posterior = Vec::with_capacity(particles.len());
    for _ in 0..particles.len() {
        let r = rng.random::<f64>() * total;
        let k = select_index(&cumulative, r);
        trace!("r = {r:.6} selected particle {k}");
        posterior.push(propagate_and_weigh(
            particles[k].clone(),
            grid,
            measured,
            action,
            config,
            rng,
        ));
    }
    let weight_sum = normalize(&mut posterior)?;
    debug!("Resampled {} particles, raw weight sum {weight_sum:.6}", posterior.len());
    Ok(posterior)
}

/// [`resample_step`] with per-particle work on the rayon pool.
///
/// Selections and one seed per output slot come from `rng` up front; each
/// slot then draws its noise from its own `StdRng`, so the result depends only
/// on the state of `rng` and not on thread scheduling.
pub fn resample_step_parallel<R: Rng>(
    particles: &[Particle],
    grid: &Grid,
    measured: &Measurement,
    action: Action,
    config: &FilterConfig,
    rng: &mut R,
) -> Result<Vec<Particle>> {
    let cumulative = cumulative_weights(particles)?;
    let total = cumulative[cumulative.len() - 1];
    let draws: Vec<(usize, u64)> = (0..particles.len())
        .map(|_| {
            let k = select_index(&cumulative, rng.random::<f64>() * total);
            (k, rng.random::<u64>())
        })
        .collect();
    let mut posterior: Vec<Particle> = draws
        .into_par_iter()
        .map(|(k, seed)| {
            let mut slot_rng = StdRng::seed_from_u64(seed);
            propagate_and_weigh(
                particles[k].clone(),
                grid,
                measured,
                action,
                config,
                &mut slot_rng,
            )
        })
        .collect();
    let weight_sum = normalize(&mut posterior)?;
    debug!(
        "Resampled {} particles in parallel, raw weight sum {weight_sum:.6}",
        posterior.len()
    );
    Ok(posterior)
}

/// Effective number of particles, `1 / Σ w²` over normalized weights.
pub fn effective_sample_size(particles: &[Particle]) -> f64 {
    let total: f64 = particles.iter().map(|p| p.weight).sum();
    if !(total > 0.0) {
        return 0.0;
    }
    let sum_of_squares: f64 = particles.iter().map(|p| (p.weight / total).powi(2)).sum();
    1.0 / sum_of_squares
}

/// Summary of the particle set as a single pose.
#[derive(Clone, Debug, PartialEq)]
pub struct PoseEstimate {
    /// Mean cell coordinates `(i, j)`
    pub mean: Vector2<f64>,
    pub covariance: Matrix2<f64>,
    /// Heading carrying the most weight
    pub heading: Heading,
    /// Weight mass per heading, in [`Heading::COMPASS`] order
    pub heading_weights: [f64; 4],
    pub effective_sample_size: f64,
}

impl PoseEstimate {
    pub fn from_particles(
        particles: &[Particle],
        grid: &Grid,
        strategy: AveragingStrategy,
    ) -> Result<PoseEstimate> {
        if particles.is_empty() {
            return Err(LocalizationError::DegenerateFilter(
                "cannot estimate from an empty particle set".to_string(),
            ));
        }
        let n = particles.len() as f64;
        let total: f64 = particles.iter().map(|p| p.weight).sum();
        let weights: Vec<f64> = match strategy {
            AveragingStrategy::UnweightedAverage => vec![1.0 / n; particles.len()],
            AveragingStrategy::WeightedAverage | AveragingStrategy::HighestWeight => {
                if !(total.is_finite() && total > 0.0) {
                    return Err(LocalizationError::DegenerateFilter(format!(
                        "particle weights sum to {total}"
                    )));
                }
                particles.iter().map(|p| p.weight / total).collect()
            }
        };

        let mut heading_weights = [0.0; 4];
        for (particle, &w) in particles.iter().zip(&weights) {
            let slot = Heading::COMPASS
                .iter()
                .position(|&h| h == particle.heading)
                .unwrap_or(0);
            heading_weights[slot] += w;
        }
        let heading = Heading::COMPASS
            .into_iter()
            .zip(heading_weights)
            .fold((Heading::North, f64::NEG_INFINITY), |best, (h, w)| {
                if w > best.1 { (h, w) } else { best }
            })
            .0;

        let cell = |p: &Particle| {
            let (i, j) = p.coordinates(grid);
            Vector2::new(i as f64, j as f64)
        };
        let (mean, covariance) = match strategy {
            AveragingStrategy::HighestWeight => {
                let best = particles
                    .iter()
                    .max_by(|a, b| a.weight.total_cmp(&b.weight))
                    .ok_or_else(|| {
                        LocalizationError::DegenerateFilter("no particles".to_string())
                    })?;
                (cell(best), Matrix2::zeros())
            }
            _ => {
                let mean = particles
                    .iter()
                    .zip(&weights)
                    .fold(Vector2::zeros(), |acc, (p, &w)| acc + cell(p) * w);
                let covariance =
                    particles
                        .iter()
                        .zip(&weights)
                        .fold(Matrix2::zeros(), |acc, (p, &w)| {
                            let diff = cell(p) - mean;
                            acc + diff * diff.transpose() * w
                        });
                (mean, covariance)
            }
        };

        Ok(PoseEstimate {
            mean,
            covariance,
            heading,
            heading_weights,
            effective_sample_size: effective_sample_size(particles),
        })
    }
}

/// Particle set bound to a map, advanced one action at a time.
#[derive(Clone)]
pub struct ParticleFilter {
    grid: Arc<Grid>,
    particles: Vec<Particle>,
    config: FilterConfig,
    steps: usize,
}

impl Debug for ParticleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let min_weight = self
            .particles
            .iter()
            .map(|p| p.weight)
            .fold(f64::INFINITY, f64::min);
        let max_weight = self.particles.iter().map(|p| p.weight).fold(0.0, f64::max);
        f.debug_struct("ParticleFilter")
            .field("num_particles", &self.particles.len())
            .field("steps", &self.steps)
            .field(
                "effective_particles",
                &effective_sample_size(&self.particles),
            )
            .field(
                "weight_range",
                &format_args!("[{:.4e}, {:.4e}]", min_weight, max_weight),
            )
            .field(
                "grid",
                &format_args!("{} x {}", self.grid.rows(), self.grid.cols()),
            )
            .finish()
    }
}

impl ParticleFilter {
    /// Validate `config` and draw a uniform prior over the free cells of `grid`.
    pub fn new<R: Rng>(grid: Arc<Grid>, config: FilterConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let particles =
            initialize_particles(&grid, config.num_particles, config.noise_model()?, rng)?;
        debug!(
            "Initialized {} particles over {} free cells",
            particles.len(),
            grid.free_cells().len()
        );
        Ok(ParticleFilter {
            grid,
            particles,
            config,
            steps: 0,
        })
    }

    /// Start from an explicit particle set; `config.num_particles` is ignored.
    ///
    /// Every particle must sit on a cell of `grid`.
    pub fn from_particles(
        grid: Arc<Grid>,
        particles: Vec<Particle>,
        config: FilterConfig,
    ) -> Result<Self> {
        config.validate_weighting()?;
        if particles.is_empty() {
            return Err(LocalizationError::InvalidParameter(
                "particle set must not be empty".to_string(),
            ));
        }
        if let Some(stray) = particles.iter().find(|p| p.position >= grid.len()) {
            return Err(LocalizationError::InvalidParameter(format!(
                "particle at index {} lies outside the {} x {} grid",
                stray.position,
                grid.rows(),
                grid.cols()
            )));
        }
        Ok(ParticleFilter {
            grid,
            particles,
            config,
            steps: 0,
        })
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Number of completed filter steps.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Advance by one executed `action` and its `measured` readings.
    ///
    /// On error the particle set is left as it was.
    pub fn step<R: Rng>(
        &mut self,
        measured: &Measurement,
        action: Action,
        rng: &mut R,
    ) -> Result<()> {
        let (particles, grid, config) = (&self.particles, &self.grid, &self.config);
        let posterior = if config.parallel {
            resample_step_parallel(particles, grid, measured, action, config, rng)?
        } else {
            resample_step(particles, grid, measured, action, config, rng)?
        };
        self.particles = posterior;
        self.steps += 1;
        debug!(
            "Step {} ({action}, measured {measured:?}): ESS {:.1}",
            self.steps,
            self.effective_sample_size()
        );
        Ok(())
    }

    pub fn estimate(&self) -> Result<PoseEstimate> {
        PoseEstimate::from_particles(&self.particles, &self.grid, self.config.averaging)
    }

    pub fn effective_sample_size(&self) -> f64 {
        effective_sample_size(&self.particles)
    }
}
