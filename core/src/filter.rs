//! Sequential importance sampling particle filter.
//!
//! The engine is generic over a [`StateSpaceModel`]. For a series of `T` measurements it keeps
//! `N` particle trajectories of `T + 1` states each and produces:
//!
//! - the weight matrix, `(T + 1) × N`, row 0 uniform and every row normalized
//! - the effective sample size per step, `ess[0] = N`
//! - the weighted posterior mean, `(T + 1) × n`, row 0 left at zero
//! - a [`StabilizationReport`] of clamp substitutions made in the weight update
//!
//! At step `k` every particle is proposed from the model's importance distribution for
//! measurement row `k − 1` and reweighted by `p(y | x) p(x | x_prev) / q(x)` in the log domain.
//! Resampling is optional and happens after the posterior mean has been taken, so the weight row
//! written for step `k` is always the normalized pre-resampling row.
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::errors::FilterError;
use crate::model::StateSpaceModel;
use crate::numerics::{StabilizationReport, update_weight};
use crate::resampling::{ParticleResamplingStrategy, Resampler};

/// Particle filter run settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    pub num_particles: usize,
    /// RNG seed; `None` (or `null` in JSON/YAML) seeds from entropy.
    #[serde(default = "default_seed")]
    pub seed: Option<u64>,
    #[serde(default)]
    pub resampling_strategy: ParticleResamplingStrategy,
    /// Resample when ESS falls below this fraction of the particle count.
    #[serde(default = "default_effective_sample_threshold")]
    pub effective_sample_threshold: f64,
}

fn default_seed() -> Option<u64> {
    Some(42)
}

fn default_effective_sample_threshold() -> f64 {
    0.5
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            num_particles: 100,
            seed: default_seed(),
            resampling_strategy: ParticleResamplingStrategy::None,
            effective_sample_threshold: default_effective_sample_threshold(),
        }
    }
}

impl FilterConfig {
    pub fn validate(&self) -> Result<(), FilterError> {
        if self.num_particles == 0 {
            return Err(FilterError::configuration("num_particles must be positive"));
        }
        let threshold = self.effective_sample_threshold;
        if !(threshold.is_finite() && threshold > 0.0 && threshold <= 1.0) {
            return Err(FilterError::configuration(format!(
                "effective_sample_threshold must be in (0, 1], got {threshold}"
            )));
        }
        Ok(())
    }
}

/// Everything a run hands back.
#[derive(Clone, Debug)]
pub struct FilterOutput {
    /// `(T + 1) × n`, row 0 is zero
    pub posterior_mean: DMatrix<f64>,
    /// `(T + 1) × N`, normalized rows
    pub weights: DMatrix<f64>,
    /// Length `T + 1`
    pub ess: DVector<f64>,
    pub stabilization: StabilizationReport,
    /// Steps (1-based) after which the particle set was resampled
    pub resampled_steps: Vec<usize>,
}

impl FilterOutput {
    pub fn num_steps(&self) -> usize {
        self.ess.len().saturating_sub(1)
    }

    pub fn min_ess(&self) -> f64 {
        self.ess.iter().copied().fold(f64::INFINITY, f64::min)
    }
}

/// Normalize a weight vector to sum to one.
///
/// Weights are scaled by their maximum before summing so that saturated entries cannot overflow
/// the sum. If the maximum or the scaled sum is not positive and finite, the uniform vector is
/// returned instead.
pub fn normalize_weights(weights: &[f64]) -> Vec<f64> {
    let n = weights.len();
    if n == 0 {
        return Vec::new();
    }
    let uniform = || vec![1.0 / n as f64; n];
    let max = weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(max > 0.0 && max.is_finite()) {
        return uniform();
    }
    let scaled: Vec<f64> = weights.iter().map(|w| w / max).collect();
    let sum: f64 = scaled.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        scaled.into_iter().map(|w| w / sum).collect()
    } else {
        uniform()
    }
}

/// `1 / Σ w²` for normalized weights, kept within `[1, N]`.
pub fn effective_sample_size(weights: &[f64]) -> f64 {
    let n = weights.len() as f64;
    let sum_of_squares: f64 = weights.iter().map(|w| w * w).sum();
    if sum_of_squares > 0.0 {
        (1.0 / sum_of_squares).clamp(1.0, n.max(1.0))
    } else {
        0.0
    }
}

/// Sequential importance sampling over a state-space model.
pub struct ParticleFilter<M: StateSpaceModel> {
    model: M,
    config: FilterConfig,
    resampler: Box<dyn Resampler>,
}

impl<M: StateSpaceModel> ParticleFilter<M> {
    /// Create a filter using the resampling strategy named in `config`.
    pub fn new(model: M, config: FilterConfig) -> Result<Self, FilterError> {
        config.validate()?;
        let resampler = Box::new(config.resampling_strategy);
        Ok(Self {
            model,
            config,
            resampler,
        })
    }

    /// Replace the resampling strategy with a custom one.
    pub fn with_resampler<R: Resampler + 'static>(mut self, resampler: R) -> Self {
        self.resampler = Box::new(resampler);
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    fn check_measurements(&self, measurements: &DMatrix<f64>) -> Result<(), FilterError> {
        if measurements.nrows() == 0 {
            return Err(FilterError::EmptyMeasurements);
        }
        let m = self.model.measurement_dim();
        if measurements.ncols() != m {
            return Err(FilterError::dimension(
                m,
                measurements.ncols(),
                "measurement columns",
            ));
        }
        if self.model.num_steps() != measurements.nrows() {
            return Err(FilterError::dimension(
                measurements.nrows(),
                self.model.num_steps(),
                "baseline rows",
            ));
        }
        if let Some(row) = measurements
            .row_iter()
            .position(|r| r.iter().any(|v| !v.is_finite()))
        {
            return Err(FilterError::configuration(format!(
                "measurement row {row} contains non-finite values"
            )));
        }
        Ok(())
    }

    /// Run the filter over a `T × m` measurement series.
    pub fn run(&self, measurements: &DMatrix<f64>) -> Result<FilterOutput, FilterError> {
        self.check_measurements(measurements)?;

        let num_particles = self.config.num_particles;
        let steps = measurements.nrows();
        let n = self.model.state_dim();
        let uniform = 1.0 / num_particles as f64;
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::seed_from_u64(rand::random()),
        };

        info!(
            "Running particle filter: {} particles, {} steps, resampling {:?}",
            num_particles, steps, self.config.resampling_strategy
        );

        let mut weights = DMatrix::<f64>::zeros(steps + 1, num_particles);
        let mut ess = DVector::<f64>::zeros(steps + 1);
        let mut posterior_mean = DMatrix::<f64>::zeros(steps + 1, n);
        let mut stabilization = StabilizationReport::default();
        let mut resampled_steps = Vec::new();

        let mut particles: Vec<DMatrix<f64>> = (0..num_particles)
            .map(|_| {
                let mut trajectory = DMatrix::<f64>::zeros(steps + 1, n);
                let x0 = self.model.sample_initial(&mut rng);
                trajectory.set_row(0, &x0.transpose());
                trajectory
            })
            .collect();
        weights.row_mut(0).fill(uniform);
        ess[0] = num_particles as f64;
        let mut carried = vec![uniform; num_particles];
        let mut raw = vec![0.0; num_particles];

        for k in 1..=steps {
            let t = k - 1;
            let y = measurements.row(t).transpose();
            for (i, trajectory) in particles.iter_mut().enumerate() {
                let previous = trajectory.row(k - 1).transpose();
                let proposed = self.model.sample_proposal(t, &previous, &mut rng);
                let expected = self.model.expected_measurement(&proposed);
                let log_meas = self.model.measurement_log_density(&y, &expected);
                let log_proc = self.model.process_log_density(&proposed, &previous);
                let log_imp = self.model.proposal_log_density(t, &proposed, &previous);
                let update = update_weight(carried[i], log_meas, log_proc, log_imp);
                stabilization.merge(&update.report);
                raw[i] = update.weight;
                trajectory.set_row(k, &proposed.transpose());
            }

            let normalized = normalize_weights(&raw);
            for (i, w) in normalized.iter().enumerate() {
                weights[(k, i)] = *w;
            }
            ess[k] = effective_sample_size(&normalized);

            let mut mean = DVector::<f64>::zeros(n);
            for (trajectory, w) in particles.iter().zip(normalized.iter()) {
                mean += trajectory.row(k).transpose() * *w;
            }
            posterior_mean.set_row(k, &mean.transpose());
            debug!("step {}: ESS {:.3}", k, ess[k]);
            if num_particles > 1 && ess[k] < 2.0 {
                warn!("Weights degenerate at step {}: ESS {:.3}", k, ess[k]);
            }

            let threshold = self.config.effective_sample_threshold * num_particles as f64;
            if self.resampler.is_active() && ess[k] < threshold {
                let ancestors = self.resampler.resample(&normalized, &mut rng);
                particles = ancestors.iter().map(|&a| particles[a].clone()).collect();
                carried.iter_mut().for_each(|w| *w = uniform);
                resampled_steps.push(k);
                debug!("step {}: resampled", k);
            } else {
                carried = normalized;
            }
        }

        let output = FilterOutput {
            posterior_mean,
            weights,
            ess,
            stabilization,
            resampled_steps,
        };
        info!(
            "Particle filter finished: min ESS {:.3}, {} resampling steps, {} clamped values",
            output.min_ess(),
            output.resampled_steps.len(),
            output.stabilization.total()
        );
        if !output.stabilization.is_clean() {
            info!("Stabilization: {:?}", output.stabilization);
        }
        Ok(output)
    }
}
