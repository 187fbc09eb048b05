//! State-space model for two-sensor bearing-only tracking.
//!
//! The hidden state is `(x, y, vx, vy)` and each measurement is the pair of bearing angles from
//! two fixed sensors to the object. The model owns the four Gaussians the filter needs:
//!
//! - **state prior**: mean `(μx, μy, 0, 0)`, diagonal covariance
//! - **process noise**: discretized constant-velocity diffusion with transition `F`
//! - **measurement noise**: mean recomputed from the proposed state, covariance `diag(σ², σ²)`
//! - **importance proposal**: mean taken from the baseline trajectory, diagonal covariance
//!
//! The engine only sees the [`StateSpaceModel`] trait, so dimensions are never hardcoded there.
use clap::ValueEnum;
use nalgebra::{DMatrix, DVector};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::errors::FilterError;
use crate::gaussian::MultivariateNormal;

/// State dimension: x, y, vx, vy
pub const STATE_DIM: usize = 4;
/// Measurement dimension: one bearing per sensor
pub const MEASUREMENT_DIM: usize = 2;

/// Where the process density is centered when weighting a proposed state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ProcessMeanMode {
    /// Fixed at the first baseline point with zero velocity; the transition is not applied.
    #[default]
    AnchoredBaseline,
    /// `F · x[k−1]` for each particle, i.e. an explicit constant-velocity predict step.
    ConstantVelocity,
}

/// Scalar hyperparameters of the bearings model.
///
/// Covariance terms are the diagonals of the covariance matrices (variances), not of their
/// Cholesky factors. `measurement_std` is the standard deviation of each bearing in radians.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub sensor_1: [f64; 2],
    pub sensor_2: [f64; 2],
    pub dt: f64,
    pub measurement_std: f64,
    /// Diffusion coefficients (q1, q2) for the x and y axes
    pub diffusion: [f64; 2],
    /// Prior position mean; the prior velocity mean is zero
    pub prior_mean: [f64; 2],
    pub prior_covariance: Vec<f64>,
    pub importance_covariance: Vec<f64>,
    #[serde(default)]
    pub process_mean: ProcessMeanMode,
}

impl Default for ModelConfig {
    /// Two sensors roughly 200 m apart in longitude/latitude degrees, one step per second.
    fn default() -> Self {
        ModelConfig {
            sensor_1: [-93.249_466_376_593_2, 41.556_351_860_652_1],
            sensor_2: [-93.247_533_823_2, 41.557_663_235_6],
            dt: 1.0,
            measurement_std: 0.01,
            diffusion: [0.0005, 0.0005],
            prior_mean: [-93.249_520_47, 41.555_753_37],
            prior_covariance: vec![2.5e-17, 1.225e-15, 2.5e-7, 2.5e-7],
            importance_covariance: vec![3.0 * 5.0e-10, 3.0 * 1.75e-8, 3.0 * 5.0e-5, 3.0 * 5.0e-5],
            process_mean: ProcessMeanMode::AnchoredBaseline,
        }
    }
}

impl ModelConfig {
    /// Check scalar parameters. Covariance definiteness is checked when the Gaussians are built.
    pub fn validate(&self) -> Result<(), FilterError> {
        let finite = |name: &str, values: &[f64]| -> Result<(), FilterError> {
            if values.iter().all(|v| v.is_finite()) {
                Ok(())
            } else {
                Err(FilterError::configuration(format!("{name} must be finite")))
            }
        };
        finite("sensor_1", &self.sensor_1[..])?;
        finite("sensor_2", &self.sensor_2[..])?;
        finite("prior_mean", &self.prior_mean[..])?;
        finite("dt", &[self.dt])?;
        finite("measurement_std", &[self.measurement_std])?;
        finite("diffusion", &self.diffusion[..])?;
        if self.dt <= 0.0 {
            return Err(FilterError::configuration("dt must be positive"));
        }
        if self.measurement_std <= 0.0 {
            return Err(FilterError::configuration("measurement_std must be positive"));
        }
        if self.diffusion.iter().any(|q| *q <= 0.0) {
            return Err(FilterError::configuration("diffusion coefficients must be positive"));
        }
        if self.sensor_1 == self.sensor_2 {
            return Err(FilterError::configuration("sensors must be at distinct locations"));
        }
        if self.prior_covariance.len() != STATE_DIM {
            return Err(FilterError::dimension(
                STATE_DIM,
                self.prior_covariance.len(),
                "prior_covariance",
            ));
        }
        if self.importance_covariance.len() != STATE_DIM {
            return Err(FilterError::dimension(
                STATE_DIM,
                self.importance_covariance.len(),
                "importance_covariance",
            ));
        }
        Ok(())
    }
}

/// The interface the particle filter engine is generic over.
///
/// Time indices `t` passed to the proposal are zero-based measurement rows.
pub trait StateSpaceModel {
    fn state_dim(&self) -> usize;
    fn measurement_dim(&self) -> usize;
    /// Number of measurement steps the model can propose for.
    fn num_steps(&self) -> usize;
    fn sample_initial(&self, rng: &mut dyn RngCore) -> DVector<f64>;
    fn sample_proposal(&self, t: usize, previous: &DVector<f64>, rng: &mut dyn RngCore) -> DVector<f64>;
    fn expected_measurement(&self, state: &DVector<f64>) -> DVector<f64>;
    fn measurement_log_density(&self, measurement: &DVector<f64>, expected: &DVector<f64>) -> f64;
    fn process_log_density(&self, state: &DVector<f64>, previous: &DVector<f64>) -> f64;
    fn proposal_log_density(&self, t: usize, state: &DVector<f64>, previous: &DVector<f64>) -> f64;
}

/// State prior: mean `(μx, μy, 0, 0)`, covariance `diag(prior_covariance)`.
pub fn init_state_prior(config: &ModelConfig) -> Result<MultivariateNormal, FilterError> {
    let mean = DVector::from_vec(vec![config.prior_mean[0], config.prior_mean[1], 0.0, 0.0]);
    MultivariateNormal::from_variances(mean, &config.prior_covariance, "prior covariance")
}

/// Discretized constant-velocity process covariance.
///
/// For each axis the block over (position, velocity) is
/// `[[q dt³/3, q dt²/2], [q dt²/2, q dt]]`; there are no cross-axis terms.
pub fn process_covariance(dt: f64, diffusion: [f64; 2]) -> DMatrix<f64> {
    let mut q = DMatrix::<f64>::zeros(STATE_DIM, STATE_DIM);
    for (axis, q_a) in diffusion.iter().enumerate() {
        let (pos, vel) = (axis, axis + 2);
        q[(pos, pos)] = q_a * dt.powi(3) / 3.0;
        q[(pos, vel)] = q_a * dt.powi(2) / 2.0;
        q[(vel, pos)] = q_a * dt.powi(2) / 2.0;
        q[(vel, vel)] = q_a * dt;
    }
    q
}

/// Constant-velocity transition: identity with position += velocity · dt.
pub fn transition_matrix(dt: f64) -> DMatrix<f64> {
    let mut f = DMatrix::<f64>::identity(STATE_DIM, STATE_DIM);
    f[(0, 2)] = dt;
    f[(1, 3)] = dt;
    f
}

/// Process noise centered at the first baseline row (zero velocity), plus the transition matrix.
pub fn init_process_noise(
    config: &ModelConfig,
    baseline: &DMatrix<f64>,
) -> Result<(MultivariateNormal, DMatrix<f64>), FilterError> {
    if baseline.nrows() == 0 {
        return Err(FilterError::EmptyMeasurements);
    }
    if baseline.ncols() < 2 {
        return Err(FilterError::dimension(2, baseline.ncols(), "baseline columns"));
    }
    let mean = DVector::from_vec(vec![baseline[(0, 0)], baseline[(0, 1)], 0.0, 0.0]);
    let noise = MultivariateNormal::new(
        mean,
        &process_covariance(config.dt, config.diffusion),
        "process covariance",
    )?;
    Ok((noise, transition_matrix(config.dt)))
}

/// Importance proposal with covariance `diag(importance_covariance)`. The mean is set per step.
pub fn init_importance_proposal(config: &ModelConfig) -> Result<MultivariateNormal, FilterError> {
    MultivariateNormal::from_variances(
        DVector::zeros(STATE_DIM),
        &config.importance_covariance,
        "importance covariance",
    )
}

/// Measurement noise with covariance `diag(σ², σ²)`. The mean is recomputed per particle.
pub fn init_measurement_noise(config: &ModelConfig) -> Result<MultivariateNormal, FilterError> {
    let variance = config.measurement_std * config.measurement_std;
    MultivariateNormal::from_variances(
        DVector::zeros(MEASUREMENT_DIM),
        &[variance, variance],
        "measurement covariance",
    )
}

/// Bearings from each sensor to the position in `state`: `atan2(y − ly, x − lx)`.
pub fn measurement_mean(sensor_1: &[f64; 2], sensor_2: &[f64; 2], state: &DVector<f64>) -> DVector<f64> {
    let (x, y) = (state[0], state[1]);
    DVector::from_vec(vec![
        (y - sensor_1[1]).atan2(x - sensor_1[0]),
        (y - sensor_2[1]).atan2(x - sensor_2[0]),
    ])
}

/// Bearing-only tracking model with two fixed sensors.
#[derive(Clone, Debug)]
pub struct BearingsModel {
    config: ModelConfig,
    baseline: DMatrix<f64>,
    prior: MultivariateNormal,
    process: MultivariateNormal,
    transition: DMatrix<f64>,
    measurement: MultivariateNormal,
    importance: MultivariateNormal,
}

impl BearingsModel {
    /// Build all four distributions from the configuration and the baseline trajectory.
    ///
    /// # Arguments
    /// * `config` - model hyperparameters
    /// * `baseline` - T×(≥2) matrix whose first two columns are x and y for each step
    pub fn new(config: ModelConfig, baseline: DMatrix<f64>) -> Result<Self, FilterError> {
        config.validate()?;
        if baseline.nrows() == 0 {
            return Err(FilterError::EmptyMeasurements);
        }
        if baseline.ncols() < 2 {
            return Err(FilterError::dimension(2, baseline.ncols(), "baseline columns"));
        }
        if baseline.columns(0, 2).iter().any(|v| !v.is_finite()) {
            return Err(FilterError::configuration("baseline contains non-finite values"));
        }
        let prior = init_state_prior(&config)?;
        let (process, transition) = init_process_noise(&config, &baseline)?;
        let measurement = init_measurement_noise(&config)?;
        let importance = init_importance_proposal(&config)?;
        Ok(BearingsModel {
            config,
            baseline,
            prior,
            process,
            transition,
            measurement,
            importance,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn baseline(&self) -> &DMatrix<f64> {
        &self.baseline
    }

    /// Deterministic constant-velocity prediction `F · previous`.
    pub fn predict(&self, previous: &DVector<f64>) -> DVector<f64> {
        &self.transition * previous
    }

    /// Proposal mean for measurement row `t`: the baseline position with zero velocity.
    pub fn importance_mean(&self, t: usize) -> DVector<f64> {
        DVector::from_vec(vec![self.baseline[(t, 0)], self.baseline[(t, 1)], 0.0, 0.0])
    }

    /// Center of the process density for a particle whose previous state is `previous`.
    pub fn process_mean(&self, previous: &DVector<f64>) -> DVector<f64> {
        match self.config.process_mean {
            ProcessMeanMode::AnchoredBaseline => self.process.mean().clone(),
            ProcessMeanMode::ConstantVelocity => self.predict(previous),
        }
    }
}

impl StateSpaceModel for BearingsModel {
    fn state_dim(&self) -> usize {
        STATE_DIM
    }

    fn measurement_dim(&self) -> usize {
        MEASUREMENT_DIM
    }

    fn num_steps(&self) -> usize {
        self.baseline.nrows()
    }

    fn sample_initial(&self, rng: &mut dyn RngCore) -> DVector<f64> {
        self.prior.sample(rng)
    }

    fn sample_proposal(&self, t: usize, _previous: &DVector<f64>, rng: &mut dyn RngCore) -> DVector<f64> {
        crate::gaussian::sample(rng, &self.importance_mean(t), self.importance.cholesky())
    }

    fn expected_measurement(&self, state: &DVector<f64>) -> DVector<f64> {
        measurement_mean(&self.config.sensor_1, &self.config.sensor_2, state)
    }

    fn measurement_log_density(&self, measurement: &DVector<f64>, expected: &DVector<f64>) -> f64 {
        self.measurement.log_density_at(measurement, expected)
    }

    fn process_log_density(&self, state: &DVector<f64>, previous: &DVector<f64>) -> f64 {
        self.process.log_density_at(state, &self.process_mean(previous))
    }

    fn proposal_log_density(&self, t: usize, state: &DVector<f64>, _previous: &DVector<f64>) -> f64 {
        self.importance.log_density_at(state, &self.importance_mean(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::f64::consts::FRAC_PI_4;

    fn simple_config() -> ModelConfig {
        ModelConfig {
            sensor_1: [0.0, 0.0],
            sensor_2: [100.0, 0.0],
            dt: 1.0,
            measurement_std: 0.01,
            diffusion: [1.0, 2.0],
            prior_mean: [50.0, 50.0],
            prior_covariance: vec![4.0, 4.0, 4.0, 4.0],
            importance_covariance: vec![0.5, 0.5, 1.0, 1.0],
            process_mean: ProcessMeanMode::AnchoredBaseline,
        }
    }

    fn baseline() -> DMatrix<f64> {
        DMatrix::from_row_slice(3, 2, &[50.0, 50.0, 51.0, 50.5, 52.0, 51.0])
    }

    #[test]
    fn test_default_config_builds() {
        let config = ModelConfig::default();
        let base = DMatrix::from_row_slice(1, 2, &[-93.2495, 41.5557]);
        let model = BearingsModel::new(config, base).expect("reference configuration is valid");
        assert_eq!(model.state_dim(), 4);
        assert_eq!(model.measurement_dim(), 2);
        assert_eq!(model.num_steps(), 1);
        assert_eq!(model.baseline().nrows(), 1);
        assert_eq!(model.config(), &ModelConfig::default());
    }

    #[test]
    fn test_prior() {
        let prior = init_state_prior(&simple_config()).unwrap();
        assert_eq!(prior.mean().as_slice(), &[50.0, 50.0, 0.0, 0.0]);
        assert_approx_eq!(prior.cholesky()[(0, 0)], 2.0, 1e-15);
        assert_approx_eq!(prior.cholesky()[(3, 3)], 2.0, 1e-15);
    }

    #[test]
    fn test_process_covariance_blocks() {
        let q = process_covariance(2.0, [3.0, 5.0]);
        assert_approx_eq!(q[(0, 0)], 3.0 * 8.0 / 3.0, 1e-12);
        assert_approx_eq!(q[(0, 2)], 3.0 * 4.0 / 2.0, 1e-12);
        assert_approx_eq!(q[(2, 0)], 3.0 * 4.0 / 2.0, 1e-12);
        assert_approx_eq!(q[(2, 2)], 3.0 * 2.0, 1e-12);
        assert_approx_eq!(q[(1, 1)], 5.0 * 8.0 / 3.0, 1e-12);
        assert_approx_eq!(q[(1, 3)], 5.0 * 4.0 / 2.0, 1e-12);
        assert_approx_eq!(q[(3, 3)], 5.0 * 2.0, 1e-12);
        // no cross-axis coupling
        assert_eq!(q[(0, 1)], 0.0);
        assert_eq!(q[(0, 3)], 0.0);
        assert_eq!(q[(2, 3)], 0.0);
        assert_eq!(q[(1, 2)], 0.0);
    }

    #[test]
    fn test_process_noise_factor_reconstructs() {
        let config = simple_config();
        let (noise, f) = init_process_noise(&config, &baseline()).unwrap();
        let expected = process_covariance(config.dt, config.diffusion);
        assert!((noise.covariance() - expected).norm() < 1e-12);
        assert_eq!(noise.mean().as_slice(), &[50.0, 50.0, 0.0, 0.0]);
        assert_eq!(f, transition_matrix(1.0));
    }

    #[test]
    fn test_transition_and_predict() {
        let mut config = simple_config();
        config.dt = 0.5;
        let model = BearingsModel::new(config, baseline()).unwrap();
        let previous = DVector::from_vec(vec![1.0, 2.0, 4.0, -2.0]);
        let predicted = model.predict(&previous);
        assert_eq!(predicted.as_slice(), &[3.0, 1.0, 4.0, -2.0]);
    }

    #[test]
    fn test_measurement_mean() {
        let state = DVector::from_vec(vec![50.0, 50.0, 0.0, 0.0]);
        let bearings = measurement_mean(&[0.0, 0.0], &[100.0, 0.0], &state);
        assert_approx_eq!(bearings[0], FRAC_PI_4, 1e-15);
        assert_approx_eq!(bearings[1], 3.0 * FRAC_PI_4, 1e-15);
    }

    #[test]
    fn test_measurement_noise_uses_std() {
        let noise = init_measurement_noise(&simple_config()).unwrap();
        let cov = noise.covariance();
        assert_approx_eq!(cov[(0, 0)], 1e-4, 1e-18);
        assert_approx_eq!(cov[(1, 1)], 1e-4, 1e-18);
        assert_eq!(cov[(0, 1)], 0.0);
    }

    #[test]
    fn test_importance_mean_follows_baseline() {
        let model = BearingsModel::new(simple_config(), baseline()).unwrap();
        assert_eq!(model.importance_mean(1).as_slice(), &[51.0, 50.5, 0.0, 0.0]);
        let mut rng = StdRng::seed_from_u64(3);
        let draw = model.sample_proposal(2, &DVector::zeros(4), &mut rng);
        assert!((draw[0] - 52.0).abs() < 5.0);
        assert!((draw[1] - 51.0).abs() < 5.0);
    }

    #[test]
    fn test_process_mean_modes() {
        let previous = DVector::from_vec(vec![10.0, 20.0, 1.0, 1.0]);
        let anchored = BearingsModel::new(simple_config(), baseline()).unwrap();
        assert_eq!(anchored.process_mean(&previous).as_slice(), &[50.0, 50.0, 0.0, 0.0]);

        let mut config = simple_config();
        config.process_mean = ProcessMeanMode::ConstantVelocity;
        let cv = BearingsModel::new(config, baseline()).unwrap();
        assert_eq!(cv.process_mean(&previous).as_slice(), &[11.0, 21.0, 1.0, 1.0]);
    }

    #[test]
    fn test_measurement_log_density_peaks_at_expected() {
        let model = BearingsModel::new(simple_config(), baseline()).unwrap();
        let state = DVector::from_vec(vec![50.0, 50.0, 0.0, 0.0]);
        let expected = model.expected_measurement(&state);
        let at_peak = model.measurement_log_density(&expected, &expected);
        let off = model.measurement_log_density(&expected.add_scalar(0.01), &expected);
        assert!(at_peak > off);
        // two independent N(0, 0.01²) at their mean
        let peak = -2.0 * 0.01f64.ln() - (2.0 * std::f64::consts::PI).ln();
        assert_approx_eq!(at_peak, peak, 1e-10);
    }

    #[test]
    fn test_rejects_bad_configuration() {
        let mut config = simple_config();
        config.dt = 0.0;
        assert!(matches!(
            BearingsModel::new(config, baseline()),
            Err(FilterError::Configuration { .. })
        ));

        let mut config = simple_config();
        config.importance_covariance = vec![1.0, 1.0, 1.0];
        assert!(matches!(
            BearingsModel::new(config, baseline()),
            Err(FilterError::DimensionMismatch { expected: 4, actual: 3, .. })
        ));

        let mut config = simple_config();
        config.prior_covariance[2] = -1.0;
        assert!(matches!(
            BearingsModel::new(config, baseline()),
            Err(FilterError::NotPositiveDefinite { .. })
        ));

        let mut config = simple_config();
        config.sensor_2 = config.sensor_1;
        assert!(BearingsModel::new(config, baseline()).is_err());
    }

    #[test]
    fn test_rejects_bad_baseline() {
        let narrow = DMatrix::from_row_slice(2, 1, &[1.0, 2.0]);
        assert!(matches!(
            BearingsModel::new(simple_config(), narrow),
            Err(FilterError::DimensionMismatch { expected: 2, actual: 1, .. })
        ));
        assert_eq!(
            BearingsModel::new(simple_config(), DMatrix::zeros(0, 2)).unwrap_err(),
            FilterError::EmptyMeasurements
        );
        let mut bad = baseline();
        bad[(1, 1)] = f64::NAN;
        assert!(BearingsModel::new(simple_config(), bad).is_err());
    }
}
