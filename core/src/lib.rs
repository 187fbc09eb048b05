//! Bearing-only target tracking with a sequential importance sampling particle filter
//!
//! This crate estimates the trajectory of an object moving in the plane from pairs of noisy bearing angles
//! taken by two fixed sensors. The estimator is a sequential importance sampling (SIS) particle filter over
//! a constant-velocity state-space model. All of the distributions involved (prior, process, measurement and
//! importance proposal) are multivariate Gaussians parameterized by a mean vector and a lower Cholesky factor
//! of the covariance, and the per-step weight update is carried out in the log domain with explicit handling
//! of floating point underflow and overflow.
//!
//! This crate is primarily built off of three additional dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): Provides the linear algebra (Cholesky and QR decompositions).
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr): Provides seeded random number generation for particle draws.
//! - [`serde`](https://crates.io/crates/serde): Provides serialization of the configuration types.
//!
//! ## Crate overview
//!
//! - [errors]: Error type for model construction and filter runs.
//! - [linalg]: Cholesky factorization, log-determinant and symmetrization helpers.
//! - [gaussian]: Multivariate normal sampling and log-density through a Cholesky factor.
//! - [numerics]: Checked `ln`/`exp` and the clamp policy used by the weight update.
//! - [model]: The two-sensor bearings model and the [`model::StateSpaceModel`] trait the filter is generic over.
//! - [resampling]: Optional resampling strategies.
//! - [filter]: The particle filter engine.
//! - [triangulation]: Noiseless triangulation of bearing pairs into a baseline trajectory.
//! - [sim]: Reading and writing delimited data files and synthetic straight-line scenarios.
//! - [config]: Run configuration files in JSON, YAML or TOML.
//!
//! ## State and measurement definitions
//!
//! The state vector is
//!
//! $$
//! x = [p_x, p_y, v_x, v_y]
//! $$
//!
//! and the measurement is the pair of bearings from the sensors at $l_1$ and $l_2$:
//!
//! $$
//! y = [\operatorname{atan2}(p_y - l_{1,y}, p_x - l_{1,x}), \operatorname{atan2}(p_y - l_{2,y}, p_x - l_{2,x})] + \varepsilon, \quad \varepsilon \sim N(0, \sigma^2 I)
//! $$
//!
//! ## Weight recursion
//!
//! At step $k$ each particle is drawn from the importance proposal $q$ centered on the baseline trajectory and
//! reweighted by
//!
//! $$
//! \ln w_k = \ln w_{k-1} + \ln p(y_k | x_k) + \ln p(x_k | x_{k-1}) - \ln q(x_k)
//! $$
//!
//! after which the weights are normalized and the effective sample size $1 / \sum w^2$ and the weighted
//! posterior mean are recorded.
pub mod config;
pub mod errors;
pub mod filter;
pub mod gaussian;
pub mod linalg;
pub mod model;
pub mod numerics;
pub mod resampling;
pub mod sim;
pub mod triangulation;

pub use errors::FilterError;
pub use filter::{FilterConfig, FilterOutput, ParticleFilter};
pub use gaussian::MultivariateNormal;
pub use model::{BearingsModel, ModelConfig, ProcessMeanMode, StateSpaceModel};
pub use numerics::StabilizationReport;
pub use resampling::{ParticleResamplingStrategy, Resampler};
