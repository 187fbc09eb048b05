//! Resampling strategies for the particle filter.
//!
//! A resampler maps a normalized weight vector to `N` ancestor indices. The engine copies each
//! particle trajectory from its ancestor and resets the carried weights to `1/N`.
use clap::ValueEnum;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

/// Anything that can pick ancestors from a normalized weight vector.
pub trait Resampler {
    /// Return `weights.len()` ancestor indices, each in `0..weights.len()`.
    fn resample(&self, weights: &[f64], rng: &mut dyn RngCore) -> Vec<usize>;

    /// False for strategies that never change the particle set.
    fn is_active(&self) -> bool {
        true
    }
}

/// Built-in resampling strategies, selectable from configuration files and the command line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ParticleResamplingStrategy {
    /// Plain sequential importance sampling; the particle set is never resampled.
    #[default]
    None,
    Multinomial,
    Systematic,
    Stratified,
    Residual,
}

impl Resampler for ParticleResamplingStrategy {
    fn resample(&self, weights: &[f64], rng: &mut dyn RngCore) -> Vec<usize> {
        match self {
            ParticleResamplingStrategy::None => (0..weights.len()).collect(),
            ParticleResamplingStrategy::Multinomial => multinomial_resample(weights, rng),
            ParticleResamplingStrategy::Systematic => systematic_resample(weights, rng),
            ParticleResamplingStrategy::Stratified => stratified_resample(weights, rng),
            ParticleResamplingStrategy::Residual => residual_resample(weights, rng),
        }
    }

    fn is_active(&self) -> bool {
        !matches!(self, ParticleResamplingStrategy::None)
    }
}

/// Walk the cumulative weights with sorted positions in `[0, total)`.
///
/// A position on a boundary moves past it, so zero-weight entries are never picked.
fn select_sorted(weights: &[f64], positions: &[f64]) -> Vec<usize> {
    let last = weights.len().saturating_sub(1);
    let mut indices = Vec::with_capacity(positions.len());
    let mut i = 0;
    let mut cumsum = weights.first().copied().unwrap_or(0.0);
    for &u in positions {
        while u >= cumsum && i < last {
            i += 1;
            cumsum += weights[i];
        }
        indices.push(i);
    }
    indices
}

/// Independent categorical draws.
pub fn multinomial_resample(weights: &[f64], rng: &mut dyn RngCore) -> Vec<usize> {
    let n = weights.len();
    let total: f64 = weights.iter().sum();
    let mut positions: Vec<f64> = (0..n).map(|_| rng.random::<f64>() * total).collect();
    positions.sort_by(|a, b| a.total_cmp(b));
    select_sorted(weights, &positions)
}

/// One uniform offset, `N` evenly spaced positions.
pub fn systematic_resample(weights: &[f64], rng: &mut dyn RngCore) -> Vec<usize> {
    let n = weights.len();
    if n == 0 {
        return Vec::new();
    }
    let total: f64 = weights.iter().sum();
    let step = total / n as f64;
    let offset = rng.random::<f64>() * step;
    let positions: Vec<f64> = (0..n).map(|j| offset + j as f64 * step).collect();
    select_sorted(weights, &positions)
}

/// One uniform draw inside each of `N` equal strata.
pub fn stratified_resample(weights: &[f64], rng: &mut dyn RngCore) -> Vec<usize> {
    let n = weights.len();
    if n == 0 {
        return Vec::new();
    }
    let total: f64 = weights.iter().sum();
    let step = total / n as f64;
    let positions: Vec<f64> = (0..n)
        .map(|j| (j as f64 + rng.random::<f64>()) * step)
        .collect();
    select_sorted(weights, &positions)
}

/// Deterministic `floor(N w)` copies, then systematic selection on the residuals.
pub fn residual_resample(weights: &[f64], rng: &mut dyn RngCore) -> Vec<usize> {
    let n = weights.len();
    let total: f64 = weights.iter().sum();
    if n == 0 || total.is_nan() || total <= 0.0 {
        return (0..n).collect();
    }
    let mut indices = Vec::with_capacity(n);
    let mut residual = vec![0.0; n];
    for (i, &w) in weights.iter().enumerate() {
        let scaled = w / total * n as f64;
        let copies = scaled.floor() as usize;
        indices.extend(std::iter::repeat_n(i, copies));
        residual[i] = scaled - copies as f64;
    }
    indices.truncate(n);
    let remaining = n - indices.len();
    if remaining > 0 {
        let sum_residual: f64 = residual.iter().sum();
        let step = sum_residual / remaining as f64;
        let offset = rng.random::<f64>() * step;
        let positions: Vec<f64> = (0..remaining).map(|j| offset + j as f64 * step).collect();
        indices.extend(select_sorted(&residual, &positions));
    }
    indices
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const ACTIVE: [ParticleResamplingStrategy; 4] = [
        ParticleResamplingStrategy::Multinomial,
        ParticleResamplingStrategy::Systematic,
        ParticleResamplingStrategy::Stratified,
        ParticleResamplingStrategy::Residual,
    ];

    #[test]
    fn test_none_is_identity() {
        let mut rng = StdRng::seed_from_u64(1);
        let weights = [0.1, 0.7, 0.2];
        let idx = ParticleResamplingStrategy::None.resample(&weights, &mut rng);
        assert_eq!(idx, vec![0, 1, 2]);
        assert!(!ParticleResamplingStrategy::None.is_active());
    }

    #[test]
    fn test_indices_valid() {
        let mut rng = StdRng::seed_from_u64(2);
        let weights = [0.05, 0.25, 0.1, 0.4, 0.2];
        for strategy in ACTIVE {
            let idx = strategy.resample(&weights, &mut rng);
            assert_eq!(idx.len(), weights.len(), "{strategy:?}");
            assert!(idx.iter().all(|&i| i < weights.len()), "{strategy:?}");
            assert!(strategy.is_active());
        }
    }

    #[test]
    fn test_one_hot_weight_concentrates() {
        let mut rng = StdRng::seed_from_u64(3);
        let weights = [0.0, 0.0, 1.0, 0.0];
        for strategy in ACTIVE {
            let idx = strategy.resample(&weights, &mut rng);
            assert_eq!(idx, vec![2, 2, 2, 2], "{strategy:?}");
        }
    }

    #[test]
    fn test_uniform_weights_keep_everyone_for_low_variance_schemes() {
        let mut rng = StdRng::seed_from_u64(4);
        let weights = [0.25; 4];
        for strategy in [
            ParticleResamplingStrategy::Systematic,
            ParticleResamplingStrategy::Stratified,
            ParticleResamplingStrategy::Residual,
        ] {
            let idx = strategy.resample(&weights, &mut rng);
            assert_eq!(idx, vec![0, 1, 2, 3], "{strategy:?}");
        }
    }

    #[test]
    fn test_zero_weight_never_selected() {
        assert_eq!(select_sorted(&[0.0, 0.5, 0.0, 0.5], &[0.0, 0.5, 0.999]), vec![1, 3, 3]);
        assert_eq!(select_sorted(&[0.0, 0.0, 1.0], &[0.0, 0.0]), vec![2, 2]);
    }

    #[test]
    fn test_residual_deterministic_part() {
        let mut rng = StdRng::seed_from_u64(5);
        // N w = (1.5, 0.75, 0.75): one deterministic copy of particle 0, two residual draws
        let idx = residual_resample(&[0.5, 0.25, 0.25], &mut rng);
        let mut counts = [0usize; 3];
        for i in idx {
            counts[i] += 1;
        }
        assert_eq!(counts[0] + counts[1] + counts[2], 3);
        assert!(counts[0] >= 1);
    }

    #[test]
    fn test_multinomial_frequencies() {
        let mut rng = StdRng::seed_from_u64(6);
        let weights: Vec<f64> = vec![0.1, 0.6, 0.3];
        let mut counts = [0usize; 3];
        for _ in 0..2000 {
            for i in multinomial_resample(&weights, &mut rng) {
                counts[i] += 1;
            }
        }
        let total = 6000.0;
        assert!((counts[1] as f64 / total - 0.6).abs() < 0.03);
        assert!((counts[0] as f64 / total - 0.1).abs() < 0.03);
    }

    #[test]
    fn test_empty_weights() {
        let mut rng = StdRng::seed_from_u64(7);
        for strategy in ACTIVE {
            assert!(strategy.resample(&[], &mut rng).is_empty());
        }
    }
}
