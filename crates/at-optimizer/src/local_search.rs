//! Multi-start stochastic hill climbing over the unit hypercube.

use rand::Rng;
use rand_distr::{Distribution, Normal};

use at_types::{internal_error, AtResult, OptimizerConfig};

use crate::acquisition::AcquisitionEvaluator;
use crate::surrogate::GaussianProcess;

/// Maximizes an acquisition function by hill climbing from random starts.
#[derive(Debug, Clone)]
pub struct AcquisitionOptimizer {
    restarts: usize,
    steps: usize,
    step: Normal<f64>,
}

impl AcquisitionOptimizer {
    pub fn new(restarts: usize, steps: usize, step_sigma: f64) -> AtResult<Self> {
        let step = Normal::new(0.0, step_sigma)
            .map_err(|e| internal_error!("invalid local search step {step_sigma}: {e}"))?;
        Ok(Self {
            restarts,
            steps,
            step,
        })
    }

    pub fn from_config(config: &OptimizerConfig) -> AtResult<Self> {
        Self::new(config.restarts, config.local_steps, config.step_sigma)
    }

    /// Best point found across all restarts. If nothing scored a finite
    /// value, a random point is returned.
    pub fn maximize<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        dims: usize,
        acquisition: &AcquisitionEvaluator,
        surrogate: &GaussianProcess,
        incumbent: f64,
    ) -> Vec<f64> {
        self.maximize_with(rng, dims, |x| acquisition.evaluate(surrogate, x, incumbent))
    }

    /// Same search against an arbitrary objective.
    pub fn maximize_with<R, F>(&self, rng: &mut R, dims: usize, objective: F) -> Vec<f64>
    where
        R: Rng + ?Sized,
        F: Fn(&[f64]) -> f64,
    {
        let mut global: Option<(Vec<f64>, f64)> = None;

        for _ in 0..self.restarts {
            let mut current: Vec<f64> = (0..dims).map(|_| rng.random::<f64>()).collect();
            let mut current_value = objective(&current);

            for _ in 0..self.steps {
                let candidate: Vec<f64> = current
                    .iter()
                    .map(|v| (v + self.step.sample(rng)).clamp(0.0, 1.0))
                    .collect();
                let value = objective(&candidate);
                if value > current_value || (!current_value.is_finite() && value.is_finite()) {
                    current = candidate;
                    current_value = value;
                }
            }

            if !current_value.is_finite() {
                continue;
            }
            match &global {
                Some((_, best)) if *best >= current_value => {}
                _ => global = Some((current, current_value)),
            }
        }

        match global {
            Some((point, _)) => point,
            None => (0..dims).map(|_| rng.random::<f64>()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn finds_peak_of_smooth_objective() {
        let optimizer = AcquisitionOptimizer::new(10, 50, 0.1).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let peak = [0.3, 0.8];
        let point = optimizer.maximize_with(&mut rng, 2, |x| {
            -(x[0] - peak[0]).powi(2) - (x[1] - peak[1]).powi(2)
        });
        assert!((point[0] - peak[0]).abs() < 0.1, "{point:?}");
        assert!((point[1] - peak[1]).abs() < 0.1, "{point:?}");
    }

    #[test]
    fn stays_inside_unit_cube() {
        let optimizer = AcquisitionOptimizer::new(3, 30, 0.5).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        // optimum outside the cube pushes the climb onto the boundary
        let point = optimizer.maximize_with(&mut rng, 3, |x| x.iter().sum());
        assert!(point.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(point.iter().sum::<f64>() > 2.5);
    }

    #[test]
    fn falls_back_to_random_point_when_nothing_scores() {
        let optimizer = AcquisitionOptimizer::new(4, 5, 0.1).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let point = optimizer.maximize_with(&mut rng, 2, |_| f64::NAN);
        assert_eq!(point.len(), 2);
        assert!(point.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn invalid_step_is_rejected() {
        assert!(AcquisitionOptimizer::new(1, 1, -1.0).is_err());
    }
}
