//! Acquisition functions scoring how promising a point is to evaluate.

use statrs::distribution::{Continuous, ContinuousCDF, Normal};

use at_types::AcquisitionKind;

use crate::surrogate::{GaussianProcess, Prediction};

/// Floor applied to the predictive standard deviation.
pub const MIN_STD: f64 = 1e-8;

/// Scores candidate points against a fitted surrogate and an incumbent.
#[derive(Debug, Clone, Copy)]
pub struct AcquisitionEvaluator {
    kind: AcquisitionKind,
    standard_normal: Normal,
}

impl AcquisitionEvaluator {
    pub fn new(kind: AcquisitionKind) -> Self {
        Self {
            kind,
            standard_normal: Normal::standard(),
        }
    }

    pub fn kind(&self) -> AcquisitionKind {
        self.kind
    }

    /// Acquisition value at `x`; higher is more promising. A non-finite
    /// incumbent is treated as zero.
    pub fn evaluate(&self, surrogate: &GaussianProcess, x: &[f64], incumbent: f64) -> f64 {
        let incumbent = if incumbent.is_finite() { incumbent } else { 0.0 };
        self.score(surrogate.predict(x), incumbent)
    }

    pub fn evaluate_batch(
        &self,
        surrogate: &GaussianProcess,
        points: &[Vec<f64>],
        incumbent: f64,
    ) -> Vec<f64> {
        points
            .iter()
            .map(|x| self.evaluate(surrogate, x, incumbent))
            .collect()
    }

    pub fn score(&self, prediction: Prediction, incumbent: f64) -> f64 {
        let Prediction { mean, std } = prediction;
        match self.kind {
            AcquisitionKind::ExpectedImprovement { xi } => {
                if std == 0.0 {
                    return 0.0;
                }
                let sigma = std.max(MIN_STD);
                let improvement = mean - incumbent - xi;
                let z = improvement / sigma;
                improvement * self.standard_normal.cdf(z) + sigma * self.standard_normal.pdf(z)
            }
            AcquisitionKind::ProbabilityOfImprovement { xi } => {
                let sigma = std.max(MIN_STD);
                self.standard_normal.cdf((mean - incumbent - xi) / sigma)
            }
            AcquisitionKind::UpperConfidenceBound { kappa } => mean + kappa * std.max(MIN_STD),
        }
    }
}

impl Default for AcquisitionEvaluator {
    fn default() -> Self {
        Self::new(AcquisitionKind::default())
    }
}
