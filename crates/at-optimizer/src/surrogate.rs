//! Gaussian-process surrogate over the normalized parameter space.
//!
//! Kernel: `k(a, b) = c · exp(-½ Σ ((a_i - b_i) / l_i)²)` with one length
//! scale per dimension, plus a diagonal jitter term. Targets are
//! standardized before fitting. Hyperparameters are chosen by maximizing the
//! log marginal likelihood with a bounded pattern search in log space,
//! starting from `c = 1, l_i = 1`. Every [`GaussianProcess::fit`] discards the
//! previous model.

use nalgebra::linalg::Cholesky;
use nalgebra::{DMatrix, DVector, Dyn};
use serde::Serialize;
use tracing::debug;

use at_types::{internal_error, AtResult};

/// Minimum observations for a fitted model.
pub const MIN_OBSERVATIONS: usize = 2;

const OUTPUT_SCALE_BOUNDS: (f64, f64) = (1e-3, 1e3);
const LENGTH_SCALE_BOUNDS: (f64, f64) = (1e-2, 1e2);
const DEFAULT_JITTER: f64 = 1e-6;
const PATTERN_STEPS: [f64; 5] = [1.0, 0.5, 0.25, 0.125, 0.0625];
const MAX_SWEEPS_PER_STEP: usize = 50;
const JITTER_RETRIES: usize = 4;

/// Posterior mean and standard deviation at one point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    pub mean: f64,
    pub std: f64,
}

impl Prediction {
    /// Used wherever no model is fitted: zero mean, maximal uncertainty.
    pub const PRIOR: Prediction = Prediction { mean: 0.0, std: 1.0 };
}

/// Fitted kernel hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KernelHyperparameters {
    pub output_scale: f64,
    pub length_scales: Vec<f64>,
}

impl KernelHyperparameters {
    fn from_log(theta: &[f64]) -> Self {
        Self {
            output_scale: theta[0].exp(),
            length_scales: theta[1..].iter().map(|t| t.exp()).collect(),
        }
    }

    fn kernel(&self, a: &[f64], b: &[f64]) -> f64 {
        let r_sq: f64 = a
            .iter()
            .zip(b)
            .zip(&self.length_scales)
            .map(|((x, y), l)| {
                let d = (x - y) / l;
                d * d
            })
            .sum();
        self.output_scale * (-0.5 * r_sq).exp()
    }
}

struct FittedModel {
    x_train: Vec<Vec<f64>>,
    cholesky: Cholesky<f64, Dyn>,
    alpha: DVector<f64>,
    hyper: KernelHyperparameters,
    y_mean: f64,
    y_std: f64,
    log_marginal_likelihood: f64,
}

impl FittedModel {
    fn build(
        x: &[Vec<f64>],
        y_std_units: &[f64],
        hyper: KernelHyperparameters,
        jitter: f64,
    ) -> Option<(Cholesky<f64, Dyn>, DVector<f64>, f64)> {
        let n = x.len();
        let k = DMatrix::from_fn(n, n, |i, j| {
            let v = hyper.kernel(&x[i], &x[j]);
            if i == j {
                v + jitter
            } else {
                v
            }
        });
        let cholesky = Cholesky::new(k)?;
        let y = DVector::from_column_slice(y_std_units);
        let alpha = cholesky.solve(&y);

        let log_det_half: f64 = cholesky.l().diagonal().iter().map(|d| d.ln()).sum();
        let lml = -0.5 * y.dot(&alpha) - log_det_half - 0.5 * n as f64 * (2.0 * std::f64::consts::PI).ln();
        if lml.is_finite() {
            Some((cholesky, alpha, lml))
        } else {
            None
        }
    }
}

/// Gaussian-process regression model.
pub struct GaussianProcess {
    dims: usize,
    jitter: f64,
    model: Option<FittedModel>,
}

impl GaussianProcess {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            jitter: DEFAULT_JITTER,
            model: None,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    pub fn hyperparameters(&self) -> Option<&KernelHyperparameters> {
        self.model.as_ref().map(|m| &m.hyper)
    }

    pub fn log_marginal_likelihood(&self) -> Option<f64> {
        self.model.as_ref().map(|m| m.log_marginal_likelihood)
    }

    /// Refit from scratch on all observations. With fewer than
    /// [`MIN_OBSERVATIONS`] points the model is cleared.
    pub fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> AtResult<()> {
        self.model = None;
        if x.len() != y.len() {
            return Err(internal_error!(
                "surrogate fit with {} inputs and {} targets",
                x.len(),
                y.len()
            ));
        }
        if let Some(bad) = x.iter().find(|row| row.len() != self.dims) {
            return Err(internal_error!(
                "surrogate expects {} dimensions, got {}",
                self.dims,
                bad.len()
            ));
        }
        if x.len() < MIN_OBSERVATIONS {
            return Ok(());
        }

        let n = y.len() as f64;
        let y_mean = y.iter().sum::<f64>() / n;
        let variance = y.iter().map(|v| (v - y_mean).powi(2)).sum::<f64>() / n;
        let y_std = if variance > 0.0 { variance.sqrt() } else { 1.0 };
        let standardized: Vec<f64> = y.iter().map(|v| (v - y_mean) / y_std).collect();

        let mut jitter = self.jitter;
        for _ in 0..=JITTER_RETRIES {
            if let Some(model) = self.optimize_hyperparameters(x, &standardized, jitter, y_mean, y_std) {
                debug!(
                    observations = x.len(),
                    output_scale = model.hyper.output_scale,
                    lml = model.log_marginal_likelihood,
                    "surrogate refit"
                );
                self.model = Some(model);
                return Ok(());
            }
            jitter *= 10.0;
        }
        Err(internal_error!(
            "kernel matrix not positive definite for {} observations",
            x.len()
        ))
    }

    fn optimize_hyperparameters(
        &self,
        x: &[Vec<f64>],
        y: &[f64],
        jitter: f64,
        y_mean: f64,
        y_std: f64,
    ) -> Option<FittedModel> {
        let lower: Vec<f64> = std::iter::once(OUTPUT_SCALE_BOUNDS.0.ln())
            .chain(std::iter::repeat(LENGTH_SCALE_BOUNDS.0.ln()).take(self.dims))
            .collect();
        let upper: Vec<f64> = std::iter::once(OUTPUT_SCALE_BOUNDS.1.ln())
            .chain(std::iter::repeat(LENGTH_SCALE_BOUNDS.1.ln()).take(self.dims))
            .collect();

        let evaluate = |theta: &[f64]| {
            FittedModel::build(x, y, KernelHyperparameters::from_log(theta), jitter)
        };

        let mut theta = vec![0.0; self.dims + 1];
        let mut best = evaluate(&theta);
        let mut best_lml = best.as_ref().map_or(f64::NEG_INFINITY, |b| b.2);

        for step in PATTERN_STEPS {
            for _ in 0..MAX_SWEEPS_PER_STEP {
                let mut improved = false;
                for i in 0..theta.len() {
                    for delta in [step, -step] {
                        let mut candidate = theta.clone();
                        candidate[i] = (candidate[i] + delta).clamp(lower[i], upper[i]);
                        if candidate[i] == theta[i] {
                            continue;
                        }
                        if let Some(fit) = evaluate(&candidate) {
                            if fit.2 > best_lml + 1e-9 {
                                best_lml = fit.2;
                                best = Some(fit);
                                theta = candidate;
                                improved = true;
                            }
                        }
                    }
                }
                if !improved {
                    break;
                }
            }
        }

        let (cholesky, alpha, lml) = best?;
        Some(FittedModel {
            x_train: x.to_vec(),
            cholesky,
            alpha,
            hyper: KernelHyperparameters::from_log(&theta),
            y_mean,
            y_std,
            log_marginal_likelihood: lml,
        })
    }

    /// Posterior at `x`, in the original score units.
    pub fn predict(&self, x: &[f64]) -> Prediction {
        let Some(model) = &self.model else {
            return Prediction::PRIOR;
        };
        let k_star = DVector::from_iterator(
            model.x_train.len(),
            model.x_train.iter().map(|xi| model.hyper.kernel(x, xi)),
        );
        let mean = k_star.dot(&model.alpha);
        let v = model.cholesky.solve(&k_star);
        let variance = (model.hyper.output_scale - k_star.dot(&v)).max(0.0);

        Prediction {
            mean: mean * model.y_std + model.y_mean,
            std: variance.sqrt() * model.y_std,
        }
    }

    pub fn predict_batch(&self, points: &[Vec<f64>]) -> Vec<Prediction> {
        points.iter().map(|p| self.predict(p)).collect()
    }

    /// Relative importance per dimension from inverse length scales,
    /// normalized to sum to one. Uniform when no model is fitted.
    pub fn importance(&self) -> Vec<f64> {
        let uniform = || vec![1.0 / self.dims as f64; self.dims];
        let Some(model) = &self.model else {
            return uniform();
        };
        let inverse: Vec<f64> = model.hyper.length_scales.iter().map(|l| 1.0 / l).collect();
        let total: f64 = inverse.iter().sum();
        if total > 0.0 && total.is_finite() {
            inverse.into_iter().map(|v| v / total).collect()
        } else {
            uniform()
        }
    }
}
