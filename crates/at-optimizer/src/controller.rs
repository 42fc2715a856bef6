//! Adaptive optimization controller: bootstrap sampling, surrogate-guided
//! proposals and early stopping.
//!
//! The bookkeeping lives in [`OptimizerState`], a plain value that is
//! consumed and returned by [`OptimizerState::observe`]. The controller owns
//! one and reassigns it on every update, so the ordering of best-score and
//! patience updates can be tested without a surrogate.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use at_types::{validation_error, AtResult, OptimizerConfig};

use crate::acquisition::AcquisitionEvaluator;
use crate::local_search::AcquisitionOptimizer;
use crate::space::{ParamSet, ParameterSpace};
use crate::surrogate::GaussianProcess;

/// Lifecycle phase of an optimization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    /// Random proposals seeding the surrogate.
    Bootstrap,
    /// Proposals maximize the acquisition function.
    Guided,
    /// Early-stopped; no further proposals.
    Converged,
}

/// One recorded evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    #[serde(skip)]
    pub unit: Vec<f64>,
    pub params: ParamSet,
    pub score: f64,
}

/// Row of the exported iteration history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    /// 1-based.
    pub iteration: usize,
    pub params: ParamSet,
    pub score: f64,
    pub is_best: bool,
}

/// Accumulated observations plus best-score and patience bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizerState {
    observations: Vec<Observation>,
    best_index: Option<usize>,
    /// Score the patience counter is measured against.
    reference_score: f64,
    no_improvement: usize,
}

impl Default for OptimizerState {
    fn default() -> Self {
        Self {
            observations: Vec::new(),
            best_index: None,
            reference_score: f64::NEG_INFINITY,
            no_improvement: 0,
        }
    }
}

impl OptimizerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observation and return the updated state.
    ///
    /// The best score moves on any strict improvement. The patience counter
    /// resets only when the score beats the reference by more than
    /// `threshold`; otherwise it grows by one.
    pub fn observe(mut self, observation: Observation, threshold: f64) -> Self {
        let score = observation.score;
        if score > self.best_score() {
            self.best_index = Some(self.observations.len());
        }
        if score > self.reference_score + threshold {
            self.reference_score = score;
            self.no_improvement = 0;
        } else {
            self.no_improvement += 1;
        }
        self.observations.push(observation);
        self
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Best score so far, `-inf` before any finite observation.
    pub fn best_score(&self) -> f64 {
        self.best()
            .map_or(f64::NEG_INFINITY, |observation| observation.score)
    }

    pub fn best(&self) -> Option<&Observation> {
        self.best_index.map(|i| &self.observations[i])
    }

    pub fn no_improvement(&self) -> usize {
        self.no_improvement
    }

    /// Patience is checked first, so early stopping can end bootstrap too.
    pub fn phase(&self, n_initial: usize, patience: usize) -> Phase {
        if self.no_improvement >= patience {
            Phase::Converged
        } else if self.observations.len() < n_initial {
            Phase::Bootstrap
        } else {
            Phase::Guided
        }
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.observations
            .iter()
            .enumerate()
            .map(|(i, observation)| HistoryEntry {
                iteration: i + 1,
                params: observation.params.clone(),
                score: observation.score,
                is_best: Some(i) == self.best_index,
            })
            .collect()
    }
}

/// Final summary of an optimization run.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationResult {
    pub best_params: Option<ParamSet>,
    pub best_score: Option<f64>,
    pub history: Vec<HistoryEntry>,
    pub importance: BTreeMap<String, f64>,
    pub iterations: usize,
    pub converged: bool,
}

/// Surrogate-driven optimizer over a [`ParameterSpace`].
pub struct AdaptiveOptimizer {
    space: ParameterSpace,
    config: OptimizerConfig,
    acquisition: AcquisitionEvaluator,
    local_search: AcquisitionOptimizer,
    surrogate: GaussianProcess,
    state: OptimizerState,
    /// Latched once early stopping fires.
    stopped: bool,
    rng: StdRng,
}

impl AdaptiveOptimizer {
    pub fn new(space: ParameterSpace, config: OptimizerConfig) -> AtResult<Self> {
        let local_search = AcquisitionOptimizer::from_config(&config)?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        info!(
            dimensions = space.len(),
            n_initial = config.n_initial_points,
            patience = config.patience,
            acquisition = ?config.acquisition,
            "adaptive optimizer created"
        );
        Ok(Self {
            surrogate: GaussianProcess::new(space.len()),
            acquisition: AcquisitionEvaluator::new(config.acquisition),
            local_search,
            space,
            config,
            state: OptimizerState::new(),
            stopped: false,
            rng,
        })
    }

    /// Build the space from `config.space`.
    pub fn from_config(config: OptimizerConfig) -> AtResult<Self> {
        let space = ParameterSpace::from_specs(&config.space)?;
        Self::new(space, config)
    }

    pub fn space(&self) -> &ParameterSpace {
        &self.space
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn state(&self) -> &OptimizerState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        if self.stopped {
            return Phase::Converged;
        }
        self.state
            .phase(self.config.n_initial_points, self.config.patience)
    }

    pub fn is_converged(&self) -> bool {
        self.phase() == Phase::Converged
    }

    /// Next parameter set to evaluate, or `None` once converged.
    pub fn suggest_next_point(&mut self) -> AtResult<Option<ParamSet>> {
        let unit = match self.phase() {
            Phase::Converged => return Ok(None),
            Phase::Bootstrap => self.space.random_unit(&mut self.rng),
            Phase::Guided => self.local_search.maximize(
                &mut self.rng,
                self.space.len(),
                &self.acquisition,
                &self.surrogate,
                self.state.best_score(),
            ),
        };
        let params = self.space.denormalize(&unit)?;
        debug!(phase = ?self.phase(), %params, "suggested point");
        Ok(Some(params))
    }

    /// Record a score for `params` and refit the surrogate.
    ///
    /// Non-finite scores are kept in the history but excluded from the fit.
    pub fn update(&mut self, params: &ParamSet, score: f64) -> AtResult<()> {
        if score.is_nan() {
            return Err(validation_error!("score for {params} is NaN"));
        }
        let unit = self.space.normalize(params)?;
        let observation = Observation {
            unit,
            params: params.clone(),
            score,
        };
        let previous_best = self.state.best_score();
        self.state = std::mem::take(&mut self.state)
            .observe(observation, self.config.improvement_threshold);

        if self.state.best_score() > previous_best {
            info!(iteration = self.state.len(), score, %params, "new best score");
        }

        let (x, y): (Vec<Vec<f64>>, Vec<f64>) = self
            .state
            .observations()
            .iter()
            .filter(|o| o.score.is_finite())
            .map(|o| (o.unit.clone(), o.score))
            .unzip();
        if let Err(e) = self.surrogate.fit(&x, &y) {
            warn!(error = %e, "surrogate refit failed; proposals fall back to the prior");
        }

        if !self.stopped && self.is_converged() {
            self.stopped = true;
            info!(
                iterations = self.state.len(),
                best = self.state.best_score(),
                "early stopping: no improvement for {} updates",
                self.state.no_improvement()
            );
        }
        Ok(())
    }

    pub fn best_params(&self) -> Option<&ParamSet> {
        self.state.best().map(|o| &o.params)
    }

    pub fn best_score(&self) -> Option<f64> {
        self.state.best().map(|o| o.score)
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.state.history()
    }

    /// Per-dimension importance keyed by parameter name, summing to one.
    pub fn importance(&self) -> BTreeMap<String, f64> {
        self.space
            .names()
            .map(str::to_string)
            .zip(self.surrogate.importance())
            .collect()
    }

    pub fn result(&self) -> OptimizationResult {
        OptimizationResult {
            best_params: self.best_params().cloned(),
            best_score: self.best_score(),
            history: self.history(),
            importance: self.importance(),
            iterations: self.state.len(),
            converged: self.is_converged(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use at_types::AcquisitionKind;

    fn sampling_space() -> ParameterSpace {
        ParameterSpace::builder()
            .float("temperature", 0.1, 1.5)
            .float("top_p", 0.5, 1.0)
            .build()
            .unwrap()
    }

    fn observation(space: &ParameterSpace, t: f64, score: f64) -> Observation {
        let params = space.params(&[("temperature", t), ("top_p", 0.9)]).unwrap();
        Observation {
            unit: space.normalize(&params).unwrap(),
            params,
            score,
        }
    }

    #[test]
    fn state_tracks_strict_best_and_patience() {
        let space = sampling_space();
        let state = OptimizerState::new()
            .observe(observation(&space, 0.2, 0.5), 0.01)
            .observe(observation(&space, 0.3, 0.505), 0.01)
            .observe(observation(&space, 0.4, 0.505), 0.01);

        // 0.505 is a new best but not a meaningful improvement
        assert_eq!(state.best_score(), 0.505);
        assert_eq!(state.no_improvement(), 2);

        let history = state.history();
        assert_eq!(history.iter().filter(|h| h.is_best).count(), 1);
        assert!(history[1].is_best);
        assert_eq!(history[2].iteration, 3);

        let state = state.observe(observation(&space, 0.5, 0.6), 0.01);
        assert_eq!(state.no_improvement(), 0);
        assert_eq!(state.best_score(), 0.6);
    }

    #[test]
    fn phase_transitions() {
        let space = sampling_space();
        let mut state = OptimizerState::new();
        assert_eq!(state.phase(2, 2), Phase::Bootstrap);

        state = state.observe(observation(&space, 0.2, 0.5), 0.0);
        state = state.observe(observation(&space, 0.3, 0.7), 0.0);
        assert_eq!(state.phase(2, 2), Phase::Guided);

        state = state.observe(observation(&space, 0.4, 0.1), 0.0);
        assert_eq!(state.phase(2, 2), Phase::Guided);
        state = state.observe(observation(&space, 0.5, 0.1), 0.0);
        assert_eq!(state.phase(2, 2), Phase::Converged);

        // patience reached before the bootstrap quota is met
        assert_eq!(state.phase(10, 2), Phase::Converged);
        assert_eq!(state.phase(10, 3), Phase::Bootstrap);
    }

    #[test]
    fn best_score_is_max_of_recorded_scores() {
        let config = OptimizerConfig::default()
            .with_space(vec![
                at_types::DimensionSpec::float("temperature", 0.1, 1.5),
                at_types::DimensionSpec::float("top_p", 0.5, 1.0),
            ])
            .with_initial_points(3)
            .with_early_stopping(100, 0.0)
            .with_seed(11);
        let mut optimizer = AdaptiveOptimizer::from_config(config).unwrap();

        let mut scores = Vec::new();
        for i in 0..8 {
            let params = optimizer.suggest_next_point().unwrap().unwrap();
            let score = ((i * 37) % 11) as f64 / 10.0;
            optimizer.update(&params, score).unwrap();
            scores.push((params, score));
        }

        let max = scores.iter().map(|(_, s)| *s).fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(optimizer.best_score(), Some(max));
        let first_max = scores.iter().find(|(_, s)| *s == max).unwrap();
        assert_eq!(optimizer.best_params(), Some(&first_max.0));
        assert_eq!(optimizer.history().len(), 8);
    }

    #[test]
    fn early_stopping_ends_suggestions() {
        let config = OptimizerConfig::default()
            .with_initial_points(2)
            .with_early_stopping(3, 0.01)
            .with_seed(5);
        let mut optimizer = AdaptiveOptimizer::from_config(config).unwrap();

        let scores = [0.5, 0.505, 0.4, 0.3];
        for (i, score) in scores.iter().enumerate() {
            assert!(!optimizer.is_converged(), "converged early at {i}");
            let params = optimizer.suggest_next_point().unwrap().unwrap();
            optimizer.update(&params, *score).unwrap();
        }

        assert!(optimizer.is_converged());
        assert!(optimizer.suggest_next_point().unwrap().is_none());

        // updates are still accepted after convergence
        let params = optimizer.best_params().cloned().unwrap();
        optimizer.update(&params, 0.9).unwrap();
        assert_eq!(optimizer.best_score(), Some(0.9));
        assert_eq!(optimizer.history().len(), 5);
        assert!(optimizer.is_converged());
    }

    #[test]
    fn patience_applies_during_bootstrap() {
        // defaults: eight random points, patience five
        let mut optimizer =
            AdaptiveOptimizer::from_config(OptimizerConfig::default().with_seed(4)).unwrap();
        for score in [0.5, 0.4, 0.4, 0.4, 0.4] {
            assert_eq!(optimizer.phase(), Phase::Bootstrap);
            let params = optimizer.suggest_next_point().unwrap().unwrap();
            optimizer.update(&params, score).unwrap();
        }
        assert_eq!(optimizer.state().no_improvement(), 4);
        assert_eq!(optimizer.phase(), Phase::Bootstrap);

        let params = optimizer.suggest_next_point().unwrap().unwrap();
        optimizer.update(&params, 0.4).unwrap();
        assert_eq!(optimizer.state().no_improvement(), 5);
        assert!(optimizer.state().len() < optimizer.config().n_initial_points);
        assert_eq!(optimizer.phase(), Phase::Converged);
        assert!(optimizer.suggest_next_point().unwrap().is_none());

        // the latch holds even if a later update resets the counter
        optimizer.update(&params, 0.9).unwrap();
        assert!(optimizer.is_converged());
        assert_eq!(optimizer.history().len(), 7);
    }

    #[test]
    fn rejects_nan_and_out_of_bounds() {
        let mut optimizer = AdaptiveOptimizer::new(
            sampling_space(),
            OptimizerConfig::default().with_seed(1),
        )
        .unwrap();
        let params = optimizer.suggest_next_point().unwrap().unwrap();
        assert!(optimizer.update(&params, f64::NAN).is_err());
        assert!(optimizer.state().is_empty());

        let other = ParameterSpace::builder()
            .float("temperature", 0.0, 5.0)
            .float("top_p", 0.5, 1.0)
            .build()
            .unwrap();
        let outside = other.params(&[("temperature", 3.0), ("top_p", 0.9)]).unwrap();
        assert!(optimizer.update(&outside, 0.5).is_err());
    }

    #[test]
    fn failed_trials_are_recorded_but_not_fitted() {
        let mut optimizer = AdaptiveOptimizer::new(
            sampling_space(),
            OptimizerConfig::default().with_seed(2),
        )
        .unwrap();
        for score in [f64::NEG_INFINITY, 0.0, 0.4] {
            let params = optimizer.suggest_next_point().unwrap().unwrap();
            optimizer.update(&params, score).unwrap();
        }
        assert_eq!(optimizer.history().len(), 3);
        assert_eq!(optimizer.best_score(), Some(0.4));
        let importance = optimizer.importance();
        assert!((importance.values().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn importance_is_uniform_before_fit() {
        let optimizer = AdaptiveOptimizer::new(
            sampling_space(),
            OptimizerConfig::default().with_seed(3),
        )
        .unwrap();
        let importance = optimizer.importance();
        assert_eq!(importance["temperature"], 0.5);
        assert_eq!(importance["top_p"], 0.5);
        assert!(optimizer.result().best_params.is_none());
    }

    fn converges_on_quadratic(seed: u64, acquisition: AcquisitionKind) -> (f64, f64, f64) {
        let config = OptimizerConfig::default()
            .with_space(vec![
                at_types::DimensionSpec::float("temperature", 0.1, 1.5),
                at_types::DimensionSpec::float("top_p", 0.5, 1.0),
            ])
            .with_initial_points(5)
            .with_max_iterations(25)
            .with_early_stopping(10, 1e-4)
            .with_acquisition(acquisition)
            .with_seed(seed);
        let mut optimizer = AdaptiveOptimizer::from_config(config).unwrap();

        for _ in 0..25 {
            let Some(params) = optimizer.suggest_next_point().unwrap() else {
                break;
            };
            let t = params.get("temperature").unwrap();
            let p = params.get("top_p").unwrap();
            let score = 1.0 - (t - 0.6).powi(2) - (p - 0.9).powi(2);
            optimizer.update(&params, score).unwrap();
        }

        let best = optimizer.best_params().unwrap();
        (
            best.get("temperature").unwrap(),
            best.get("top_p").unwrap(),
            optimizer.best_score().unwrap(),
        )
    }

    #[test]
    fn converges_near_quadratic_optimum() {
        let seeds = [1, 2, 3, 4, 5];
        let mut converged = 0;
        for seed in seeds {
            let (t, p, score) =
                converges_on_quadratic(seed, AcquisitionKind::ExpectedImprovement { xi: 0.01 });
            assert!(score > 0.95, "seed {seed}: best score {score}");
            if (t - 0.6).abs() <= 0.05 && (p - 0.9).abs() <= 0.05 {
                converged += 1;
            }
        }
        assert!(converged * 2 > seeds.len(), "only {converged} runs converged");
    }

    #[test]
    fn ucb_also_finds_the_optimum_region() {
        let (t, p, score) =
            converges_on_quadratic(9, AcquisitionKind::UpperConfidenceBound { kappa: 2.0 });
        assert!(score > 0.95, "best score {score} at ({t}, {p})");
    }
}
