//! One tuning session: adaptive quality search over the sampling knobs,
//! then latency-constrained context and offload tuning.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use at_cache::ResultCache;
use at_monitor::ResourceMonitor;
use at_optimizer::{AdaptiveOptimizer, ParamSet};
use at_types::{
    AtResult, EvalTask, InferenceSettings, ParameterError, QualityReport, TunerConfig,
};

use crate::constraints::ConstraintTuner;
use crate::control::{CancellationFlag, SafetyGate};
use crate::oracle::{AnswerScorer, EvaluationOracle};
use crate::quality::QualityEvaluator;
use crate::report::{SessionReport, SessionStatus};
use crate::worker::OracleWorker;

/// Suffix separating quality entries from latency entries in the cache.
const QUALITY_NAMESPACE: &str = "quality";

/// Tunes one target end to end.
pub struct TuningSession {
    target_id: String,
    config: TunerConfig,
    oracle: Arc<dyn EvaluationOracle>,
    scorer: Arc<dyn AnswerScorer>,
    tasks: Vec<EvalTask>,
    cache: Arc<ResultCache>,
    monitor: Arc<dyn ResourceMonitor>,
    cancel: CancellationFlag,
}

impl TuningSession {
    /// Validates `config` and checks that every optimizer dimension names an
    /// [`InferenceSettings`] knob.
    pub fn new(
        target_id: impl Into<String>,
        config: TunerConfig,
        oracle: Arc<dyn EvaluationOracle>,
        scorer: Arc<dyn AnswerScorer>,
        tasks: Vec<EvalTask>,
        cache: Arc<ResultCache>,
        monitor: Arc<dyn ResourceMonitor>,
    ) -> AtResult<Self> {
        config.validate()?;
        if let Some(dim) = config
            .optimizer
            .space
            .iter()
            .find(|d| !InferenceSettings::supports(&d.name))
        {
            return Err(ParameterError::UnknownParameter {
                name: dim.name.clone(),
            }
            .into());
        }
        Ok(Self {
            target_id: target_id.into(),
            config,
            oracle,
            scorer,
            tasks,
            cache,
            monitor,
            cancel: CancellationFlag::new(),
        })
    }

    /// Share an externally controlled cancellation flag.
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    pub fn cancellation(&self) -> &CancellationFlag {
        &self.cancel
    }

    /// Run the session. Cancellation returns a partial report with status
    /// [`SessionStatus::Cancelled`]; an incompatible target is an error.
    pub async fn run(&self) -> AtResult<SessionReport> {
        let started_at = Utc::now();
        let session_id = Uuid::new_v4();
        let target = self.target_id.as_str();
        info!(%session_id, target, "tuning session started");

        let gate = SafetyGate::new(self.monitor.clone(), self.config.session.unsafe_pause());
        let worker = OracleWorker::new(self.oracle.clone());
        let evaluator = QualityEvaluator::new(
            worker.clone(),
            self.scorer.clone(),
            self.tasks.clone(),
            gate.clone(),
        )
        .with_timeouts(
            self.config.session.probe_timeout(),
            self.config.session.item_timeout(),
        );
        let mut optimizer = AdaptiveOptimizer::from_config(self.config.optimizer.clone())?;
        let base = InferenceSettings::new().with_num_predict(self.config.constraints.num_predict);
        let quality_target = format!("{target}#{QUALITY_NAMESPACE}");

        let mut cancelled = false;
        let mut best_seen = f64::NEG_INFINITY;
        let mut quality_metrics = BTreeMap::new();

        for iteration in 1..=self.config.optimizer.max_iterations {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let Some(params) = optimizer.suggest_next_point()? else {
                info!(target, iteration, "quality search converged");
                break;
            };
            let settings = apply_params(&base, &params)?;

            let report = match self.cache.get_as::<_, QualityReport>(&quality_target, &settings)? {
                Some(report) => report,
                None => match evaluator.evaluate(target, &settings, &self.cancel).await? {
                    Some(report) => {
                        // partially failed evaluations may be transient
                        if report.tasks_failed == 0 {
                            self.cache.set(&quality_target, &settings, &report)?;
                        }
                        report
                    }
                    None => {
                        cancelled = true;
                        break;
                    }
                },
            };

            optimizer.update(&params, report.overall)?;
            if report.overall > best_seen {
                best_seen = report.overall;
                quality_metrics = report.metrics.clone();
            }
            info!(target, iteration, score = report.overall, %params, "quality trial recorded");
        }

        let mut best_settings = match optimizer.best_params() {
            Some(params) => apply_params(&base, params)?,
            None => base.clone(),
        };

        let mut context_window_ok = None;
        let mut offload_confirmed = None;
        let mut final_performance = None;

        if !cancelled && optimizer.best_params().is_some() {
            let tuner = ConstraintTuner::new(
                worker,
                self.cache.clone(),
                gate,
                self.config.constraints.clone(),
            )
            .with_timeout_margin(Duration::from_secs_f64(
                self.config.session.speed_timeout_margin_s,
            ));

            let context = tuner.tune_context(target, &best_settings, &self.cancel).await?;
            best_settings = best_settings.with_num_ctx(context.num_ctx);
            if context.cancelled {
                cancelled = true;
            } else {
                context_window_ok = Some(context.satisfied);
                let offload = tuner.tune_offload(target, &best_settings, &self.cancel).await?;
                if offload.cancelled {
                    cancelled = true;
                } else {
                    best_settings = best_settings.with_num_gpu(offload.num_gpu);
                    offload_confirmed = Some(offload.confirmed);
                    final_performance = offload.final_performance;
                }
            }
        } else if optimizer.best_params().is_none() {
            warn!(target, "no quality trials completed, skipping constraint tuning");
        }

        let status = if cancelled {
            SessionStatus::Cancelled
        } else {
            SessionStatus::Completed
        };
        let report = SessionReport {
            session_id,
            target_id: self.target_id.clone(),
            status,
            best_settings,
            best_score: optimizer.best_score(),
            quality_metrics,
            history: optimizer.history(),
            parameter_importance: optimizer.importance(),
            context_window_ok,
            offload_confirmed,
            final_performance,
            constraints: self.config.constraints.clone(),
            cache_stats: self.cache.stats(),
            memory_summary: self.monitor.summary(),
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            %session_id,
            target,
            status = ?report.status,
            best_score = ?report.best_score,
            best = %report.best_settings,
            "tuning session finished"
        );
        Ok(report)
    }
}

/// `base` with every knob of `params` assigned by name.
fn apply_params(base: &InferenceSettings, params: &ParamSet) -> AtResult<InferenceSettings> {
    let mut settings = base.clone();
    for (name, value) in params.iter() {
        settings.set(name, value)?;
    }
    Ok(settings)
}
