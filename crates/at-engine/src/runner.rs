//! Sequential tuning of several targets.

use std::sync::Arc;
use tracing::{error, info, warn};

use at_cache::ResultCache;
use at_monitor::ResourceMonitor;
use at_types::{AtError, AtResult, EvalTask, TunerConfig, TuningConstraints};

use crate::control::CancellationFlag;
use crate::oracle::{AnswerScorer, EvaluationOracle};
use crate::report::{RunnerReport, SessionStatus, SkippedTarget};
use crate::session::TuningSession;

/// A target to tune, optionally with its size in billions of parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct TuningTarget {
    pub target_id: String,
    /// Selects a constraint tier via [`TuningConstraints::for_model_size`];
    /// `None` keeps the configured constraints.
    pub size_b: Option<f64>,
}

impl TuningTarget {
    pub fn new(target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            size_b: None,
        }
    }

    pub fn with_size(mut self, size_b: f64) -> Self {
        self.size_b = Some(size_b);
        self
    }
}

/// Runs one [`TuningSession`] per target, sharing cache and monitor.
pub struct TuningRunner {
    config: TunerConfig,
    oracle: Arc<dyn EvaluationOracle>,
    scorer: Arc<dyn AnswerScorer>,
    tasks: Vec<EvalTask>,
    cache: Arc<ResultCache>,
    monitor: Arc<dyn ResourceMonitor>,
    cancel: CancellationFlag,
}

impl TuningRunner {
    pub fn new(
        config: TunerConfig,
        oracle: Arc<dyn EvaluationOracle>,
        scorer: Arc<dyn AnswerScorer>,
        tasks: Vec<EvalTask>,
        cache: Arc<ResultCache>,
        monitor: Arc<dyn ResourceMonitor>,
    ) -> Self {
        Self {
            config,
            oracle,
            scorer,
            tasks,
            cache,
            monitor,
            cancel: CancellationFlag::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Tune each target in order.
    ///
    /// Incompatible targets are skipped. After cancellation the current
    /// session's partial report is kept and the remaining targets are listed
    /// as not started. Any other session-ending error aborts the run.
    pub async fn run_all(&self, targets: &[TuningTarget]) -> AtResult<RunnerReport> {
        let mut report = RunnerReport::default();

        for (i, target) in targets.iter().enumerate() {
            if self.cancel.is_cancelled() {
                report
                    .not_started
                    .extend(targets[i..].iter().map(|t| t.target_id.clone()));
                break;
            }

            let mut config = self.config.clone();
            if let Some(size_b) = target.size_b {
                config.constraints = TuningConstraints {
                    context_candidates: config.constraints.context_candidates.clone(),
                    max_offload: config.constraints.max_offload,
                    ..TuningConstraints::for_model_size(size_b)
                };
            }
            info!(
                target = %target.target_id,
                index = i + 1,
                total = targets.len(),
                "starting target"
            );

            let session = TuningSession::new(
                target.target_id.clone(),
                config,
                self.oracle.clone(),
                self.scorer.clone(),
                self.tasks.clone(),
                self.cache.clone(),
                self.monitor.clone(),
            )?
            .with_cancellation(self.cancel.clone());

            match session.run().await {
                Ok(session_report) => {
                    let cancelled = session_report.status == SessionStatus::Cancelled;
                    report.sessions.push(session_report);
                    if cancelled {
                        report
                            .not_started
                            .extend(targets[i + 1..].iter().map(|t| t.target_id.clone()));
                        break;
                    }
                }
                Err(AtError::Incompatible { target: id, reason }) => {
                    warn!(target = %id, %reason, "skipping incompatible target");
                    report.skipped.push(SkippedTarget {
                        target_id: id,
                        reason,
                    });
                }
                Err(e) => {
                    error!(target = %target.target_id, error = %e, "tuning session failed");
                    return Err(e);
                }
            }
        }

        info!(
            tuned = report.sessions.len(),
            skipped = report.skipped.len(),
            not_started = report.not_started.len(),
            "run finished"
        );
        Ok(report)
    }
}
