//! Quality evaluation: compatibility probe, then per-task generation and
//! scoring.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use at_types::{
    AtError, AtResult, EvalTask, EvaluationMode, InferenceSettings, OracleOutput, QualityReport,
    TrialOutcome,
};

use crate::control::{CancellationFlag, SafetyGate};
use crate::oracle::{AnswerScorer, OracleRequest, OVERALL_METRIC};
use crate::worker::OracleWorker;

/// Prompt used to check that a target can generate text at all.
pub const COMPATIBILITY_PROMPT: &str = "Please answer: what is 1 + 1?";

/// Scores inference settings against a fixed task set.
pub struct QualityEvaluator {
    worker: OracleWorker,
    scorer: Arc<dyn AnswerScorer>,
    tasks: Vec<EvalTask>,
    gate: SafetyGate,
    probe_timeout: Duration,
    item_timeout: Duration,
}

impl QualityEvaluator {
    pub fn new(
        worker: OracleWorker,
        scorer: Arc<dyn AnswerScorer>,
        tasks: Vec<EvalTask>,
        gate: SafetyGate,
    ) -> Self {
        Self {
            worker,
            scorer,
            tasks,
            gate,
            probe_timeout: Duration::from_secs(30),
            item_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeouts(mut self, probe_timeout: Duration, item_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self.item_timeout = item_timeout;
        self
    }

    pub fn tasks(&self) -> &[EvalTask] {
        &self.tasks
    }

    /// Short generation to detect targets that cannot generate at all.
    /// Only an incompatible signal is an error; other failures are left for
    /// the task loop to score.
    pub async fn check_compatibility(
        &self,
        target_id: &str,
        settings: &InferenceSettings,
    ) -> AtResult<()> {
        let request = OracleRequest::new(
            target_id,
            settings.clone(),
            COMPATIBILITY_PROMPT,
            EvaluationMode::Text,
        );
        match self.worker.run(request, self.probe_timeout).await {
            TrialOutcome::Incompatible(reason) => Err(AtError::Incompatible {
                target: target_id.to_string(),
                reason,
            }),
            TrialOutcome::Success(_) => Ok(()),
            other => {
                warn!(target = target_id, outcome = ?other, "compatibility probe inconclusive");
                Ok(())
            }
        }
    }

    /// Evaluate every task with `settings`. Returns `None` when cancelled
    /// before the evaluation completed.
    pub async fn evaluate(
        &self,
        target_id: &str,
        settings: &InferenceSettings,
        cancel: &CancellationFlag,
    ) -> AtResult<Option<QualityReport>> {
        if !self.gate.wait_until_safe(cancel).await {
            return Ok(None);
        }
        self.check_compatibility(target_id, settings).await?;

        let mut overall_sum = 0.0;
        let mut metric_sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        let mut failed = 0;

        for task in &self.tasks {
            if !self.gate.wait_until_safe(cancel).await {
                return Ok(None);
            }
            let request = OracleRequest::new(
                target_id,
                settings.clone(),
                task.prompt(),
                EvaluationMode::Text,
            );
            let answer = match self.worker.run(request, self.item_timeout).await {
                TrialOutcome::Success(OracleOutput::Text(answer)) => answer,
                TrialOutcome::Incompatible(reason) => {
                    return Err(AtError::Incompatible {
                        target: target_id.to_string(),
                        reason,
                    })
                }
                other => {
                    debug!(task = %task.id, outcome = ?other, "task scored as failure");
                    failed += 1;
                    continue;
                }
            };

            let metrics = self.scorer.score(task, &answer);
            let overall = metrics
                .get(OVERALL_METRIC)
                .copied()
                .filter(|v| v.is_finite())
                .unwrap_or(0.0)
                .clamp(0.0, 1.0);
            overall_sum += overall;
            for (name, value) in metrics {
                if name != OVERALL_METRIC && value.is_finite() {
                    let entry = metric_sums.entry(name).or_insert((0.0, 0));
                    entry.0 += value;
                    entry.1 += 1;
                }
            }
        }

        let evaluated = self.tasks.len();
        let report = QualityReport {
            overall: if evaluated == 0 {
                0.0
            } else {
                overall_sum / evaluated as f64
            },
            metrics: metric_sums
                .into_iter()
                .map(|(name, (sum, n))| (name, sum / n as f64))
                .collect(),
            tasks_evaluated: evaluated,
            tasks_failed: failed,
        };
        info!(
            target = target_id,
            %settings,
            overall = report.overall,
            failed,
            "quality evaluated"
        );
        Ok(Some(report))
    }
}
