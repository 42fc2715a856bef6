//! Latency-constrained tuning of ordinal settings: context window by
//! descending candidates, offload depth by bisection with a final
//! confirmation.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use at_cache::ResultCache;
use at_optimizer::{DescendingCandidates, SearchRange};
use at_types::{
    AtError, AtResult, ConstraintProbe, EvaluationMode, InferenceSettings, OracleOutput,
    TrialOutcome, TuningConstraints,
};

use crate::control::{CancellationFlag, SafetyGate};
use crate::oracle::OracleRequest;
use crate::worker::OracleWorker;

/// Long prompt used for every latency measurement.
pub const PERFORMANCE_PROMPT: &str = "You are reviewing a long technical design document. \
Read the following sections carefully and then write a detailed, structured summary that \
covers the goals, the architecture, the data flow between components, the failure modes \
that were considered, and the open questions that remain. Section 1 describes a service \
that accepts requests, validates them, and schedules work on a pool of workers. Section 2 \
describes how results are cached on disk with a time-to-live and how stale entries are \
purged on startup. Section 3 describes how resource pressure is monitored and how work is \
paused until the system recovers. Section 4 lists the metrics that are exported and the \
alerts that fire when thresholds are crossed. Write at least several paragraphs.";

/// Suffix separating latency entries from quality entries in the cache.
const SPEED_NAMESPACE: &str = "speed";

/// Result of the context-window pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextOutcome {
    pub num_ctx: u32,
    /// Whether `num_ctx` met both latency limits.
    pub satisfied: bool,
    pub probe: Option<ConstraintProbe>,
    pub cancelled: bool,
}

/// Result of the offload pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OffloadOutcome {
    pub num_gpu: u32,
    /// Whether the final confirmation of the bisection result passed.
    pub confirmed: bool,
    /// Measurement backing `num_gpu`, for the final report.
    pub final_performance: Option<ConstraintProbe>,
    pub probes: usize,
    pub cancelled: bool,
}

/// Drives latency measurements for one target.
pub struct ConstraintTuner {
    worker: OracleWorker,
    cache: Arc<ResultCache>,
    gate: SafetyGate,
    constraints: TuningConstraints,
    timeout_margin: Duration,
}

impl ConstraintTuner {
    pub fn new(
        worker: OracleWorker,
        cache: Arc<ResultCache>,
        gate: SafetyGate,
        constraints: TuningConstraints,
    ) -> Self {
        Self {
            worker,
            cache,
            gate,
            constraints,
            timeout_margin: Duration::from_secs(10),
        }
    }

    pub fn with_timeout_margin(mut self, margin: Duration) -> Self {
        self.timeout_margin = margin;
        self
    }

    pub fn constraints(&self) -> &TuningConstraints {
        &self.constraints
    }

    /// Hard deadline for one measurement.
    pub fn measurement_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.constraints.time_limit_s.max(0.0)) + self.timeout_margin
    }

    fn satisfies(&self, probe: &ConstraintProbe) -> bool {
        probe.satisfies(self.constraints.time_limit_s, self.constraints.ttft_limit_s)
    }

    /// Latency figures for `settings`. Cached successes are reused unless
    /// `fresh` is set; failures score as [`ConstraintProbe::failed`] and are
    /// never cached. Returns `None` when cancelled.
    pub async fn measure(
        &self,
        target_id: &str,
        settings: &InferenceSettings,
        fresh: bool,
        cancel: &CancellationFlag,
    ) -> AtResult<Option<ConstraintProbe>> {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let cache_target = format!("{target_id}#{SPEED_NAMESPACE}");
        if !fresh {
            if let Some(probe) = self.cache.get_as::<_, ConstraintProbe>(&cache_target, settings)? {
                return Ok(Some(probe));
            }
        }
        if !self.gate.wait_until_safe(cancel).await {
            return Ok(None);
        }

        let request = OracleRequest::new(
            target_id,
            settings.clone(),
            PERFORMANCE_PROMPT,
            EvaluationMode::Streaming,
        );
        let probe = match self.worker.run(request, self.measurement_timeout()).await {
            TrialOutcome::Success(OracleOutput::Stream(probe)) => {
                self.cache.set(&cache_target, settings, &probe)?;
                probe
            }
            TrialOutcome::Incompatible(reason) => {
                return Err(AtError::Incompatible {
                    target: target_id.to_string(),
                    reason,
                })
            }
            other => {
                warn!(target = target_id, %settings, outcome = ?other, "speed measurement failed");
                ConstraintProbe::failed()
            }
        };
        Ok(Some(probe))
    }

    /// Largest context window from the candidate list that meets both
    /// limits, or the smallest candidate when none does.
    pub async fn tune_context(
        &self,
        target_id: &str,
        base: &InferenceSettings,
        cancel: &CancellationFlag,
    ) -> AtResult<ContextOutcome> {
        let mut candidates = DescendingCandidates::new(self.constraints.context_candidates.clone())?;
        let mut last_probe = None;

        while let Some(num_ctx) = candidates.next_candidate() {
            let settings = base.clone().with_num_ctx(num_ctx);
            let Some(probe) = self.measure(target_id, &settings, false, cancel).await? else {
                return Ok(ContextOutcome {
                    num_ctx: candidates.resolved(),
                    satisfied: false,
                    probe: last_probe,
                    cancelled: true,
                });
            };
            let ok = self.satisfies(&probe);
            info!(
                target = target_id,
                num_ctx,
                duration_s = probe.duration_s,
                ttft_s = probe.ttft_s,
                ok,
                "context window probed"
            );
            candidates.record(ok);
            last_probe = Some(probe);
        }

        let num_ctx = candidates.resolved();
        let satisfied = candidates.accepted().is_some();
        if !satisfied {
            warn!(target = target_id, num_ctx, "no context window met the limits, using the smallest");
        }
        Ok(ContextOutcome {
            num_ctx,
            satisfied,
            probe: last_probe,
            cancelled: false,
        })
    }

    /// Deepest offload in `[0, max_offload]` meeting both limits, confirmed
    /// by a fresh measurement. A failed confirmation falls back to zero
    /// offload, re-measured for the report.
    pub async fn tune_offload(
        &self,
        target_id: &str,
        base: &InferenceSettings,
        cancel: &CancellationFlag,
    ) -> AtResult<OffloadOutcome> {
        let mut range = SearchRange::new(self.constraints.max_offload);

        while let Some(num_gpu) = range.next_probe() {
            let settings = base.clone().with_num_gpu(num_gpu);
            let Some(probe) = self.measure(target_id, &settings, false, cancel).await? else {
                return Ok(OffloadOutcome {
                    num_gpu: range.best_working(),
                    confirmed: false,
                    final_performance: None,
                    probes: range.probes(),
                    cancelled: true,
                });
            };
            let ok = self.satisfies(&probe);
            info!(target = target_id, num_gpu, ok, tps = probe.throughput, "offload probed");
            range.record(ok);
        }

        let best = range.best_working();
        info!(target = target_id, best, probes = range.probes(), "bisection finished, confirming");
        let confirmation = self
            .measure(target_id, &base.clone().with_num_gpu(best), true, cancel)
            .await?;
        let Some(confirmation) = confirmation else {
            return Ok(OffloadOutcome {
                num_gpu: best,
                confirmed: false,
                final_performance: None,
                probes: range.probes(),
                cancelled: true,
            });
        };

        if self.satisfies(&confirmation) {
            info!(target = target_id, num_gpu = best, "offload confirmed");
            return Ok(OffloadOutcome {
                num_gpu: best,
                confirmed: true,
                final_performance: Some(confirmation),
                probes: range.probes(),
                cancelled: false,
            });
        }

        warn!(target = target_id, num_gpu = best, "confirmation failed, falling back to zero offload");
        let fallback = if best == 0 {
            Some(confirmation)
        } else {
            self.measure(target_id, &base.clone().with_num_gpu(0), true, cancel)
                .await?
        };
        Ok(OffloadOutcome {
            num_gpu: 0,
            confirmed: false,
            cancelled: fallback.is_none(),
            final_performance: fallback,
            probes: range.probes(),
        })
    }
}
