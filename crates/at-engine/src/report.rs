//! Exported results of a tuning session.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use uuid::Uuid;

use at_cache::CacheStats;
use at_monitor::MemorySummary;
use at_optimizer::HistoryEntry;
use at_types::{AtResult, ConstraintProbe, InferenceSettings, TuningConstraints};

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionStatus {
    Completed,
    /// Stopped early by the cancellation flag; results are best-so-far.
    Cancelled,
}

/// Everything a session learned about one target.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub target_id: String,
    pub status: SessionStatus,
    pub best_settings: InferenceSettings,
    pub best_score: Option<f64>,
    /// Per-metric means for the best settings.
    pub quality_metrics: BTreeMap<String, f64>,
    pub history: Vec<HistoryEntry>,
    pub parameter_importance: BTreeMap<String, f64>,
    /// `None` when the pass did not run.
    pub context_window_ok: Option<bool>,
    pub offload_confirmed: Option<bool>,
    pub final_performance: Option<ConstraintProbe>,
    pub constraints: TuningConstraints,
    pub cache_stats: CacheStats,
    pub memory_summary: Option<MemorySummary>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SessionReport {
    pub fn to_json(&self) -> AtResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// Human-readable multi-line summary.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Target: {} ({:?})", self.target_id, self.status);
        let _ = writeln!(out, "Best settings: {}", self.best_settings);
        match self.best_score {
            Some(score) => {
                let _ = writeln!(out, "Best quality score: {score:.3} after {} trials", self.history.len());
            }
            None => {
                let _ = writeln!(out, "No quality trials recorded");
            }
        }
        if !self.parameter_importance.is_empty() {
            let parts: Vec<String> = self
                .parameter_importance
                .iter()
                .map(|(name, weight)| format!("{name} {:.0}%", weight * 100.0))
                .collect();
            let _ = writeln!(out, "Parameter importance: {}", parts.join(", "));
        }
        if let Some(ok) = self.context_window_ok {
            let _ = writeln!(
                out,
                "Context window: {} ({})",
                self.best_settings.num_ctx.unwrap_or_default(),
                if ok { "within limits" } else { "smallest candidate, limits not met" }
            );
        }
        if let Some(confirmed) = self.offload_confirmed {
            let _ = writeln!(
                out,
                "Offload depth: {} ({})",
                self.best_settings.num_gpu.unwrap_or_default(),
                if confirmed { "confirmed" } else { "confirmation failed" }
            );
        }
        if let Some(perf) = &self.final_performance {
            let _ = writeln!(
                out,
                "Final performance: ttft {:.0} ms, {:.1} tokens/s, total {:.2} s",
                perf.ttft_s * 1000.0,
                perf.throughput,
                perf.duration_s
            );
        }
        let _ = writeln!(
            out,
            "Cache: {} hits, {} misses ({:.0}% hit rate)",
            self.cache_stats.hits,
            self.cache_stats.misses,
            self.cache_stats.hit_rate() * 100.0
        );
        if let Some(memory) = &self.memory_summary {
            let _ = writeln!(
                out,
                "Memory: current {:.1}%, peak {:.1}%",
                memory.current * 100.0,
                memory.max * 100.0
            );
        }
        out
    }
}

/// Target skipped by the runner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedTarget {
    pub target_id: String,
    pub reason: String,
}

/// Outcome of tuning several targets.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunnerReport {
    pub sessions: Vec<SessionReport>,
    pub skipped: Vec<SkippedTarget>,
    /// Targets not attempted because the run was cancelled.
    pub not_started: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> SessionReport {
        let now = Utc::now();
        SessionReport {
            session_id: Uuid::new_v4(),
            target_id: "llama3:8b".into(),
            status: SessionStatus::Completed,
            best_settings: InferenceSettings::new().with_num_ctx(4096).with_num_gpu(48),
            best_score: Some(0.912),
            quality_metrics: BTreeMap::new(),
            history: Vec::new(),
            parameter_importance: BTreeMap::from([
                ("temperature".to_string(), 0.75),
                ("top_p".to_string(), 0.25),
            ]),
            context_window_ok: Some(true),
            offload_confirmed: Some(false),
            final_performance: Some(ConstraintProbe::new(1.2, 36.0, 29.6)),
            constraints: TuningConstraints::default(),
            cache_stats: CacheStats::default(),
            memory_summary: None,
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn summary_mentions_key_results() {
        let text = report().summary();
        assert!(text.contains("Target: llama3:8b (Completed)"));
        assert!(text.contains("Best quality score: 0.912"));
        assert!(text.contains("temperature 75%"));
        assert!(text.contains("Context window: 4096 (within limits)"));
        assert!(text.contains("Offload depth: 48 (confirmation failed)"));
        assert!(text.contains("ttft 1200 ms"));
    }

    #[test]
    fn serializes_to_json() {
        let json: serde_json::Value = serde_json::from_str(&report().to_json().unwrap()).unwrap();
        assert_eq!(json["status"], "Completed");
        assert_eq!(json["best_settings"]["num_gpu"], 48);
        assert_eq!(json["final_performance"]["throughput"], 36.0);
    }
}
