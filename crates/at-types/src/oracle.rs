//! Contracts shared with the evaluation oracle and the answer scorer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::EvaluationError;

/// How the oracle should run a generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluationMode {
    /// Return the full generated text.
    Text,
    /// Stream the output and report latency figures.
    Streaming,
}

/// Latency figures from one streaming invocation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConstraintProbe {
    /// Seconds until the first unit of output arrived.
    pub ttft_s: f64,
    /// Output units per second after the first one.
    pub throughput: f64,
    /// Total wall time of the request in seconds.
    pub duration_s: f64,
}

impl ConstraintProbe {
    pub fn new(ttft_s: f64, throughput: f64, duration_s: f64) -> Self {
        Self {
            ttft_s,
            throughput,
            duration_s,
        }
    }

    /// Worst-case probe recorded for failed or timed-out measurements.
    pub fn failed() -> Self {
        Self {
            ttft_s: f64::INFINITY,
            throughput: 0.0,
            duration_s: f64::INFINITY,
        }
    }

    /// Both latency constraints hold (strict comparisons).
    pub fn satisfies(&self, time_limit_s: f64, ttft_limit_s: f64) -> bool {
        self.duration_s < time_limit_s && self.ttft_s < ttft_limit_s
    }
}

/// Successful oracle output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OracleOutput {
    Text(String),
    Stream(ConstraintProbe),
}

/// Tagged outcome of a single oracle invocation as seen by the tuner.
#[derive(Debug, Clone, PartialEq)]
pub enum TrialOutcome {
    Success(OracleOutput),
    /// The worker exceeded its deadline and was terminated.
    Timeout,
    /// The oracle reported an ordinary failure.
    OracleError(String),
    /// The target cannot perform the operation at all.
    Incompatible(String),
}

impl TrialOutcome {
    pub fn from_result(result: Result<OracleOutput, EvaluationError>) -> Self {
        match result {
            Ok(output) => TrialOutcome::Success(output),
            Err(EvaluationError::Timeout { .. }) => TrialOutcome::Timeout,
            Err(EvaluationError::Incompatible { reason }) => TrialOutcome::Incompatible(reason),
            Err(other) => TrialOutcome::OracleError(other.to_string()),
        }
    }

    pub fn is_incompatible(&self) -> bool {
        matches!(self, TrialOutcome::Incompatible(_))
    }
}

/// Kind of evaluation task used for quality scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task_type", rename_all = "snake_case")]
pub enum TaskKind {
    /// Answer a question using only the supplied context.
    Hallucination { context: String, question: String },
    /// Summarize a source text.
    Summarization { source_text: String },
    /// Complete a code prompt.
    Coding { prompt: String },
}

/// A single quality-evaluation task handed to the scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalTask {
    pub id: String,
    #[serde(flatten)]
    pub kind: TaskKind,
    /// Scorer-specific reference data (keywords, expected facts).
    #[serde(default)]
    pub reference: serde_json::Value,
}

impl EvalTask {
    pub fn new(id: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            id: id.into(),
            kind,
            reference: serde_json::Value::Null,
        }
    }

    pub fn with_reference(mut self, reference: serde_json::Value) -> Self {
        self.reference = reference;
        self
    }

    /// Prompt sent to the oracle for this task.
    pub fn prompt(&self) -> String {
        match &self.kind {
            TaskKind::Hallucination { context, question } => format!(
                "Answer using only the information below.\n\nContext: {context}\n\nQuestion: {question}"
            ),
            TaskKind::Summarization { source_text } => {
                format!("Summarize the following article:\n\n{source_text}")
            }
            TaskKind::Coding { prompt } => prompt.clone(),
        }
    }
}

/// Aggregated quality metrics for one parameter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Mean `overall` score across tasks, in [0, 1].
    pub overall: f64,
    /// Per-metric means (excluding `overall`).
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    pub tasks_evaluated: usize,
    pub tasks_failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_constraints_are_strict() {
        let probe = ConstraintProbe::new(2.0, 30.0, 10.0);
        assert!(probe.satisfies(10.5, 2.5));
        assert!(!probe.satisfies(10.0, 2.5));
        assert!(!probe.satisfies(10.5, 2.0));
        assert!(!ConstraintProbe::failed().satisfies(f64::MAX, f64::MAX));
    }

    #[test]
    fn outcome_from_result_tags_variants() {
        let ok = TrialOutcome::from_result(Ok(OracleOutput::Text("2".into())));
        assert!(matches!(ok, TrialOutcome::Success(_)));

        let timeout = TrialOutcome::from_result(Err(EvaluationError::Timeout { timeout_ms: 5 }));
        assert_eq!(timeout, TrialOutcome::Timeout);

        let incompatible = TrialOutcome::from_result(Err(EvaluationError::Incompatible {
            reason: "embedding model".into(),
        }));
        assert!(incompatible.is_incompatible());

        let failed = TrialOutcome::from_result(Err(EvaluationError::Failed {
            message: "connection reset".into(),
        }));
        assert!(matches!(failed, TrialOutcome::OracleError(ref m) if m.contains("connection reset")));
    }

    #[test]
    fn task_prompts_embed_inputs() {
        let task = EvalTask::new(
            "fictional_company",
            TaskKind::Hallucination {
                context: "GlowTech makes quantum batteries.".into(),
                question: "Who is the CEO?".into(),
            },
        );
        let prompt = task.prompt();
        assert!(prompt.contains("GlowTech makes quantum batteries."));
        assert!(prompt.contains("Who is the CEO?"));

        let coding = EvalTask::new("add", TaskKind::Coding { prompt: "def add(a, b):".into() });
        assert_eq!(coding.prompt(), "def add(a, b):");
    }

    #[test]
    fn task_serializes_with_type_tag() {
        let task = EvalTask::new(
            "sum-1",
            TaskKind::Summarization {
                source_text: "text".into(),
            },
        );
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["task_type"], "summarization");
        assert_eq!(json["source_text"], "text");

        let back: EvalTask = serde_json::from_value(json).unwrap();
        assert_eq!(back, task);
    }
}
