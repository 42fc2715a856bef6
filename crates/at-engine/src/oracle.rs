//! Collaborator contracts: the evaluation oracle and the answer scorer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use at_types::{EvalTask, EvaluationError, EvaluationMode, InferenceSettings, OracleOutput};

/// Name of the aggregate metric every scorer must report.
pub const OVERALL_METRIC: &str = "overall";

/// A single generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleRequest {
    pub target_id: String,
    pub settings: InferenceSettings,
    pub prompt: String,
    pub mode: EvaluationMode,
}

impl OracleRequest {
    pub fn new(
        target_id: impl Into<String>,
        settings: InferenceSettings,
        prompt: impl Into<String>,
        mode: EvaluationMode,
    ) -> Self {
        Self {
            target_id: target_id.into(),
            settings,
            prompt: prompt.into(),
            mode,
        }
    }
}

/// The inference engine under test.
///
/// Implementations must report a target that cannot perform the request at
/// all as [`EvaluationError::Incompatible`], never as an ordinary failure.
#[async_trait]
pub trait EvaluationOracle: Send + Sync {
    /// Run one generation. `Text` mode yields [`OracleOutput::Text`];
    /// `Streaming` mode yields [`OracleOutput::Stream`] latency figures.
    async fn invoke(
        &self,
        request: &OracleRequest,
        timeout: Duration,
    ) -> Result<OracleOutput, EvaluationError>;
}

/// Black-box answer grader.
pub trait AnswerScorer: Send + Sync {
    /// Metrics for one answer. Must contain [`OVERALL_METRIC`] in [0, 1].
    fn score(&self, task: &EvalTask, answer: &str) -> BTreeMap<String, f64>;
}
