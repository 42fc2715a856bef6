//! Deterministic stand-ins for a real inference engine, used by the demo
//! binary and by tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use at_types::{
    ConstraintProbe, EvalTask, EvaluationError, EvaluationMode, OracleOutput, TaskKind,
};

use crate::oracle::{AnswerScorer, EvaluationOracle, OracleRequest, OVERALL_METRIC};
use crate::quality::COMPATIBILITY_PROMPT;

/// Oracle with a quadratic quality surface and a simple latency model.
///
/// Text answers are the quality score itself, formatted as a number, so
/// [`NumericAnswerScorer`] can read them back. Latency grows with context
/// length (time to first token) and with offload depth (throughput).
#[derive(Debug)]
pub struct SyntheticOracle {
    pub optimum_temperature: f64,
    pub optimum_top_p: f64,
    /// Seconds of time-to-first-token per 1024 context tokens.
    pub ttft_per_kilo_ctx: f64,
    /// Tokens per second with nothing offloaded.
    pub base_throughput: f64,
    /// Throughput lost per offloaded layer.
    pub throughput_per_layer: f64,
    incompatible: BTreeSet<String>,
    calls: AtomicUsize,
}

impl Default for SyntheticOracle {
    fn default() -> Self {
        Self {
            optimum_temperature: 0.6,
            optimum_top_p: 0.9,
            ttft_per_kilo_ctx: 0.3,
            base_throughput: 60.0,
            throughput_per_layer: 0.5,
            incompatible: BTreeSet::new(),
            calls: AtomicUsize::new(0),
        }
    }
}

impl SyntheticOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `target_id` report itself as unable to generate.
    pub fn with_incompatible(mut self, target_id: impl Into<String>) -> Self {
        self.incompatible.insert(target_id.into());
        self
    }

    /// Number of invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn quality(&self, temperature: f64, top_p: f64) -> f64 {
        let dt = temperature - self.optimum_temperature;
        let dp = top_p - self.optimum_top_p;
        (1.0 - dt * dt - dp * dp).clamp(0.0, 1.0)
    }

    pub fn latency(&self, num_ctx: u32, num_gpu: u32, num_predict: u32) -> ConstraintProbe {
        let ttft = self.ttft_per_kilo_ctx * f64::from(num_ctx) / 1024.0;
        let throughput =
            (self.base_throughput - self.throughput_per_layer * f64::from(num_gpu)).max(0.1);
        ConstraintProbe::new(ttft, throughput, ttft + f64::from(num_predict) / throughput)
    }
}

#[async_trait]
impl EvaluationOracle for SyntheticOracle {
    async fn invoke(
        &self,
        request: &OracleRequest,
        _timeout: Duration,
    ) -> Result<OracleOutput, EvaluationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.incompatible.contains(&request.target_id) {
            return Err(EvaluationError::Incompatible {
                reason: format!("{} does not support generation", request.target_id),
            });
        }
        let settings = &request.settings;
        match request.mode {
            EvaluationMode::Text if request.prompt == COMPATIBILITY_PROMPT => {
                Ok(OracleOutput::Text("2".into()))
            }
            EvaluationMode::Text => {
                let quality = self.quality(
                    settings.temperature.unwrap_or(0.8),
                    settings.top_p.unwrap_or(0.9),
                );
                Ok(OracleOutput::Text(format!("{quality:.6}")))
            }
            EvaluationMode::Streaming => Ok(OracleOutput::Stream(self.latency(
                settings.num_ctx.unwrap_or(2048),
                settings.num_gpu.unwrap_or(0),
                settings.num_predict.unwrap_or(128),
            ))),
        }
    }
}

/// Scores an answer that is itself a number in [0, 1].
#[derive(Debug, Clone, Copy, Default)]
pub struct NumericAnswerScorer;

impl AnswerScorer for NumericAnswerScorer {
    fn score(&self, _task: &EvalTask, answer: &str) -> BTreeMap<String, f64> {
        let parsed = answer.trim().parse::<f64>().ok().filter(|v| v.is_finite());
        BTreeMap::from([
            (OVERALL_METRIC.to_string(), parsed.unwrap_or(0.0).clamp(0.0, 1.0)),
            ("parseable".to_string(), if parsed.is_some() { 1.0 } else { 0.0 }),
        ])
    }
}

/// One task of each kind.
pub fn demo_tasks() -> Vec<EvalTask> {
    vec![
        EvalTask::new(
            "fictional_company_ceo",
            TaskKind::Hallucination {
                context: "Aurora Dynamics builds tidal turbines. It was founded in 2011 \
                          in Bergen and employs 340 people."
                    .into(),
                question: "Who is the CEO of Aurora Dynamics?".into(),
            },
        ),
        EvalTask::new(
            "turbine_report",
            TaskKind::Summarization {
                source_text: "Tidal turbines convert the kinetic energy of moving water into \
                              electricity. Because tides are predictable, output can be \
                              scheduled days in advance, unlike wind or solar."
                    .into(),
            },
        ),
        EvalTask::new(
            "fibonacci",
            TaskKind::Coding {
                prompt: "def fibonacci(n):\n    \"\"\"Return the n-th Fibonacci number.\"\"\"\n"
                    .into(),
            },
        ),
    ]
}
