//! # at-engine
//!
//! Tuning sessions for autotune. A [`TuningSession`] searches the sampling
//! knobs with the adaptive optimizer, scoring each candidate through a
//! [`QualityEvaluator`], then fits context window and offload depth to the
//! latency limits with a [`ConstraintTuner`]. Oracle calls run on isolated
//! tasks under hard deadlines, behind a resource [`SafetyGate`].

pub mod constraints;
pub mod control;
pub mod oracle;
pub mod quality;
pub mod report;
pub mod runner;
pub mod session;
pub mod synthetic;
pub mod worker;

pub use constraints::{ConstraintTuner, ContextOutcome, OffloadOutcome, PERFORMANCE_PROMPT};
pub use control::{CancellationFlag, SafetyGate};
pub use oracle::{AnswerScorer, EvaluationOracle, OracleRequest, OVERALL_METRIC};
pub use quality::{QualityEvaluator, COMPATIBILITY_PROMPT};
pub use report::{RunnerReport, SessionReport, SessionStatus, SkippedTarget};
pub use runner::{TuningRunner, TuningTarget};
pub use session::TuningSession;
pub use synthetic::{demo_tasks, NumericAnswerScorer, SyntheticOracle};
pub use worker::OracleWorker;
