//! Isolated, terminable oracle invocations.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use at_types::{EvaluationError, TrialOutcome};

use crate::oracle::{EvaluationOracle, OracleRequest};

/// Runs each oracle call on its own task under a hard deadline.
///
/// On timeout the task is aborted and the outcome is
/// [`TrialOutcome::Timeout`]; a task that dies without returning becomes an
/// [`TrialOutcome::OracleError`].
#[derive(Clone)]
pub struct OracleWorker {
    oracle: Arc<dyn EvaluationOracle>,
}

impl OracleWorker {
    pub fn new(oracle: Arc<dyn EvaluationOracle>) -> Self {
        Self { oracle }
    }

    pub async fn run(&self, request: OracleRequest, timeout: Duration) -> TrialOutcome {
        let oracle = Arc::clone(&self.oracle);
        let target = request.target_id.clone();
        let mode = request.mode;
        let mut handle = tokio::spawn(async move { oracle.invoke(&request, timeout).await });

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(result)) => {
                if let Err(e) = &result {
                    debug!(%target, ?mode, error = %e, "oracle call failed");
                }
                TrialOutcome::from_result(result)
            }
            Ok(Err(join_error)) => {
                warn!(%target, error = %join_error, "oracle worker terminated abnormally");
                TrialOutcome::from_result(Err(EvaluationError::Failed {
                    message: format!("worker terminated: {join_error}"),
                }))
            }
            Err(_) => {
                handle.abort();
                warn!(%target, ?mode, timeout_ms = timeout.as_millis() as u64, "oracle call timed out");
                TrialOutcome::Timeout
            }
        }
    }
}
