//! Failure policy around an [`Oracle`].
//!
//! Analysis, decomposition and tool-input generation are hard calls: their
//! errors are returned and abort the run. Everything else degrades to a safe
//! default with a warning.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{instrument, warn};

use crate::core::types::{Adjustment, GoalDefinition, TaskSpec, clamp_confidence};
use crate::oracle::{
    AnalyzeRequest, AssessmentRequest, DecomposeRequest, EvaluationRequest, Oracle, OracleError,
    StrategyRequest, ToolInputRequest, ToolSelectionRequest,
};

#[derive(Clone)]
pub struct OracleClient {
    oracle: Arc<dyn Oracle>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for OracleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleClient")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl OracleClient {
    /// `timeout` bounds each awaited call; `None` waits indefinitely.
    pub fn new(oracle: Arc<dyn Oracle>, timeout: Option<Duration>) -> Self {
        Self { oracle, timeout }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, OracleError>>,
    ) -> Result<T, OracleError> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or(Err(OracleError::Timeout(limit))),
            None => call.await,
        }
    }

    #[instrument(skip_all)]
    pub async fn analyze(&self, request: AnalyzeRequest) -> Result<GoalDefinition, OracleError> {
        let goal = request.goal.clone();
        let analysis = self.bounded(self.oracle.analyze(request)).await?;
        Ok(analysis.into_definition(goal))
    }

    #[instrument(skip_all)]
    pub async fn decompose(&self, request: DecomposeRequest) -> Result<Vec<TaskSpec>, OracleError> {
        self.bounded(self.oracle.decompose(request)).await
    }

    #[instrument(skip_all, fields(task_id = %request.task.id, tool = %request.tool.id))]
    pub async fn generate_tool_input(&self, request: ToolInputRequest) -> Result<Value, OracleError> {
        self.bounded(self.oracle.generate_tool_input(request)).await
    }

    /// Tool ids in preference order; empty when the oracle fails.
    #[instrument(skip_all, fields(task_id = %request.task.id))]
    pub async fn select_tools(&self, request: ToolSelectionRequest) -> Vec<String> {
        match self.bounded(self.oracle.select_tools(request)).await {
            Ok(ids) => ids,
            Err(err) => {
                warn!(err = %err, "tool selection failed, selecting no tools");
                Vec::new()
            }
        }
    }

    /// Confidence in `[0, 1]`; zero when the oracle fails.
    #[instrument(skip_all, fields(task_id = %request.task.id))]
    pub async fn evaluate(&self, request: EvaluationRequest) -> f64 {
        match self.bounded(self.oracle.evaluate(request)).await {
            Ok(raw) => clamp_confidence(raw),
            Err(err) => {
                warn!(err = %err, "evaluation failed, scoring zero");
                0.0
            }
        }
    }

    #[instrument(skip_all)]
    pub async fn strategize(&self, request: StrategyRequest) -> Vec<Adjustment> {
        match self.bounded(self.oracle.strategize(request)).await {
            Ok(adjustments) => adjustments,
            Err(err) => {
                warn!(err = %err, "strategy failed, keeping checklist as is");
                Vec::new()
            }
        }
    }

    /// Whether the goal is achieved; `false` when the oracle fails.
    #[instrument(skip_all)]
    pub async fn assess(&self, request: AssessmentRequest) -> bool {
        match self.bounded(self.oracle.assess(request)).await {
            Ok(achieved) => achieved,
            Err(err) => {
                warn!(err = %err, "assessment failed, treating goal as not achieved");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedOracle, goal, task};

    fn evaluation() -> EvaluationRequest {
        EvaluationRequest {
            task: task("task-1"),
            results: Vec::new(),
        }
    }

    #[tokio::test]
    async fn evaluate_clamps_out_of_range_confidence() {
        let oracle = Arc::new(ScriptedOracle::new().with_confidences(&[1.4, -0.2]));
        let client = OracleClient::new(oracle, None);
        assert_eq!(client.evaluate(evaluation()).await, 1.0);
        assert_eq!(client.evaluate(evaluation()).await, 0.0);
    }

    #[tokio::test]
    async fn advisory_calls_degrade_on_failure() {
        let oracle = Arc::new(ScriptedOracle::new().failing_advisory());
        let client = OracleClient::new(oracle, None);

        assert_eq!(client.evaluate(evaluation()).await, 0.0);
        assert!(
            client
                .select_tools(ToolSelectionRequest {
                    task: task("task-1"),
                    tools: Vec::new(),
                })
                .await
                .is_empty()
        );
        assert!(
            !client
                .assess(AssessmentRequest {
                    goal: goal(),
                    completed: Vec::new(),
                    completion_rate: 1.0,
                })
                .await
        );
    }

    #[tokio::test]
    async fn slow_calls_time_out() {
        let oracle = Arc::new(ScriptedOracle::new().with_delay(Duration::from_millis(200)));
        let client = OracleClient::new(oracle, Some(Duration::from_millis(20)));
        let err = client
            .analyze(AnalyzeRequest {
                goal: "g".to_string(),
                context: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OracleError::Timeout(_)));
    }
}
