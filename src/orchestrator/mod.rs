//! 工具调用编排器 — 模型请求外部动作时的三态状态机
//!
//! Tool-call orchestrator. Drives the conversation state machine: the model
//! answers (`Done`) or requests tool calls (`ExecutingTools`), whose results
//! are fed back as synthetic turns and re-dispatched (`AwaitingModel`). A
//! hard iteration cap bounds runaway loops.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::types::chat::ChatResponse;
use crate::types::message::Turn;
use crate::types::tool::{ToolCall, ToolResult};
use crate::{Error, Result};

/// An external collaborator a model can invoke mid-conversation (weather,
/// search, code execution description, …).
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    fn name(&self) -> &str;
    async fn execute(&self, arguments: Value) -> Result<Value>;
}

/// Named set of registered executors.
#[derive(Default)]
pub struct ToolExecutorSet {
    executors: HashMap<String, Arc<dyn ToolExecutor>>,
}

impl ToolExecutorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, executor: Arc<dyn ToolExecutor>) {
        self.executors.insert(executor.name().to_string(), executor);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolExecutor>> {
        self.executors.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

/// Orchestrator state. `ExecutingTools` fans out all of a turn's calls
/// concurrently and joins before re-dispatching; there is no partial
/// continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    AwaitingModel,
    ExecutingTools,
    Done,
}

pub struct ToolOrchestrator {
    executors: Arc<ToolExecutorSet>,
    iteration_cap: u32,
}

impl ToolOrchestrator {
    pub fn new(executors: Arc<ToolExecutorSet>, iteration_cap: u32) -> Self {
        Self {
            executors,
            iteration_cap: iteration_cap.max(1),
        }
    }

    /// Drive the conversation to `Done`. `call_model` performs one full
    /// provider round trip over the given turns.
    pub async fn drive<F, Fut>(
        &self,
        mut turns: Vec<Turn>,
        cancel: &CancellationToken,
        mut call_model: F,
    ) -> Result<ChatResponse>
    where
        F: FnMut(Vec<Turn>) -> Fut,
        Fut: std::future::Future<Output = Result<ChatResponse>>,
    {
        let mut phase = TurnPhase::AwaitingModel;
        let mut iterations = 0u32;
        let mut pending: Vec<ToolCall> = Vec::new();
        let mut final_response: Option<ChatResponse> = None;

        loop {
            match phase {
                TurnPhase::AwaitingModel => {
                    let response = call_model(turns.clone()).await?;
                    if response.tool_calls.is_empty() {
                        final_response = Some(response);
                        phase = TurnPhase::Done;
                        continue;
                    }

                    iterations += 1;
                    if iterations > self.iteration_cap {
                        warn!(
                            iterations,
                            cap = self.iteration_cap,
                            "tool-call loop exceeded iteration cap"
                        );
                        return Err(Error::Terminal {
                            attempts: self.iteration_cap,
                            message: "tool-call iteration cap exceeded".into(),
                            cause: None,
                        });
                    }
                    pending = response.tool_calls;
                    phase = TurnPhase::ExecutingTools;
                }
                TurnPhase::ExecutingTools => {
                    let results = self.run_tools(&pending, cancel).await?;

                    // Record the model's request, then one synthetic turn per
                    // result, in the order the calls were issued.
                    turns.push(Turn::assistant(serde_json::to_string(&pending)?));
                    for result in &results {
                        turns.push(Self::result_turn(result));
                    }
                    phase = TurnPhase::AwaitingModel;
                }
                TurnPhase::Done => {
                    return Ok(final_response.expect("Done is only reached with a response"));
                }
            }
        }
    }

    /// Execute all calls of one turn concurrently and join. Cancellation
    /// discards any partially-collected results.
    pub async fn run_tools(
        &self,
        calls: &[ToolCall],
        cancel: &CancellationToken,
    ) -> Result<Vec<ToolResult>> {
        let futures = calls.iter().map(|call| self.execute_one(call));
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            results = join_all(futures) => Ok(results),
        }
    }

    /// A single tool execution never fails the dispatch: errors become
    /// failure results the model can react to.
    async fn execute_one(&self, call: &ToolCall) -> ToolResult {
        let Some(executor) = self.executors.get(&call.name) else {
            warn!(tool = call.name.as_str(), "model requested an unknown tool");
            return ToolResult::failure(&call.id, format!("unknown tool '{}'", call.name));
        };

        debug!(tool = call.name.as_str(), call_id = call.id.as_str(), "executing tool");
        match executor.execute(call.arguments.clone()).await {
            Ok(payload) => ToolResult::success(&call.id, payload),
            Err(e) => {
                let err = Error::ToolExecution {
                    tool: call.name.clone(),
                    message: e.to_string(),
                };
                warn!(tool = call.name.as_str(), error = %err, "tool execution failed");
                ToolResult::failure(&call.id, err.to_string())
            }
        }
    }

    fn result_turn(result: &ToolResult) -> Turn {
        let content = if result.ok {
            match &result.payload {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }
        } else {
            format!(
                "tool failed: {}",
                result.payload.as_str().unwrap_or("unknown error")
            )
        };
        Turn::tool(&result.id, content)
    }
}
