mod state;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::approval::{ApprovalDecision, ApprovalGate, GateKind, GateOutcome, GateRequest};
use crate::cancel::CancellationHandle;
use crate::error::{AgentError, StoreError};
use crate::interpolation::stringify;
use crate::llm::{ChatModel, ModelMessage, ModelToolChoice, ModelToolDefinition};
use crate::state::{ExecutionStatus, FailureReason, PendingApproval};
use crate::store::{ExecutionSnapshot, ExecutionStateStore};
use crate::tools::{ToolExecution, ToolInvoker, ToolSpec};

pub use state::{AgentCursor, AgentExecutionState};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_iterations: u32,
    pub system_prompt: Option<String>,
    /// Model override passed to the provider on every call.
    pub model: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 24,
            system_prompt: None,
            model: None,
        }
    }
}

pub struct AgentBuilder {
    model: Option<Arc<dyn ChatModel>>,
    tools: Vec<ToolSpec>,
    config: AgentConfig,
    gate: ApprovalGate,
    store: Option<Arc<dyn ExecutionStateStore>>,
    cancellation: CancellationHandle,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self {
            model: None,
            tools: Vec::new(),
            config: AgentConfig::default(),
            gate: ApprovalGate::new(),
            store: None,
            cancellation: CancellationHandle::new(),
        }
    }
}

impl AgentBuilder {
    pub fn model<M>(mut self, model: M) -> Self
    where
        M: ChatModel + 'static,
    {
        self.model = Some(Arc::new(model));
        self
    }

    pub fn shared_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn tool(mut self, tool: ToolSpec) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn max_iterations(mut self, max_iterations: u32) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    pub fn model_name(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    /// Decides whether a requested tool call runs. `Modify` supplies
    /// replacement arguments.
    pub fn before_tool_execution<F>(mut self, callback: F) -> Self
    where
        F: Fn(&GateRequest<'_>) -> ApprovalDecision + Send + Sync + 'static,
    {
        self.gate = self.gate.on(GateKind::ToolExecution, callback);
        self
    }

    /// Reviews a tool result before the model sees it. `Modify` replaces the
    /// result; `Reject` keeps it.
    pub fn after_tool_execution<F>(mut self, callback: F) -> Self
    where
        F: Fn(&GateRequest<'_>) -> ApprovalDecision + Send + Sync + 'static,
    {
        self.gate = self.gate.on(GateKind::ToolResult, callback);
        self
    }

    /// Reviews the final answer. `Modify` replaces it; `Reject` keeps it.
    pub fn before_final_response<F>(mut self, callback: F) -> Self
    where
        F: Fn(&GateRequest<'_>) -> ApprovalDecision + Send + Sync + 'static,
    {
        self.gate = self.gate.on(GateKind::FinalResponse, callback);
        self
    }

    pub fn persist_to(mut self, store: Arc<dyn ExecutionStateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Routes `kinds` to out-of-process approval through the execution store.
    pub fn defer_approval(
        mut self,
        kinds: impl IntoIterator<Item = GateKind>,
        timeout_minutes: Option<u32>,
    ) -> Self {
        self.gate = self.gate.defer(kinds, timeout_minutes);
        self
    }

    /// Engine-wide stop: cancelling `handle` stops every run, current and
    /// future.
    pub fn cancellation(mut self, handle: CancellationHandle) -> Self {
        self.cancellation = handle;
        self
    }

    pub fn build(self) -> Result<Agent, AgentError> {
        let Some(model) = self.model else {
            return Err(AgentError::Config(
                "agent model must be configured via AgentBuilder::model(...)".to_string(),
            ));
        };

        if self.config.max_iterations == 0 {
            return Err(AgentError::Config(
                "max_iterations must be at least 1".to_string(),
            ));
        }

        let invoker = ToolInvoker::new(self.tools)
            .map_err(|name| AgentError::Config(format!("duplicate tool registered: {name}")))?;

        for kind in [GateKind::StepExecution, GateKind::StepResult] {
            if self.gate.is_deferred(kind) {
                return Err(AgentError::Config(format!(
                    "gate {kind} does not apply to agent runs"
                )));
            }
        }

        let deferred = [GateKind::ToolExecution, GateKind::ToolResult, GateKind::FinalResponse]
            .into_iter()
            .any(|kind| self.gate.is_deferred(kind));
        let gate = match &self.store {
            Some(store) => self.gate.with_store(store.clone()),
            None if deferred => {
                return Err(AgentError::Config(
                    "deferred approval requires an execution store (AgentBuilder::persist_to)"
                        .to_string(),
                ));
            }
            None => self.gate,
        };

        Ok(Agent {
            model,
            invoker,
            config: self.config,
            gate,
            store: self.store,
            cancellation: self.cancellation,
        })
    }
}

/// Drives tool-calling runs against one model and tool set.
///
/// Each call to [`Agent::run`] is an independent run with its own
/// [`AgentExecutionState`]; the agent itself holds no per-run state.
pub struct Agent {
    model: Arc<dyn ChatModel>,
    invoker: ToolInvoker,
    config: AgentConfig,
    gate: ApprovalGate,
    store: Option<Arc<dyn ExecutionStateStore>>,
    cancellation: CancellationHandle,
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::default()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Handle that stops every run of this agent, current and future. Use
    /// [`Agent::run_cancellable`] to cancel a single run.
    pub fn cancellation(&self) -> CancellationHandle {
        self.cancellation.clone()
    }

    /// Starts a run and drives it until it completes, fails, pauses or is
    /// cancelled.
    pub async fn run(&self, input: impl Into<String>) -> Result<AgentExecutionState, AgentError> {
        self.run_cancellable(input, CancellationHandle::new()).await
    }

    /// Like [`Agent::run`], but `cancellation` stops this run only.
    pub async fn run_cancellable(
        &self,
        input: impl Into<String>,
        cancellation: CancellationHandle,
    ) -> Result<AgentExecutionState, AgentError> {
        let mut transcript = Vec::new();
        if let Some(system_prompt) = &self.config.system_prompt {
            transcript.push(ModelMessage::system(system_prompt.clone()));
        }
        transcript.push(ModelMessage::user(input));

        let state = AgentExecutionState::new(self.config.max_iterations, transcript);
        tracing::info!(
            execution_id = %state.execution_id,
            max_iterations = state.max_iterations,
            "agent run started"
        );
        self.drive(state, None, &cancellation).await
    }

    /// Runs to completion and returns the final answer; any other outcome is
    /// an error.
    pub async fn query(&self, input: impl Into<String>) -> Result<String, AgentError> {
        let state = self.run(input).await?;
        match state.status {
            ExecutionStatus::Completed => Ok(state.final_response.unwrap_or_default()),
            ExecutionStatus::Paused => Err(AgentError::Paused {
                kind: state
                    .pending_approval
                    .map(|pending| pending.kind)
                    .unwrap_or(GateKind::ToolExecution),
                execution_id: state.execution_id,
            }),
            ExecutionStatus::Cancelled => Err(AgentError::Cancelled {
                execution_id: state.execution_id,
            }),
            ExecutionStatus::Failed | ExecutionStatus::Running => match state.failure {
                Some(failure) if failure.reason == FailureReason::MaxIterationsExceeded => {
                    Err(AgentError::MaxIterationsReached {
                        max_iterations: state.max_iterations,
                    })
                }
                Some(failure) => Err(AgentError::Failed(failure.message)),
                None => Err(AgentError::Failed(format!(
                    "run ended in status {}",
                    state.status
                ))),
            },
        }
    }

    /// Loads a paused run, records `decision` against its pending approval
    /// request and continues from the suspension point.
    pub async fn resume(
        &self,
        execution_id: &str,
        decision: ApprovalDecision,
    ) -> Result<AgentExecutionState, AgentError> {
        self.resume_cancellable(execution_id, decision, CancellationHandle::new())
            .await
    }

    /// Like [`Agent::resume`], but `cancellation` stops this run only.
    pub async fn resume_cancellable(
        &self,
        execution_id: &str,
        decision: ApprovalDecision,
        cancellation: CancellationHandle,
    ) -> Result<AgentExecutionState, AgentError> {
        let state = self.load(execution_id).await?;
        self.settle_and_continue(state, decision, &cancellation)
            .await
    }

    /// Continues `state` with `decision` standing in for the gate that
    /// suspended it. When a store is configured the decision is recorded on
    /// the pending approval request first; an expired request turns it into
    /// a rejection.
    pub async fn resume_state(
        &self,
        state: AgentExecutionState,
        decision: ApprovalDecision,
    ) -> Result<AgentExecutionState, AgentError> {
        self.settle_and_continue(state, decision, &CancellationHandle::new())
            .await
    }

    /// Resumes a paused run with whatever decision was recorded out of
    /// process. An expired, undecided request counts as a rejection.
    pub async fn resume_pending(
        &self,
        execution_id: &str,
    ) -> Result<AgentExecutionState, AgentError> {
        let state = self.load(execution_id).await?;
        let request_id = paused_request(&state)?;
        let store = self.require_store()?;
        let request = store
            .approval_request(&request_id)
            .await?
            .ok_or_else(|| StoreError::ApprovalNotFound(request_id.clone()))?;

        let Some(decision) = request.effective_decision(chrono::Utc::now()) else {
            return Err(AgentError::ApprovalPending { request_id });
        };
        if request.decision.is_none() {
            tracing::info!(%execution_id, %request_id, "approval request expired; treating as rejected");
            store.record_approval_decision(&request_id, &decision).await?;
        }
        self.continue_paused(state, decision, &CancellationHandle::new())
            .await
    }

    /// Marks a persisted run cancelled. Terminal runs are returned unchanged.
    pub async fn cancel(&self, execution_id: &str) -> Result<AgentExecutionState, AgentError> {
        let mut state = self.load(execution_id).await?;
        if !state.is_terminal() {
            state.cancel();
            tracing::info!(%execution_id, "agent run cancelled");
            self.persist(&state).await?;
        }
        Ok(state)
    }

    async fn settle_and_continue(
        &self,
        state: AgentExecutionState,
        decision: ApprovalDecision,
        cancellation: &CancellationHandle,
    ) -> Result<AgentExecutionState, AgentError> {
        let request_id = paused_request(&state)?;
        let decision = match &self.store {
            Some(store) => store.settle_approval(&request_id, decision).await?,
            None => decision,
        };
        self.continue_paused(state, decision, cancellation).await
    }

    async fn continue_paused(
        &self,
        mut state: AgentExecutionState,
        decision: ApprovalDecision,
        cancellation: &CancellationHandle,
    ) -> Result<AgentExecutionState, AgentError> {
        tracing::info!(execution_id = %state.execution_id, ?decision, "agent run resumed");
        state.resume();
        self.drive(state, Some(decision), cancellation).await
    }

    async fn drive(
        &self,
        mut state: AgentExecutionState,
        mut injected: Option<ApprovalDecision>,
        cancellation: &CancellationHandle,
    ) -> Result<AgentExecutionState, AgentError> {
        let tool_definitions: Vec<ModelToolDefinition> = self.invoker.definitions();
        let tool_choice = if tool_definitions.is_empty() {
            ModelToolChoice::None
        } else {
            ModelToolChoice::Auto
        };

        while state.status == ExecutionStatus::Running {
            if cancellation.is_cancelled() || self.cancellation.is_cancelled() {
                tracing::info!(execution_id = %state.execution_id, "agent run cancelled");
                state.cancel();
                break;
            }

            match std::mem::take(&mut state.cursor) {
                AgentCursor::Model => {
                    if state.current_iteration >= state.max_iterations {
                        tracing::info!(
                            execution_id = %state.execution_id,
                            max_iterations = state.max_iterations,
                            "agent run exhausted its iteration budget"
                        );
                        state.fail(
                            FailureReason::MaxIterationsExceeded,
                            format!("max iterations reached ({})", state.max_iterations),
                        );
                        break;
                    }
                    state.current_iteration += 1;
                    tracing::debug!(
                        execution_id = %state.execution_id,
                        iteration = state.current_iteration,
                        "calling model"
                    );

                    let completion = match self
                        .model
                        .invoke(
                            &state.transcript,
                            &tool_definitions,
                            tool_choice.clone(),
                            self.config.model.as_deref(),
                        )
                        .await
                    {
                        Ok(completion) => completion,
                        Err(err) => {
                            tracing::warn!(
                                execution_id = %state.execution_id,
                                error = %err,
                                "provider call failed"
                            );
                            state.fail(FailureReason::ProviderError, err.to_string());
                            break;
                        }
                    };

                    if let Some(usage) = &completion.usage {
                        state.usage.fold(usage);
                    }
                    state.transcript.push(ModelMessage::Assistant {
                        content: completion.text.clone(),
                        tool_calls: completion.tool_calls.clone(),
                    });

                    state.cursor = if completion.tool_calls.is_empty() {
                        AgentCursor::Final {
                            content: completion.text.unwrap_or_default(),
                        }
                    } else {
                        AgentCursor::Tools {
                            calls: completion.tool_calls,
                            index: 0,
                            executed: None,
                        }
                    };
                }
                AgentCursor::Final { content } => {
                    let payload = json!({ "content": content });
                    match self
                        .decide(&state, GateKind::FinalResponse, &payload, &mut injected)
                        .await?
                    {
                        GateOutcome::Decided(ApprovalDecision::Modify(replacement)) => {
                            state.complete(stringify(&replacement));
                        }
                        GateOutcome::Decided(_) => state.complete(content),
                        GateOutcome::Suspend { request_id } => {
                            state.cursor = AgentCursor::Final { content };
                            state.pause(pending(GateKind::FinalResponse, request_id, payload));
                        }
                    }
                }
                AgentCursor::Tools {
                    calls,
                    index,
                    executed,
                } => {
                    let Some(call) = calls.get(index).cloned() else {
                        state.cursor = AgentCursor::Model;
                        continue;
                    };

                    match executed {
                        None => {
                            let payload = json!({
                                "tool_call_id": call.id,
                                "name": call.name,
                                "arguments": serde_json::from_str::<Value>(&call.raw_arguments)
                                    .unwrap_or_else(|_| Value::String(call.raw_arguments.clone())),
                            });
                            let execution = match self
                                .decide(&state, GateKind::ToolExecution, &payload, &mut injected)
                                .await?
                            {
                                GateOutcome::Decided(ApprovalDecision::Approve) => {
                                    self.invoker.invoke(&call).await
                                }
                                GateOutcome::Decided(ApprovalDecision::Modify(arguments)) => {
                                    self.invoker.invoke_with_arguments(&call, arguments).await
                                }
                                GateOutcome::Decided(ApprovalDecision::Reject) => {
                                    tracing::debug!(
                                        execution_id = %state.execution_id,
                                        tool = %call.name,
                                        "tool call rejected by approval gate"
                                    );
                                    ToolExecution::rejected(&call)
                                }
                                GateOutcome::Suspend { request_id } => {
                                    state.cursor = AgentCursor::Tools {
                                        calls,
                                        index,
                                        executed: None,
                                    };
                                    state.pause(pending(GateKind::ToolExecution, request_id, payload));
                                    continue;
                                }
                            };
                            tracing::debug!(
                                execution_id = %state.execution_id,
                                tool = %execution.name,
                                error = ?execution.error,
                                duration_seconds = execution.duration_seconds,
                                "tool call finished"
                            );
                            state.cursor = AgentCursor::Tools {
                                calls,
                                index,
                                executed: Some(execution),
                            };
                        }
                        Some(execution) => {
                            let payload = serde_json::to_value(&execution)
                                .map_err(|err| StoreError::Serialization(err.to_string()))?;
                            let execution = match self
                                .decide(&state, GateKind::ToolResult, &payload, &mut injected)
                                .await?
                            {
                                GateOutcome::Decided(ApprovalDecision::Modify(result)) => {
                                    execution.with_result(result)
                                }
                                GateOutcome::Decided(_) => execution,
                                GateOutcome::Suspend { request_id } => {
                                    state.cursor = AgentCursor::Tools {
                                        calls,
                                        index,
                                        executed: Some(execution),
                                    };
                                    state.pause(pending(GateKind::ToolResult, request_id, payload));
                                    continue;
                                }
                            };
                            state.transcript.push(execution.to_message());
                            state.tool_executions.push(execution);
                            state.cursor = AgentCursor::Tools {
                                calls,
                                index: index + 1,
                                executed: None,
                            };
                        }
                    }
                }
            }
        }

        tracing::info!(
            execution_id = %state.execution_id,
            status = %state.status,
            iterations = state.current_iteration,
            total_tokens = state.usage.total_tokens,
            "agent run stopped"
        );
        self.persist(&state).await?;
        Ok(state)
    }

    async fn decide(
        &self,
        state: &AgentExecutionState,
        kind: GateKind,
        payload: &Value,
        injected: &mut Option<ApprovalDecision>,
    ) -> Result<GateOutcome, AgentError> {
        if let Some(decision) = injected.take() {
            return Ok(GateOutcome::Decided(decision));
        }
        let request = GateRequest {
            execution_id: &state.execution_id,
            kind,
            payload,
            context: None,
        };
        Ok(self.gate.decide(request).await?)
    }

    async fn persist(&self, state: &AgentExecutionState) -> Result<(), AgentError> {
        if let Some(store) = &self.store {
            store
                .save(&state.execution_id, &ExecutionSnapshot::Agent(state.clone()))
                .await?;
        }
        Ok(())
    }

    fn require_store(&self) -> Result<&Arc<dyn ExecutionStateStore>, AgentError> {
        self.store.as_ref().ok_or_else(|| {
            AgentError::Config(
                "resuming by execution id requires an execution store (AgentBuilder::persist_to)"
                    .to_string(),
            )
        })
    }

    async fn load(&self, execution_id: &str) -> Result<AgentExecutionState, AgentError> {
        match self.require_store()?.load(execution_id).await? {
            Some(ExecutionSnapshot::Agent(state)) => Ok(state),
            Some(ExecutionSnapshot::Workflow(_)) => {
                Err(AgentError::WrongExecutionKind(execution_id.to_string()))
            }
            None => Err(StoreError::ExecutionNotFound(execution_id.to_string()).into()),
        }
    }
}

fn pending(kind: GateKind, request_id: String, data: Value) -> PendingApproval {
    PendingApproval {
        kind,
        request_id,
        step_name: None,
        data,
    }
}

fn paused_request(state: &AgentExecutionState) -> Result<String, AgentError> {
    match (&state.status, &state.pending_approval) {
        (ExecutionStatus::Paused, Some(pending)) => Ok(pending.request_id.clone()),
        _ => Err(AgentError::NotResumable {
            execution_id: state.execution_id.clone(),
            status: state.status,
        }),
    }
}

#[cfg(test)]
mod tests;
