//! Sequential prompt workflows.
//!
//! Each step renders its prompt template against the run's
//! [`ExecutionContext`], calls the model (plain or structured), and stores
//! its output in the context under the step's name so later templates can
//! reference it as `{{step_name}}` or `{{step_name.field}}`.

mod state;

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::approval::{ApprovalDecision, ApprovalGate, GateKind, GateOutcome, GateRequest};
use crate::cancel::CancellationHandle;
use crate::context::ExecutionContext;
use crate::error::{ProviderError, StoreError, WorkflowError};
use crate::interpolation::{Interpolator, stringify};
use crate::llm::{ChatModel, ModelMessage, ModelToolChoice, OutputSchema};
use crate::state::{ExecutionStatus, FailureReason, PendingApproval};
use crate::store::{ExecutionSnapshot, ExecutionStateStore};

pub use state::{StepResult, WorkflowCursor, WorkflowExecutionState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub name: String,
    pub prompt_template: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub output_schema: Option<OutputSchema>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl WorkflowStep {
    pub fn new(name: impl Into<String>, prompt_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt_template: prompt_template.into(),
            model: None,
            output_schema: None,
            system_prompt: None,
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn output_schema(mut self, schema: OutputSchema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Used by steps without their own model.
    pub default_model: Option<String>,
    pub system_prompt: Option<String>,
    /// Fail a step whose template references an unknown variable instead of
    /// substituting an empty string.
    pub strict_interpolation: bool,
}

pub struct WorkflowBuilder {
    model: Option<Arc<dyn ChatModel>>,
    steps: Vec<WorkflowStep>,
    config: WorkflowConfig,
    variables: ExecutionContext,
    gate: ApprovalGate,
    store: Option<Arc<dyn ExecutionStateStore>>,
    cancellation: CancellationHandle,
}

impl Default for WorkflowBuilder {
    fn default() -> Self {
        Self {
            model: None,
            steps: Vec::new(),
            config: WorkflowConfig::default(),
            variables: ExecutionContext::new(),
            gate: ApprovalGate::new(),
            store: None,
            cancellation: CancellationHandle::new(),
        }
    }
}

impl WorkflowBuilder {
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

    pub fn step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(mut self, steps: Vec<WorkflowStep>) -> Self {
        self.steps.extend(steps);
        self
    }

    pub fn config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    pub fn default_model(mut self, model: impl Into<String>) -> Self {
        self.config.default_model = Some(model.into());
        self
    }

    pub fn system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn strict_interpolation(mut self, strict: bool) -> Self {
        self.config.strict_interpolation = strict;
        self
    }

    /// Pre-seeds a context variable. Inputs passed to [`Workflow::run`] with
    /// the same name take precedence.
    pub fn variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.set(name, value);
        self
    }

    /// Decides whether a step runs. `Modify` supplies a replacement prompt;
    /// `Reject` skips the step.
    pub fn before_step<F>(mut self, callback: F) -> Self
    where
        F: Fn(&GateRequest<'_>) -> ApprovalDecision + Send + Sync + 'static,
    {
        self.gate = self.gate.on(GateKind::StepExecution, callback);
        self
    }

    /// Reviews a step's output. `Modify` replaces it; `Reject` keeps it.
    pub fn after_step<F>(mut self, callback: F) -> Self
    where
        F: Fn(&GateRequest<'_>) -> ApprovalDecision + Send + Sync + 'static,
    {
        self.gate = self.gate.on(GateKind::StepResult, callback);
        self
    }

    pub fn persist_to(mut self, store: Arc<dyn ExecutionStateStore>) -> Self {
        self.store = Some(store);
        self
    }

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

    pub fn build(self) -> Result<Workflow, WorkflowError> {
        let Some(model) = self.model else {
            return Err(WorkflowError::Config(
                "workflow model must be configured via WorkflowBuilder::model(...)".to_string(),
            ));
        };

        for (idx, step) in self.steps.iter().enumerate() {
            if step.name.is_empty() || step.name.contains('.') {
                return Err(WorkflowError::Config(format!(
                    "invalid step name {:?}: names must be non-empty and contain no '.'",
                    step.name
                )));
            }
            if self.steps[..idx].iter().any(|prior| prior.name == step.name) {
                return Err(WorkflowError::Config(format!(
                    "duplicate step registered: {}",
                    step.name
                )));
            }
        }

        for kind in [GateKind::ToolExecution, GateKind::ToolResult, GateKind::FinalResponse] {
            if self.gate.is_deferred(kind) {
                return Err(WorkflowError::Config(format!(
                    "gate {kind} does not apply to workflow runs"
                )));
            }
        }

        let deferred = self.gate.is_deferred(GateKind::StepExecution)
            || self.gate.is_deferred(GateKind::StepResult);
        let gate = match &self.store {
            Some(store) => self.gate.with_store(store.clone()),
            None if deferred => {
                return Err(WorkflowError::Config(
                    "deferred approval requires an execution store (WorkflowBuilder::persist_to)"
                        .to_string(),
                ));
            }
            None => self.gate,
        };

        Ok(Workflow {
            model,
            steps: self.steps,
            interpolator: Interpolator::strict(self.config.strict_interpolation),
            config: self.config,
            variables: self.variables,
            gate,
            store: self.store,
            cancellation: self.cancellation,
        })
    }
}

pub struct Workflow {
    model: Arc<dyn ChatModel>,
    steps: Vec<WorkflowStep>,
    interpolator: Interpolator,
    config: WorkflowConfig,
    variables: ExecutionContext,
    gate: ApprovalGate,
    store: Option<Arc<dyn ExecutionStateStore>>,
    cancellation: CancellationHandle,
}

impl Workflow {
    pub fn builder() -> WorkflowBuilder {
        WorkflowBuilder::default()
    }

    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Handle that stops every run of this workflow, current and future. Use
    /// [`Workflow::run_cancellable`] to cancel a single run.
    pub fn cancellation(&self) -> CancellationHandle {
        self.cancellation.clone()
    }

    /// Runs every step in order, seeding the context with the builder's
    /// variables followed by `input`.
    pub async fn run<I, K>(&self, input: I) -> Result<WorkflowExecutionState, WorkflowError>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.run_cancellable(input, CancellationHandle::new()).await
    }

    /// Like [`Workflow::run`], but `cancellation` stops this run only.
    pub async fn run_cancellable<I, K>(
        &self,
        input: I,
        cancellation: CancellationHandle,
    ) -> Result<WorkflowExecutionState, WorkflowError>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut context = self.variables.clone();
        context.extend(input);

        let state = WorkflowExecutionState::new(self.steps.len(), context);
        tracing::info!(
            execution_id = %state.execution_id,
            total_steps = state.total_steps,
            "workflow run started"
        );
        self.drive(state, None, &cancellation).await
    }

    pub async fn resume(
        &self,
        execution_id: &str,
        decision: ApprovalDecision,
    ) -> Result<WorkflowExecutionState, WorkflowError> {
        self.resume_cancellable(execution_id, decision, CancellationHandle::new())
            .await
    }

    /// Like [`Workflow::resume`], but `cancellation` stops this run only.
    pub async fn resume_cancellable(
        &self,
        execution_id: &str,
        decision: ApprovalDecision,
        cancellation: CancellationHandle,
    ) -> Result<WorkflowExecutionState, WorkflowError> {
        let state = self.load(execution_id).await?;
        self.settle_and_continue(state, decision, &cancellation)
            .await
    }

    /// Continues `state` with `decision` standing in for the gate that
    /// suspended it, recording the decision when a store is configured. An
    /// expired request turns the decision into a rejection.
    pub async fn resume_state(
        &self,
        state: WorkflowExecutionState,
        decision: ApprovalDecision,
    ) -> Result<WorkflowExecutionState, WorkflowError> {
        self.settle_and_continue(state, decision, &CancellationHandle::new())
            .await
    }

    /// Resumes with the decision recorded out of process. An expired,
    /// undecided request counts as a rejection.
    pub async fn resume_pending(
        &self,
        execution_id: &str,
    ) -> Result<WorkflowExecutionState, WorkflowError> {
        let state = self.load(execution_id).await?;
        let request_id = self.paused_request(&state)?;
        let store = self.require_store()?;
        let request = store
            .approval_request(&request_id)
            .await?
            .ok_or_else(|| StoreError::ApprovalNotFound(request_id.clone()))?;

        let Some(decision) = request.effective_decision(chrono::Utc::now()) else {
            return Err(WorkflowError::ApprovalPending { request_id });
        };
        if request.decision.is_none() {
            tracing::info!(%execution_id, %request_id, "approval request expired; treating as rejected");
            store.record_approval_decision(&request_id, &decision).await?;
        }
        self.continue_paused(state, decision, &CancellationHandle::new())
            .await
    }

    /// Marks a persisted run cancelled. Terminal runs are returned unchanged.
    pub async fn cancel(&self, execution_id: &str) -> Result<WorkflowExecutionState, WorkflowError> {
        let mut state = self.load(execution_id).await?;
        if !state.is_terminal() {
            state.cancel();
            tracing::info!(%execution_id, "workflow run cancelled");
            self.persist(&state).await?;
        }
        Ok(state)
    }

    async fn settle_and_continue(
        &self,
        state: WorkflowExecutionState,
        decision: ApprovalDecision,
        cancellation: &CancellationHandle,
    ) -> Result<WorkflowExecutionState, WorkflowError> {
        let request_id = self.paused_request(&state)?;
        let decision = match &self.store {
            Some(store) => store.settle_approval(&request_id, decision).await?,
            None => decision,
        };
        self.continue_paused(state, decision, cancellation).await
    }

    async fn continue_paused(
        &self,
        mut state: WorkflowExecutionState,
        decision: ApprovalDecision,
        cancellation: &CancellationHandle,
    ) -> Result<WorkflowExecutionState, WorkflowError> {
        tracing::info!(execution_id = %state.execution_id, ?decision, "workflow run resumed");
        state.resume();
        self.drive(state, Some(decision), cancellation).await
    }

    async fn drive(
        &self,
        mut state: WorkflowExecutionState,
        mut injected: Option<ApprovalDecision>,
        cancellation: &CancellationHandle,
    ) -> Result<WorkflowExecutionState, WorkflowError> {
        while state.status == ExecutionStatus::Running {
            if cancellation.is_cancelled() || self.cancellation.is_cancelled() {
                tracing::info!(execution_id = %state.execution_id, "workflow run cancelled");
                state.cancel();
                break;
            }

            let Some(step) = self.steps.get(state.cursor.step_index) else {
                state.complete();
                break;
            };
            state.current_step = Some(step.name.clone());

            match state.cursor.produced.take() {
                None => {
                    let prompt = match self.interpolator.render(&step.prompt_template, &state.context) {
                        Ok(rendered) => rendered.text,
                        Err(err) => {
                            tracing::warn!(
                                execution_id = %state.execution_id,
                                step = %step.name,
                                error = %err,
                                "step prompt did not render"
                            );
                            state.fail(&step.name, FailureReason::InterpolationError, err.to_string());
                            break;
                        }
                    };

                    let payload = json!({
                        "step": step.name,
                        "prompt": prompt,
                        "context": state.context.to_value(),
                    });
                    let prompt = match self
                        .decide(&state, GateKind::StepExecution, &payload, &mut injected)
                        .await?
                    {
                        GateOutcome::Decided(ApprovalDecision::Approve) => prompt,
                        GateOutcome::Decided(ApprovalDecision::Modify(replacement)) => {
                            stringify(&replacement)
                        }
                        GateOutcome::Decided(ApprovalDecision::Reject) => {
                            tracing::debug!(
                                execution_id = %state.execution_id,
                                step = %step.name,
                                "step skipped by approval gate"
                            );
                            state.skip(step.name.clone());
                            continue;
                        }
                        GateOutcome::Suspend { request_id } => {
                            state.pause(pending(GateKind::StepExecution, request_id, step, payload));
                            continue;
                        }
                    };

                    match self.execute_step(step, prompt).await {
                        Ok(result) => {
                            state.usage.fold(&result.usage);
                            state.cursor.produced = Some(result);
                        }
                        Err(err) => {
                            tracing::warn!(
                                execution_id = %state.execution_id,
                                step = %step.name,
                                error = %err,
                                "provider call failed"
                            );
                            state.fail(&step.name, FailureReason::ProviderError, err.to_string());
                            break;
                        }
                    }
                }
                Some(result) => {
                    let payload = serde_json::to_value(&result)
                        .map_err(|err| StoreError::Serialization(err.to_string()))?;
                    let result = match self
                        .decide(&state, GateKind::StepResult, &payload, &mut injected)
                        .await?
                    {
                        GateOutcome::Decided(ApprovalDecision::Modify(output)) => {
                            result.with_output(output)
                        }
                        GateOutcome::Decided(_) => result,
                        GateOutcome::Suspend { request_id } => {
                            state.cursor.produced = Some(result);
                            state.pause(pending(GateKind::StepResult, request_id, step, payload));
                            continue;
                        }
                    };
                    tracing::debug!(
                        execution_id = %state.execution_id,
                        step = %result.step_name,
                        duration_seconds = result.duration_seconds,
                        "step completed"
                    );
                    state.record(result);
                }
            }
        }

        tracing::info!(
            execution_id = %state.execution_id,
            status = %state.status,
            completed_steps = state.completed_steps,
            total_tokens = state.usage.total_tokens,
            "workflow run stopped"
        );
        self.persist(&state).await?;
        Ok(state)
    }

    async fn execute_step(
        &self,
        step: &WorkflowStep,
        prompt: String,
    ) -> Result<StepResult, ProviderError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system_prompt) = step.system_prompt.as_ref().or(self.config.system_prompt.as_ref()) {
            messages.push(ModelMessage::system(system_prompt.clone()));
        }
        messages.push(ModelMessage::user(prompt));

        let model = step.model.as_deref().or(self.config.default_model.as_deref());
        let started = Instant::now();
        let (output, usage) = match &step.output_schema {
            Some(schema) => {
                let completion = self.model.invoke_structured(&messages, schema, model).await?;
                (completion.value, completion.usage)
            }
            None => {
                let completion = self
                    .model
                    .invoke(&messages, &[], ModelToolChoice::None, model)
                    .await?;
                (Value::String(completion.text.unwrap_or_default()), completion.usage)
            }
        };

        Ok(StepResult {
            step_name: step.name.clone(),
            output,
            usage: usage.unwrap_or_default(),
            duration_seconds: started.elapsed().as_secs_f64(),
        })
    }

    async fn decide(
        &self,
        state: &WorkflowExecutionState,
        kind: GateKind,
        payload: &Value,
        injected: &mut Option<ApprovalDecision>,
    ) -> Result<GateOutcome, WorkflowError> {
        if let Some(decision) = injected.take() {
            return Ok(GateOutcome::Decided(decision));
        }
        let request = GateRequest {
            execution_id: &state.execution_id,
            kind,
            payload,
            context: Some(&state.context),
        };
        Ok(self.gate.decide(request).await?)
    }

    async fn persist(&self, state: &WorkflowExecutionState) -> Result<(), WorkflowError> {
        if let Some(store) = &self.store {
            store
                .save(&state.execution_id, &ExecutionSnapshot::Workflow(state.clone()))
                .await?;
        }
        Ok(())
    }

    fn require_store(&self) -> Result<&Arc<dyn ExecutionStateStore>, WorkflowError> {
        self.store.as_ref().ok_or_else(|| {
            WorkflowError::Config(
                "resuming by execution id requires an execution store (WorkflowBuilder::persist_to)"
                    .to_string(),
            )
        })
    }

    async fn load(&self, execution_id: &str) -> Result<WorkflowExecutionState, WorkflowError> {
        match self.require_store()?.load(execution_id).await? {
            Some(ExecutionSnapshot::Workflow(state)) => Ok(state),
            Some(ExecutionSnapshot::Agent(_)) => {
                Err(WorkflowError::WrongExecutionKind(execution_id.to_string()))
            }
            None => Err(StoreError::ExecutionNotFound(execution_id.to_string()).into()),
        }
    }

    fn paused_request(&self, state: &WorkflowExecutionState) -> Result<String, WorkflowError> {
        if state.total_steps != self.steps.len() {
            return Err(WorkflowError::Config(format!(
                "run {} was started with {} steps but this workflow declares {}",
                state.execution_id,
                state.total_steps,
                self.steps.len()
            )));
        }
        match (&state.status, &state.pending_approval) {
            (ExecutionStatus::Paused, Some(pending)) => Ok(pending.request_id.clone()),
            _ => Err(WorkflowError::NotResumable {
                execution_id: state.execution_id.clone(),
                status: state.status,
            }),
        }
    }
}

fn pending(kind: GateKind, request_id: String, step: &WorkflowStep, data: Value) -> PendingApproval {
    PendingApproval {
        kind,
        request_id,
        step_name: Some(step.name.clone()),
        data,
    }
}
