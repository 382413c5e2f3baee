use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::json;

use super::*;
use crate::error::{ProviderError, ToolError};
use crate::llm::{ModelCompletion, ModelToolCall, Usage};
use crate::store::MemoryExecutionStore;

#[derive(Default)]
struct MockModel {
    responses: Mutex<VecDeque<Result<ModelCompletion, ProviderError>>>,
    transcripts: Mutex<Vec<Vec<ModelMessage>>>,
}

impl MockModel {
    fn with_responses(responses: Vec<Result<ModelCompletion, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from(responses)),
            transcripts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ChatModel for MockModel {
    async fn invoke(
        &self,
        messages: &[ModelMessage],
        _tools: &[ModelToolDefinition],
        _tool_choice: ModelToolChoice,
        _model: Option<&str>,
    ) -> Result<ModelCompletion, ProviderError> {
        self.transcripts
            .lock()
            .expect("lock poisoned")
            .push(messages.to_vec());
        let mut guard = self.responses.lock().expect("lock poisoned");
        guard.pop_front().unwrap_or_else(|| {
            Err(ProviderError::Response(
                "no more mock model responses".to_string(),
            ))
        })
    }
}

fn text(content: &str) -> Result<ModelCompletion, ProviderError> {
    Ok(ModelCompletion {
        text: Some(content.to_string()),
        tool_calls: vec![],
        usage: Some(Usage::new(10, 5)),
    })
}

fn calls(tool_calls: Vec<ModelToolCall>) -> Result<ModelCompletion, ProviderError> {
    Ok(ModelCompletion {
        text: None,
        tool_calls,
        usage: Some(Usage::new(20, 3)),
    })
}

fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> ModelToolCall {
    ModelToolCall::new(id, name, &arguments)
}

fn echo_tool(counter: Arc<AtomicUsize>) -> ToolSpec {
    ToolSpec::new("echo", "echo the text back")
        .with_schema(json!({
            "type": "object",
            "properties": {
                "text": {"type": "string"}
            },
            "required": ["text"],
            "additionalProperties": false
        }))
        .expect("valid schema")
        .with_handler(move |args| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(args["text"].clone())
            }
        })
}

fn fail_tool() -> ToolSpec {
    ToolSpec::new("fail", "always fail")
        .with_schema(json!({
            "type": "object",
            "properties": {},
            "required": [],
            "additionalProperties": false
        }))
        .expect("valid schema")
        .with_handler(|_args| async move { Err(ToolError::Execution("boom".to_string())) })
}

/// Comparable view of tool history without timings.
fn outcomes(state: &AgentExecutionState) -> Vec<(String, Option<serde_json::Value>, Option<String>)> {
    state
        .tool_executions
        .iter()
        .map(|exec| (exec.name.clone(), exec.result.clone(), exec.error.clone()))
        .collect()
}

#[tokio::test]
async fn query_returns_no_tool_response() {
    let model = MockModel::with_responses(vec![text("hello")]);

    let agent = Agent::builder().model(model).build().expect("agent builds");
    let response = agent.query("hi").await.expect("query succeeds");

    assert_eq!(response, "hello");
}

#[tokio::test]
async fn echo_tool_once_then_answer() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let model = MockModel::with_responses(vec![
        calls(vec![tool_call("call_1", "echo", json!({"text": "ping"}))]),
        text("the tool said ping"),
    ]);

    let agent = Agent::builder()
        .model(model)
        .tool(echo_tool(invocations.clone()))
        .system_prompt("use the tool once then answer")
        .max_iterations(3)
        .build()
        .expect("agent builds");

    let state = agent.run("go").await.expect("run returns");

    assert_eq!(state.status, ExecutionStatus::Completed);
    assert_eq!(state.tool_executions.len(), 1);
    assert_eq!(state.tool_executions[0].result, Some(json!("ping")));
    assert_eq!(state.current_iteration, 2);
    assert_eq!(state.final_response.as_deref(), Some("the tool said ping"));
    assert!(state.pending_approval.is_none());
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    assert_eq!(state.transcript.len(), 5);
    assert_eq!(state.transcript[0], ModelMessage::system("use the tool once then answer"));
    assert_eq!(
        state.transcript[3],
        ModelMessage::ToolResult {
            tool_call_id: "call_1".to_string(),
            tool_name: "echo".to_string(),
            content: "ping".to_string(),
            is_error: false,
        }
    );
}

#[tokio::test]
async fn iteration_budget_exhaustion_fails_the_run() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let model = MockModel::with_responses(
        (0..5)
            .map(|i| calls(vec![tool_call(&format!("call_{i}"), "echo", json!({"text": "again"}))]))
            .collect(),
    );

    let agent = Agent::builder()
        .model(model)
        .tool(echo_tool(invocations.clone()))
        .max_iterations(3)
        .build()
        .expect("agent builds");

    let state = agent.run("loop").await.expect("run returns");

    assert_eq!(state.status, ExecutionStatus::Failed);
    assert_eq!(state.current_iteration, 3);
    let failure = state.failure.as_ref().expect("failure recorded");
    assert_eq!(failure.reason, FailureReason::MaxIterationsExceeded);
    assert_eq!(failure.reason.as_str(), "max_iterations_exceeded");
    assert_eq!(state.tool_executions.len(), 3);
    assert_eq!(invocations.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn query_maps_exhaustion_to_error() {
    let model = MockModel::with_responses(vec![calls(vec![tool_call(
        "call_3",
        "echo",
        json!({"text": "x"}),
    )])]);

    let agent = Agent::builder()
        .model(model)
        .tool(echo_tool(Arc::default()))
        .max_iterations(1)
        .build()
        .expect("agent builds");

    let err = agent.query("loop").await.expect_err("must fail");
    assert!(matches!(err, AgentError::MaxIterationsReached { max_iterations: 1 }));
}

#[tokio::test]
async fn usage_is_summed_and_consistent() {
    let model = MockModel::with_responses(vec![
        calls(vec![tool_call("call_1", "echo", json!({"text": "a"}))]),
        calls(vec![tool_call("call_2", "echo", json!({"text": "b"}))]),
        text("done"),
    ]);

    let agent = Agent::builder()
        .model(model)
        .tool(echo_tool(Arc::default()))
        .build()
        .expect("agent builds");

    let state = agent.run("sum").await.expect("run returns");
    assert_eq!(state.usage.prompt_tokens, 50);
    assert_eq!(state.usage.completion_tokens, 11);
    assert_eq!(
        state.usage.total_tokens,
        state.usage.prompt_tokens + state.usage.completion_tokens
    );
}

#[tokio::test]
async fn rejecting_gate_never_invokes_tools() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let model = MockModel::with_responses(vec![
        calls(vec![
            tool_call("call_1", "echo", json!({"text": "a"})),
            tool_call("call_2", "echo", json!({"text": "b"})),
        ]),
        calls(vec![tool_call("call_3", "echo", json!({"text": "c"}))]),
        text("gave up"),
    ]);

    let agent = Agent::builder()
        .model(model)
        .tool(echo_tool(invocations.clone()))
        .before_tool_execution(|_| ApprovalDecision::Reject)
        .build()
        .expect("agent builds");

    let state = agent.run("try").await.expect("run returns");

    assert_eq!(state.status, ExecutionStatus::Completed);
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
    assert_eq!(state.tool_executions.len(), 3);
    assert!(state.tool_executions.iter().all(|exec| {
        exec.error.as_deref() == Some(ToolExecution::REJECTED_BY_APPROVAL) && exec.result.is_none()
    }));
    assert!(state.transcript.iter().any(|message| matches!(
        message,
        ModelMessage::ToolResult { content, is_error: true, .. } if content == "rejected_by_approval"
    )));
}

#[tokio::test]
async fn unknown_tool_is_reported_and_run_continues() {
    let model = MockModel::with_responses(vec![
        calls(vec![tool_call("call_1", "ghost", json!({}))]),
        text("sorry, no ghost tool"),
    ]);

    let agent = Agent::builder()
        .model(model)
        .tool(echo_tool(Arc::default()))
        .build()
        .expect("agent builds");

    let state = agent.run("boo").await.expect("run returns");

    assert_eq!(state.status, ExecutionStatus::Completed);
    assert_eq!(state.current_iteration, 2);
    assert_eq!(state.tool_executions[0].name, "ghost");
    assert_eq!(
        state.tool_executions[0].error.as_deref(),
        Some(ToolExecution::UNKNOWN_TOOL)
    );
}

#[tokio::test]
async fn tool_error_is_fed_back_and_run_still_finishes() {
    let model = Arc::new(MockModel::with_responses(vec![
        calls(vec![tool_call("call_4", "fail", json!({}))]),
        text("fallback"),
    ]));

    let agent = Agent::builder()
        .shared_model(model.clone())
        .tool(fail_tool())
        .build()
        .expect("agent builds");

    let response = agent.query("try").await.expect("query succeeds");
    assert_eq!(response, "fallback");

    let transcripts = model.transcripts.lock().expect("lock poisoned");
    let second_call = &transcripts[1];
    assert!(matches!(
        second_call.last(),
        Some(ModelMessage::ToolResult { is_error: true, content, .. })
            if content == "tool execution failed: boom"
    ));
}

#[tokio::test]
async fn gates_can_modify_arguments_results_and_final_answer() {
    let model = MockModel::with_responses(vec![
        calls(vec![tool_call("call_1", "echo", json!({"text": "secret"}))]),
        text("draft answer"),
    ]);

    let agent = Agent::builder()
        .model(model)
        .tool(echo_tool(Arc::default()))
        .before_tool_execution(|req| {
            assert_eq!(req.payload["arguments"]["text"], "secret");
            ApprovalDecision::Modify(json!({"text": "redacted"}))
        })
        .after_tool_execution(|req| {
            let result = req.payload["result"].as_str().unwrap_or_default();
            ApprovalDecision::Modify(json!(format!("[{result}]")))
        })
        .before_final_response(|_| ApprovalDecision::Modify(json!("reviewed answer")))
        .build()
        .expect("agent builds");

    let state = agent.run("go").await.expect("run returns");

    assert_eq!(state.tool_executions[0].result, Some(json!("[redacted]")));
    assert_eq!(state.tool_executions[0].arguments, json!({"text": "redacted"}));
    assert!(state.transcript.iter().any(|message| matches!(
        message,
        ModelMessage::ToolResult { content, .. } if content == "[redacted]"
    )));
    assert_eq!(state.final_response.as_deref(), Some("reviewed answer"));
}

#[tokio::test]
async fn rejecting_review_gates_keeps_original_values() {
    let model = MockModel::with_responses(vec![
        calls(vec![tool_call("call_1", "echo", json!({"text": "kept"}))]),
        text("original answer"),
    ]);

    let agent = Agent::builder()
        .model(model)
        .tool(echo_tool(Arc::default()))
        .after_tool_execution(|_| ApprovalDecision::Reject)
        .before_final_response(|_| ApprovalDecision::Reject)
        .build()
        .expect("agent builds");

    let state = agent.run("go").await.expect("run returns");
    assert_eq!(state.tool_executions[0].result, Some(json!("kept")));
    assert_eq!(state.final_response.as_deref(), Some("original answer"));
    assert_eq!(state.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn provider_failure_fails_run_and_keeps_transcript() {
    let model = MockModel::with_responses(vec![
        calls(vec![tool_call("call_1", "echo", json!({"text": "a"}))]),
        Err(ProviderError::Request("connection reset".to_string())),
    ]);

    let agent = Agent::builder()
        .model(model)
        .tool(echo_tool(Arc::default()))
        .build()
        .expect("agent builds");

    let state = agent.run("go").await.expect("run returns");

    assert_eq!(state.status, ExecutionStatus::Failed);
    let failure = state.failure.as_ref().expect("failure recorded");
    assert_eq!(failure.reason, FailureReason::ProviderError);
    assert!(failure.message.contains("connection reset"));
    assert_eq!(state.tool_executions.len(), 1);
    assert_eq!(state.transcript.len(), 3);
}

#[tokio::test]
async fn suspended_tool_gate_resumes_to_same_history_as_inline_approval() {
    let script = || {
        vec![
            calls(vec![tool_call("call_1", "echo", json!({"text": "ping"}))]),
            text("finished"),
        ]
    };

    let inline = Agent::builder()
        .model(MockModel::with_responses(script()))
        .tool(echo_tool(Arc::default()))
        .before_tool_execution(|_| ApprovalDecision::Approve)
        .build()
        .expect("agent builds")
        .run("go")
        .await
        .expect("run returns");

    let store = Arc::new(MemoryExecutionStore::new());
    let deferred = Agent::builder()
        .model(MockModel::with_responses(script()))
        .tool(echo_tool(Arc::default()))
        .persist_to(store.clone())
        .defer_approval([GateKind::ToolExecution], None)
        .build()
        .expect("agent builds");

    let paused = deferred.run("go").await.expect("run returns");
    assert_eq!(paused.status, ExecutionStatus::Paused);
    let pending = paused.pending_approval.clone().expect("pending approval");
    assert_eq!(pending.kind, GateKind::ToolExecution);
    assert_eq!(pending.data["name"], "echo");
    assert!(paused.tool_executions.is_empty());

    let persisted = store
        .load(&paused.execution_id)
        .await
        .expect("loads")
        .expect("snapshot saved on pause");
    assert_eq!(persisted.status(), ExecutionStatus::Paused);

    let resumed = deferred
        .resume(&paused.execution_id, ApprovalDecision::Approve)
        .await
        .expect("resume returns");

    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert_eq!(resumed.transcript, inline.transcript);
    assert_eq!(outcomes(&resumed), outcomes(&inline));
    assert_eq!(resumed.final_response, inline.final_response);

    let request = store
        .approval_request(&pending.request_id)
        .await
        .expect("reads")
        .expect("exists");
    assert_eq!(request.decision, Some(ApprovalDecision::Approve));
}

#[tokio::test]
async fn resume_works_from_persisted_state_alone() {
    let store = Arc::new(MemoryExecutionStore::new());
    let first_process = Agent::builder()
        .model(MockModel::with_responses(vec![calls(vec![tool_call(
            "call_1",
            "echo",
            json!({"text": "hi"}),
        )])]))
        .tool(echo_tool(Arc::default()))
        .persist_to(store.clone())
        .defer_approval([GateKind::ToolExecution], None)
        .build()
        .expect("agent builds");
    let paused = first_process.run("go").await.expect("run returns");
    drop(first_process);

    let second_process = Agent::builder()
        .model(MockModel::with_responses(vec![text("done")]))
        .tool(echo_tool(Arc::default()))
        .persist_to(store.clone())
        .defer_approval([GateKind::ToolExecution], None)
        .build()
        .expect("agent builds");
    let resumed = second_process
        .resume(&paused.execution_id, ApprovalDecision::Approve)
        .await
        .expect("resume returns");

    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert_eq!(resumed.tool_executions[0].result, Some(json!("hi")));
    assert_eq!(resumed.final_response.as_deref(), Some("done"));
}

#[tokio::test]
async fn resume_continues_mid_batch() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let store = Arc::new(MemoryExecutionStore::new());
    let agent = Agent::builder()
        .model(MockModel::with_responses(vec![
            calls(vec![
                tool_call("call_1", "echo", json!({"text": "first"})),
                tool_call("call_2", "echo", json!({"text": "second"})),
            ]),
            text("done"),
        ]))
        .tool(echo_tool(invocations.clone()))
        .persist_to(store.clone())
        .defer_approval([GateKind::ToolExecution], None)
        .build()
        .expect("agent builds");

    let paused = agent.run("go").await.expect("run returns");
    assert_eq!(paused.status, ExecutionStatus::Paused);

    let paused = agent
        .resume(&paused.execution_id, ApprovalDecision::Approve)
        .await
        .expect("resume returns");
    assert_eq!(paused.status, ExecutionStatus::Paused);
    assert_eq!(paused.tool_executions.len(), 1);
    assert_eq!(
        paused.pending_approval.as_ref().map(|p| p.data["tool_call_id"].clone()),
        Some(json!("call_2"))
    );
    assert_eq!(paused.current_iteration, 1);

    let done = agent
        .resume(&paused.execution_id, ApprovalDecision::Reject)
        .await
        .expect("resume returns");
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(
        outcomes(&done),
        vec![
            ("echo".to_string(), Some(json!("first")), None),
            (
                "echo".to_string(),
                None,
                Some(ToolExecution::REJECTED_BY_APPROVAL.to_string())
            ),
        ]
    );
}

#[tokio::test]
async fn deferred_final_response_can_be_modified_on_resume() {
    let store = Arc::new(MemoryExecutionStore::new());
    let agent = Agent::builder()
        .model(MockModel::with_responses(vec![text("rough answer")]))
        .persist_to(store.clone())
        .defer_approval([GateKind::FinalResponse], Some(60))
        .build()
        .expect("agent builds");

    let paused = agent.run("go").await.expect("run returns");
    let pending = paused.pending_approval.clone().expect("pending");
    assert_eq!(pending.kind, GateKind::FinalResponse);
    assert_eq!(pending.data, json!({"content": "rough answer"}));
    assert!(paused.final_response.is_none());

    let done = agent
        .resume_state(paused, ApprovalDecision::Modify(json!("polished answer")))
        .await
        .expect("resume returns");
    assert_eq!(done.final_response.as_deref(), Some("polished answer"));
    assert_eq!(done.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn resume_pending_uses_recorded_or_expired_decision() {
    let store = Arc::new(MemoryExecutionStore::new());
    let build = |timeout| {
        Agent::builder()
            .model(MockModel::with_responses(vec![
                calls(vec![tool_call("call_1", "echo", json!({"text": "x"}))]),
                text("done"),
            ]))
            .tool(echo_tool(Arc::default()))
            .persist_to(store.clone())
            .defer_approval([GateKind::ToolExecution], timeout)
            .build()
            .expect("agent builds")
    };

    let waiting = build(None);
    let paused = waiting.run("go").await.expect("run returns");
    let err = waiting
        .resume_pending(&paused.execution_id)
        .await
        .expect_err("still undecided");
    assert!(matches!(err, AgentError::ApprovalPending { .. }));

    let request_id = paused.pending_approval.as_ref().expect("pending").request_id.clone();
    store
        .record_approval_decision(&request_id, &ApprovalDecision::Approve)
        .await
        .expect("external decision");
    let approved = waiting
        .resume_pending(&paused.execution_id)
        .await
        .expect("resume returns");
    assert_eq!(approved.tool_executions[0].result, Some(json!("x")));

    let expiring = build(Some(0));
    let paused = expiring.run("go").await.expect("run returns");
    let rejected = expiring
        .resume_pending(&paused.execution_id)
        .await
        .expect("expired request resumes");
    assert_eq!(
        rejected.tool_executions[0].error.as_deref(),
        Some(ToolExecution::REJECTED_BY_APPROVAL)
    );
    assert_eq!(rejected.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn completed_run_is_not_resumable() {
    let agent = Agent::builder()
        .model(MockModel::with_responses(vec![text("hi")]))
        .build()
        .expect("agent builds");
    let state = agent.run("go").await.expect("run returns");

    let err = agent
        .resume_state(state, ApprovalDecision::Approve)
        .await
        .expect_err("not paused");
    assert!(matches!(
        err,
        AgentError::NotResumable {
            status: ExecutionStatus::Completed,
            ..
        }
    ));
}

#[tokio::test]
async fn engine_wide_cancellation_stops_every_run() {
    let model = Arc::new(MockModel::with_responses(vec![text("never")]));
    let agent = Agent::builder()
        .shared_model(model.clone())
        .build()
        .expect("agent builds");

    agent.cancellation().cancel();
    let state = agent.run("go").await.expect("run returns");

    assert_eq!(state.status, ExecutionStatus::Cancelled);
    assert_eq!(state.current_iteration, 0);
    assert!(model.transcripts.lock().expect("lock poisoned").is_empty());
    assert!(matches!(
        agent.query("again").await,
        Err(AgentError::Cancelled { .. })
    ));
}

#[tokio::test]
async fn cancelling_one_run_leaves_other_runs_alone() {
    let handle = CancellationHandle::new();
    let stopper = handle.clone();
    let stop_tool = ToolSpec::new("stop", "cancel the current run").with_handler(move |_args| {
        let stopper = stopper.clone();
        async move {
            stopper.cancel();
            Ok(json!("stopping"))
        }
    });
    let agent = Agent::builder()
        .model(MockModel::with_responses(vec![
            calls(vec![tool_call("call_1", "stop", json!({}))]),
            text("second run answer"),
        ]))
        .tool(stop_tool)
        .build()
        .expect("agent builds");

    let cancelled = agent
        .run_cancellable("go", handle)
        .await
        .expect("run returns");
    assert_eq!(cancelled.status, ExecutionStatus::Cancelled);
    assert_eq!(cancelled.current_iteration, 1);
    assert_eq!(cancelled.tool_executions.len(), 1);

    let answer = agent.query("again").await.expect("independent run completes");
    assert_eq!(answer, "second run answer");
}

#[tokio::test]
async fn explicit_resume_after_expiry_is_rejected() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let store = Arc::new(MemoryExecutionStore::new());
    let agent = Agent::builder()
        .model(MockModel::with_responses(vec![
            calls(vec![tool_call("call_1", "echo", json!({"text": "x"}))]),
            text("done"),
        ]))
        .tool(echo_tool(invocations.clone()))
        .persist_to(store.clone())
        .defer_approval([GateKind::ToolExecution], Some(0))
        .build()
        .expect("agent builds");

    let paused = agent.run("go").await.expect("run returns");
    let request_id = paused.pending_approval.as_ref().expect("pending").request_id.clone();

    let resumed = agent
        .resume(&paused.execution_id, ApprovalDecision::Approve)
        .await
        .expect("resume returns");

    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
    assert_eq!(
        resumed.tool_executions[0].error.as_deref(),
        Some(ToolExecution::REJECTED_BY_APPROVAL)
    );
    let request = store
        .approval_request(&request_id)
        .await
        .expect("reads")
        .expect("exists");
    assert_eq!(request.decision, Some(ApprovalDecision::Reject));
}

#[tokio::test]
async fn paused_run_can_be_cancelled_through_the_store() {
    let store = Arc::new(MemoryExecutionStore::new());
    let agent = Agent::builder()
        .model(MockModel::with_responses(vec![text("answer")]))
        .persist_to(store.clone())
        .defer_approval([GateKind::FinalResponse], None)
        .build()
        .expect("agent builds");

    let paused = agent.run("go").await.expect("run returns");
    let cancelled = agent.cancel(&paused.execution_id).await.expect("cancels");
    assert_eq!(cancelled.status, ExecutionStatus::Cancelled);
    assert!(cancelled.pending_approval.is_none());

    let err = agent
        .resume(&paused.execution_id, ApprovalDecision::Approve)
        .await
        .expect_err("cancelled runs stay cancelled");
    assert!(matches!(err, AgentError::NotResumable { .. }));
}

#[test]
fn builder_rejects_invalid_configuration() {
    assert!(matches!(
        Agent::builder().build(),
        Err(AgentError::Config(message)) if message.contains("model")
    ));

    let duplicate = Agent::builder()
        .model(MockModel::default())
        .tool(echo_tool(Arc::default()))
        .tool(echo_tool(Arc::default()))
        .build();
    assert!(matches!(
        duplicate,
        Err(AgentError::Config(message)) if message.contains("duplicate tool registered: echo")
    ));

    let no_store = Agent::builder()
        .model(MockModel::default())
        .defer_approval([GateKind::ToolExecution], None)
        .build();
    assert!(matches!(no_store, Err(AgentError::Config(_))));

    let wrong_gate = Agent::builder()
        .model(MockModel::default())
        .persist_to(Arc::new(MemoryExecutionStore::new()))
        .defer_approval([GateKind::StepResult], None)
        .build();
    assert!(matches!(wrong_gate, Err(AgentError::Config(_))));
}

#[test]
fn config_deserializes_with_defaults() {
    let config: AgentConfig =
        serde_json::from_value(json!({"system_prompt": "be brief"})).expect("deserializes");
    assert_eq!(config.max_iterations, 24);
    assert_eq!(config.system_prompt.as_deref(), Some("be brief"));
    assert!(config.model.is_none());
}
