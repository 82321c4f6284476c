use super::*;
use crate::agent::progress::{ChannelSink, ProgressStage};
use crate::llm::{MockLlmClient, MockStep};
use crate::tools::{Tool, ToolGroup, ToolRegistry};
use async_trait::async_trait;
use sceneflow_models::InMemorySessionStore;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Tool returning a fixed payload and counting invocations.
struct StaticTool {
    name: &'static str,
    group: ToolGroup,
    payload: String,
    calls: Arc<AtomicUsize>,
}

impl StaticTool {
    fn new(name: &'static str, group: ToolGroup, payload: impl Into<String>) -> Self {
        Self {
            name,
            group,
            payload: payload.into(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl Tool for StaticTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "static test tool"
    }

    fn group(&self) -> ToolGroup {
        self.group
    }

    async fn invoke(&self, _args: serde_json::Value) -> crate::error::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.payload.clone())
    }
}

/// Tool that always fails with a fixed message.
struct FailingTool {
    name: &'static str,
    group: ToolGroup,
    message: &'static str,
    calls: Arc<AtomicUsize>,
}

impl FailingTool {
    fn new(name: &'static str, group: ToolGroup, message: &'static str) -> Self {
        Self {
            name,
            group,
            message,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "failing test tool"
    }

    fn group(&self) -> ToolGroup {
        self.group
    }

    async fn invoke(&self, _args: serde_json::Value) -> crate::error::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(crate::error::AiError::Tool(self.message.to_string()))
    }
}

fn plan_tool() -> StaticTool {
    StaticTool::new(
        "create_session",
        ToolGroup::Content,
        json!({"success": true, "session_id": "sess-1", "title": "Test production"}).to_string(),
    )
}

fn executor_with(
    llm: MockLlmClient,
    registry: ToolRegistry,
    store: Arc<InMemorySessionStore>,
) -> PipelineExecutor {
    PipelineExecutor::new(Arc::new(llm), Arc::new(registry), store)
}

#[tokio::test]
async fn test_completes_when_model_returns_text() {
    let llm = MockLlmClient::from_steps("mock", vec![MockStep::text("All scenes rendered.")]);
    let executor = executor_with(llm, ToolRegistry::new(), Arc::new(InMemorySessionStore::new()));

    let result = executor
        .run(PipelineConfig::new("make a video"))
        .await
        .expect("run should succeed");

    assert!(result.success);
    assert_eq!(result.answer.as_deref(), Some("All scenes rendered."));
    assert_eq!(result.state.status, PipelineStatus::Completed);
    assert_eq!(result.report.total_attempted, 0);
}

#[tokio::test]
async fn test_executes_tool_and_creates_session() {
    let llm = MockLlmClient::from_steps(
        "mock",
        vec![
            MockStep::tool_call("call-1", "create_session", json!({"brief": "a short film"})),
            MockStep::text("Planned."),
        ],
    );
    let mut registry = ToolRegistry::new();
    let tool = plan_tool();
    let calls = tool.call_counter();
    registry.register(tool).unwrap();

    let store = Arc::new(InMemorySessionStore::new());
    let executor = executor_with(llm, registry, store.clone());

    let (tx, mut rx) = mpsc::channel(32);
    let result = executor
        .run_with_progress(
            PipelineConfig::new("make a video"),
            Arc::new(ChannelSink::new(tx)),
        )
        .await
        .expect("run should succeed");

    assert!(result.success);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(result.session_id.as_deref(), Some("sess-1"));
    assert_eq!(result.report.succeeded, 1);

    let session = store.get("sess-1").await.expect("session should be stored");
    assert_eq!(session.title.as_deref(), Some("Test production"));

    let mut stages = Vec::new();
    while let Ok(event) = rx.try_recv() {
        stages.push(event.stage);
    }
    assert!(stages.contains(&ProgressStage::SessionCreated));
    assert!(stages.contains(&ProgressStage::ToolStarted));
    assert!(stages.contains(&ProgressStage::Complete));
}

#[tokio::test]
async fn test_duplicate_step_is_suppressed() {
    let args = json!({"scene_index": 0, "text": "opening"});
    let llm = MockLlmClient::from_steps(
        "mock",
        vec![
            MockStep::tool_call("call-1", "write_narration", args.clone()),
            MockStep::tool_call("call-2", "write_narration", args),
            MockStep::text("Done."),
        ],
    );
    let mut registry = ToolRegistry::new();
    let tool = StaticTool::new(
        "write_narration",
        ToolGroup::Content,
        json!({"success": true, "narration": "opening", "scene_index": 0}).to_string(),
    );
    let calls = tool.call_counter();
    registry.register(tool).unwrap();

    let executor = executor_with(llm, registry, Arc::new(InMemorySessionStore::new()));
    let result = executor
        .run(PipelineConfig::new("narrate"))
        .await
        .expect("run should succeed");

    // The underlying tool executed at most once.
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let duplicate_msg = result
        .state
        .messages
        .iter()
        .find(|m| m.tool_call_id.as_deref() == Some("call-2"))
        .expect("second call should have a tool message");
    assert!(duplicate_msg.content.contains("duplicate"));
}

#[tokio::test]
async fn test_group_gate_blocks_out_of_order_calls() {
    let llm = MockLlmClient::from_steps(
        "mock",
        vec![
            MockStep::tool_call("call-1", "generate_image", json!({"scene_index": 0})),
            MockStep::text("Stopping."),
        ],
    );
    let mut registry = ToolRegistry::new();
    registry.register(plan_tool()).unwrap();
    let media = StaticTool::new(
        "generate_image",
        ToolGroup::Media,
        json!({"success": true, "image_ref": "img://0"}).to_string(),
    );
    let media_calls = media.call_counter();
    registry.register(media).unwrap();

    let executor = executor_with(llm, registry, Arc::new(InMemorySessionStore::new()));
    let result = executor
        .run(PipelineConfig::new("skip ahead"))
        .await
        .expect("run should succeed");

    assert_eq!(media_calls.load(Ordering::SeqCst), 0);
    let gate_msg = result
        .state
        .messages
        .iter()
        .find(|m| m.tool_call_id.as_deref() == Some("call-1"))
        .expect("tool message should exist");
    assert!(gate_msg.content.contains("Cannot run 'generate_image'"));
}

#[tokio::test]
async fn test_empty_model_response_is_nudged_once() {
    let llm = MockLlmClient::from_steps(
        "mock",
        vec![MockStep::empty(), MockStep::text("Recovered.")],
    );
    let executor = executor_with(llm, ToolRegistry::new(), Arc::new(InMemorySessionStore::new()));

    let result = executor
        .run(PipelineConfig::new("make a video"))
        .await
        .expect("run should succeed");

    assert!(result.success);
    assert_eq!(result.answer.as_deref(), Some("Recovered."));
    // The nudge went into the conversation as a user message.
    assert!(
        result
            .state
            .messages
            .iter()
            .any(|m| m.content.contains("Continue the production"))
    );
}

#[tokio::test]
async fn test_second_empty_response_completes() {
    let llm = MockLlmClient::from_steps("mock", vec![MockStep::empty(), MockStep::empty()]);
    let executor = executor_with(llm, ToolRegistry::new(), Arc::new(InMemorySessionStore::new()));

    let result = executor
        .run(PipelineConfig::new("make a video"))
        .await
        .expect("run should succeed");

    assert!(result.success);
    assert_eq!(result.answer.as_deref(), Some(""));
}

#[tokio::test]
async fn test_model_error_records_fatal_and_propagates() {
    let llm = MockLlmClient::from_steps("mock", vec![MockStep::error("provider exploded")]);
    let store = Arc::new(InMemorySessionStore::new());
    store
        .set("sess-9", sceneflow_models::ProductionSession::new("sess-9"))
        .await;

    let executor = executor_with(llm, ToolRegistry::new(), store.clone());
    let error = executor
        .run(PipelineConfig::new("make a video").with_session_id("sess-9"))
        .await
        .expect_err("model failure must propagate");
    assert!(error.to_string().contains("model call failed"));

    // The session record keeps a readable trace of the abort.
    let session = store.get("sess-9").await.expect("session should exist");
    assert_eq!(session.errors.len(), 1);
    assert_eq!(session.errors[0].tool, "production_agent");
    assert!(!session.errors[0].recoverable);
}

#[tokio::test]
async fn test_iteration_limit_emits_event_and_summary() {
    // Three iterations of distinct failing content calls, then the cap.
    let llm = MockLlmClient::from_steps(
        "mock",
        vec![
            MockStep::tool_call("call-1", "write_narration", json!({"scene_index": 0})),
            MockStep::tool_call("call-2", "write_narration", json!({"scene_index": 1})),
            MockStep::tool_call("call-3", "write_narration", json!({"scene_index": 2})),
        ],
    );
    let mut registry = ToolRegistry::new();
    registry
        .register(FailingTool::new(
            "write_narration",
            ToolGroup::Content,
            "storyboard rejected by reviewer",
        ))
        .unwrap();

    let executor = executor_with(llm, registry, Arc::new(InMemorySessionStore::new()));
    let (tx, mut rx) = mpsc::channel(64);
    let result = executor
        .run_with_progress(
            PipelineConfig::new("narrate everything").with_max_iterations(3),
            Arc::new(ChannelSink::new(tx)),
        )
        .await
        .expect("run should finish");

    assert!(!result.success);
    assert_eq!(result.state.status, PipelineStatus::LimitReached);
    assert!(result.summary.contains("iteration limit"));
    assert!(!result.report.is_usable);
    assert!(result.report.errors.iter().all(|e| e.recoverable));

    let mut stages = Vec::new();
    while let Ok(event) = rx.try_recv() {
        stages.push(event.stage);
    }
    assert!(stages.contains(&ProgressStage::LimitReached));
    assert!(stages.contains(&ProgressStage::Warning));
}

#[tokio::test]
async fn test_checkpoint_rejection_blocks_the_phase() {
    let llm = MockLlmClient::from_steps(
        "mock",
        vec![
            MockStep::tool_call("call-1", "write_narration", json!({"scene_index": 0})),
            MockStep::text("Stopping after review."),
        ],
    );
    let mut registry = ToolRegistry::new();
    let tool = StaticTool::new(
        "write_narration",
        ToolGroup::Content,
        json!({"success": true}).to_string(),
    );
    let calls = tool.call_counter();
    registry.register(tool).unwrap();

    let gate = Arc::new(crate::checkpoint::CheckpointGate::new(4));
    let executor = Arc::new(executor_with(
        llm,
        registry,
        Arc::new(InMemorySessionStore::new()),
    ));

    let run = {
        let executor = executor.clone();
        let gate = gate.clone();
        tokio::spawn(async move {
            executor
                .run(
                    PipelineConfig::new("narrate")
                        .with_checkpoint_gate(gate)
                        .with_checkpoint_timeout(Duration::from_secs(60)),
                )
                .await
        })
    };

    // Wait for the content-phase checkpoint, then reject it.
    for _ in 0..50 {
        if gate.has_pending_checkpoints() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(gate.has_pending_checkpoints());
    let pending_id = gate_pending_id(&gate);
    gate.reject_checkpoint(&pending_id, Some("rewrite the brief".to_string()));

    let result = run
        .await
        .expect("task should finish")
        .expect("run should finish");

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let msg = result
        .state
        .messages
        .iter()
        .find(|m| m.tool_call_id.as_deref() == Some("call-1"))
        .expect("tool message should exist");
    assert!(msg.content.contains("rejected at review"));
    assert!(msg.content.contains("rewrite the brief"));
}

#[tokio::test]
async fn test_checkpoint_timeout_lets_the_phase_proceed() {
    let llm = MockLlmClient::from_steps(
        "mock",
        vec![
            MockStep::tool_call("call-1", "write_narration", json!({"scene_index": 0})),
            MockStep::text("Done."),
        ],
    );
    let mut registry = ToolRegistry::new();
    let tool = StaticTool::new(
        "write_narration",
        ToolGroup::Content,
        json!({"success": true}).to_string(),
    );
    let calls = tool.call_counter();
    registry.register(tool).unwrap();

    let gate = Arc::new(crate::checkpoint::CheckpointGate::new(4));
    let executor = executor_with(llm, registry, Arc::new(InMemorySessionStore::new()));

    let result = executor
        .run(
            PipelineConfig::new("narrate")
                .with_checkpoint_gate(gate)
                .with_checkpoint_timeout(Duration::from_millis(40)),
        )
        .await
        .expect("run should finish");

    assert!(result.success);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cached_result_skips_reinvocation_across_runs() {
    let mut registry = ToolRegistry::new();
    let tool = StaticTool::new("analyze_brief", ToolGroup::Content, "brief looks solid");
    let calls = tool.call_counter();
    registry.register(tool).unwrap();

    let llm = MockLlmClient::new("mock");
    let executor = executor_with(llm.clone(), registry, Arc::new(InMemorySessionStore::new()));

    for _ in 0..2 {
        llm.push_step(MockStep::tool_call(
            "call-1",
            "analyze_brief",
            json!({"brief": "a short film"}),
        ))
        .await;
        llm.push_step(MockStep::text("Done.")).await;

        let result = executor
            .run(PipelineConfig::new("analyze"))
            .await
            .expect("run should finish");
        assert!(result.success);
        assert_eq!(result.report.succeeded, 1);
    }

    // Second run served the identical call from the result cache.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancellation_stops_the_run() {
    let llm = MockLlmClient::from_steps("mock", vec![MockStep::text("never reached")]);
    let executor = executor_with(llm, ToolRegistry::new(), Arc::new(InMemorySessionStore::new()));

    let config = PipelineConfig::new("make a video");
    config.cancellation.cancel();

    let result = executor.run(config).await.expect("run should finish");
    assert!(!result.success);
    assert!(matches!(result.state.status, PipelineStatus::Failed { .. }));
}

fn gate_pending_id(gate: &crate::checkpoint::CheckpointGate) -> String {
    // Exactly one pending checkpoint exists in these tests.
    gate.pending_ids()
        .into_iter()
        .next()
        .expect("a pending checkpoint")
}
