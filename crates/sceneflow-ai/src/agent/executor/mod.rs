//! Pipeline executor
//!
//! The top-level controller: each iteration asks the model for the next
//! tool calls, runs them sequentially through the duplicate guard, the
//! result cache, the group gate, and the retry/fallback machinery, then
//! folds structured outcome messages back into the conversation.
//!
//! Per-tool failures are absorbed into values and never abort the loop;
//! only a failure of the loop's own model call propagates, and it records
//! a fatal `production_agent` error first so the partial-success report
//! stays readable.

mod config;
pub use config::*;

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;

use sceneflow_models::{ProductionSession, SessionError, SessionStore};

use crate::agent::progress::{NullSink, ProgressEvent, ProgressSink, ProgressStage};
use crate::agent::state::{PipelineState, PipelineStatus};
use crate::error::{AiError, Result};
use crate::llm::{CompletionRequest, LlmClient, Message, ToolCall};
use crate::recovery::{
    ErrorCategory, ErrorTracker, FallbackContext, RetryExecutor, ToolError, classify,
};
use crate::tools::{ResultCache, StepIdentifier, ToolRegistry, ToolResponse};

fn default_system_prompt() -> String {
    "You are the production controller for a generative media pipeline. \
     Work through the production step by step: plan the session, write the \
     content, generate media, enhance it, then export. Call one tool at a \
     time with JSON arguments, and reply with a short final summary once \
     the production is done."
        .to_string()
}

fn scene_index_of(args: &Value) -> Option<usize> {
    args.get("scene_index").and_then(Value::as_u64).map(|v| v as usize)
}

/// Truncate a tool result folded into the conversation.
fn truncate_result(content: &str, max_len: usize) -> String {
    if content.len() <= max_len {
        return content.to_string();
    }
    format!("{}... [truncated]", content.chars().take(max_len).collect::<String>())
}

/// Orchestration loop over a production session.
pub struct PipelineExecutor {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    store: Arc<dyn SessionStore>,
    cache: ResultCache,
    /// Per-session run locks: one loop owns a session record at a time.
    session_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PipelineExecutor {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            llm,
            tools,
            store,
            cache: ResultCache::new(),
            session_locks: DashMap::new(),
        }
    }

    async fn acquire_session(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .session_locks
            .entry(session_id.to_string())
            .or_default()
            .value()
            .clone();
        lock.lock_owned().await
    }

    /// Run the pipeline without progress reporting.
    pub async fn run(&self, config: PipelineConfig) -> Result<PipelineRunResult> {
        self.run_with_progress(config, Arc::new(NullSink)).await
    }

    /// Run the pipeline, emitting progress events at phase boundaries.
    pub async fn run_with_progress(
        &self,
        config: PipelineConfig,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<PipelineRunResult> {
        let tracker = ErrorTracker::new();
        let retry = RetryExecutor::with_cancellation(config.cancellation.clone());
        let mut state =
            PipelineState::new(uuid::Uuid::new_v4().to_string(), config.max_iterations);
        state.session_id = config.session_id.clone();

        let mut session_guard = match &state.session_id {
            Some(id) => Some(self.acquire_session(id).await),
            None => None,
        };

        let system_prompt = config
            .system_prompt
            .clone()
            .unwrap_or_else(default_system_prompt);
        state.add_message(Message::system(system_prompt));
        state.add_message(Message::user(&config.goal));

        let mut nudged_empty = false;
        let mut warned_near_limit = false;

        while state.iteration < state.max_iterations && !state.is_terminal() {
            if config.cancellation.is_cancelled() {
                state.fail("run cancelled");
                break;
            }

            if !warned_near_limit
                && state.max_iterations.saturating_sub(state.iteration)
                    <= ITERATION_WARNING_MARGIN
            {
                warned_near_limit = true;
                let message = format!(
                    "Approaching the iteration limit ({} of {})",
                    state.iteration, state.max_iterations
                );
                tracing::warn!(run_id = %state.run_id, "{message}");
                sink.emit(
                    ProgressEvent::new(ProgressStage::Warning, message)
                        .with_session(state.session_id.clone()),
                )
                .await;
                state.add_message(Message::system(
                    "Only a few iterations remain. Finish the remaining work or \
                     summarize what was produced.",
                ));
            }

            let request =
                CompletionRequest::new(state.messages.clone()).with_tools(self.tools.schemas());
            let response = match self.llm.complete(request).await {
                Ok(response) => response,
                Err(error) => {
                    let tool_error = ToolError::new(
                        "production_agent",
                        None,
                        error.to_string(),
                        ErrorCategory::Fatal,
                        0,
                        false,
                    );
                    self.append_session_error(&state, &tool_error).await;
                    tracker.record_error(tool_error, false);
                    state.fail(error.to_string());
                    sink.emit(
                        ProgressEvent::new(
                            ProgressStage::Error,
                            format!("Production aborted: {error}"),
                        )
                        .with_session(state.session_id.clone()),
                    )
                    .await;
                    return Err(AiError::Pipeline(format!("model call failed: {error}")));
                }
            };

            if response.is_blocked() && !nudged_empty {
                // One nudge for a blocked/empty model turn before treating
                // silence as completion.
                nudged_empty = true;
                tracing::warn!(run_id = %state.run_id, "empty model response, nudging once");
                state.add_message(Message::user(
                    "Continue the production. Reply with the next tool call, or a \
                     final summary if the work is done.",
                ));
                state.increment_iteration();
                continue;
            }

            if response.tool_calls.is_empty() {
                let answer = response.content.unwrap_or_default();
                state.add_message(Message::assistant(&answer));
                state.complete(&answer);
                break;
            }

            state.add_message(Message::assistant_with_tool_calls(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            // Sequential on purpose: later calls in the same turn may depend
            // on state mutated by earlier ones.
            for call in &response.tool_calls {
                let result_text = self
                    .handle_tool_call(
                        call,
                        &mut state,
                        &mut session_guard,
                        &config,
                        &tracker,
                        &retry,
                        sink.as_ref(),
                    )
                    .await;
                state.add_message(Message::tool_result(call.id.clone(), result_text));
            }

            state.increment_iteration();
        }

        let assets = match &state.session_id {
            Some(id) => self.store.get(id).await.map(|s| s.asset_summary()),
            None => None,
        };

        match &state.status {
            PipelineStatus::Completed => {
                let mut event =
                    ProgressEvent::new(ProgressStage::Complete, "Production run complete")
                        .with_session(state.session_id.clone());
                if let Some(assets) = assets {
                    event = event.with_assets(assets);
                }
                sink.emit(event).await;
            }
            PipelineStatus::LimitReached => {
                sink.emit(
                    ProgressEvent::new(
                        ProgressStage::LimitReached,
                        format!(
                            "Stopped after reaching the iteration limit ({})",
                            state.max_iterations
                        ),
                    )
                    .with_session(state.session_id.clone()),
                )
                .await;
            }
            PipelineStatus::Failed { error } => {
                sink.emit(
                    ProgressEvent::new(ProgressStage::Error, format!("Production failed: {error}"))
                        .with_session(state.session_id.clone()),
                )
                .await;
            }
            PipelineStatus::Running => {}
        }

        let report = tracker.generate_report();
        let summary = match &state.status {
            PipelineStatus::LimitReached => format!(
                "{} Stopped at the iteration limit ({}).",
                report.summary, state.max_iterations
            ),
            _ => report.summary.clone(),
        };

        drop(session_guard);

        Ok(PipelineRunResult {
            success: matches!(state.status, PipelineStatus::Completed),
            answer: state.final_answer.clone(),
            summary,
            report,
            iterations: state.iteration,
            session_id: state.session_id.clone(),
            state,
        })
    }

    /// Handle one requested tool call, returning the tool message for the
    /// conversation. Never fails: every outcome becomes a value.
    #[allow(clippy::too_many_arguments)]
    async fn handle_tool_call(
        &self,
        call: &ToolCall,
        state: &mut PipelineState,
        session_guard: &mut Option<OwnedMutexGuard<()>>,
        config: &PipelineConfig,
        tracker: &ErrorTracker,
        retry: &RetryExecutor,
        sink: &dyn ProgressSink,
    ) -> String {
        let step = StepIdentifier::new(&call.name, &call.arguments);
        let scene_index = scene_index_of(&call.arguments);

        if state.executed_steps.contains(&step) {
            tracing::info!(tool = %call.name, "skipping duplicate step");
            sink.emit(
                ProgressEvent::new(
                    ProgressStage::ToolResult,
                    format!("Skipped duplicate call to '{}'", call.name),
                )
                .with_tool(&call.name)
                .with_session(state.session_id.clone()),
            )
            .await;
            return json!({
                "success": true,
                "skipped": "duplicate",
                "message": format!(
                    "Step '{}' already completed in this session; duplicate call skipped.",
                    call.name
                ),
            })
            .to_string();
        }

        let Some(tool) = self.tools.get(&call.name) else {
            let error = ToolError::new(
                &call.name,
                scene_index,
                format!("tool '{}' is not registered", call.name),
                ErrorCategory::Recoverable,
                0,
                true,
            );
            self.append_session_error(state, &error).await;
            tracker.record_error(error, false);
            sink.emit(
                ProgressEvent::new(
                    ProgressStage::ToolResult,
                    format!("Unknown tool '{}'", call.name),
                )
                .with_tool(&call.name)
                .with_session(state.session_id.clone()),
            )
            .await;
            return json!({
                "success": false,
                "message": format!(
                    "Unknown tool '{}'. Use one of the registered tools.",
                    call.name
                ),
            })
            .to_string();
        };
        let group = tool.group();

        let session_version = match &state.session_id {
            Some(id) => self.store.get(id).await.map(|s| s.version).unwrap_or(0),
            None => 0,
        };
        if let Some(cached) = self.cache.get(&step, session_version) {
            tracing::info!(tool = %call.name, "serving cached result");
            sink.emit(
                ProgressEvent::new(
                    ProgressStage::ToolResult,
                    format!("Served cached result for '{}'", call.name),
                )
                .with_tool(&call.name)
                .with_session(state.session_id.clone()),
            )
            .await;
            tracker.record_success();
            state.mark_step_executed(step, &call.name, group);
            self.apply_tool_result(state, session_guard, &ToolResponse::parse(&cached), sink)
                .await;
            return cached;
        }

        if !self.tools.can_execute(&call.name, &state.completed_groups) {
            return json!({
                "success": false,
                "message": format!(
                    "Cannot run '{}' yet: the {} phase depends on earlier phases that \
                     are not complete.",
                    call.name, group
                ),
            })
            .to_string();
        }

        // First entry into a phase consults the checkpoint gate.
        if let Some(gate) = &config.checkpoint_gate {
            if !state.gated_groups.contains(&group) {
                let outcome = gate
                    .create_checkpoint_with_timeout(group.as_str(), config.checkpoint_timeout)
                    .await;
                if !outcome.approved {
                    let change = outcome
                        .change_request
                        .unwrap_or_else(|| "no change request provided".to_string());
                    return json!({
                        "success": false,
                        "message": format!(
                            "The {} phase was rejected at review: {}",
                            group, change
                        ),
                    })
                    .to_string();
                }
                state.gated_groups.insert(group);
            }
        }

        let policy = config.policies.get(&call.name);
        sink.emit(
            ProgressEvent::new(ProgressStage::ToolStarted, format!("Running '{}'", call.name))
                .with_tool(&call.name)
                .with_session(state.session_id.clone()),
        )
        .await;

        let args = call.arguments.clone();
        let tool_timeout = config.tool_timeout;
        let tool_name = call.name.clone();
        let session_id = state.session_id.clone();
        let exec = retry
            .execute(
                &call.name,
                scene_index,
                policy,
                || {
                    let tool = tool.clone();
                    let args = args.clone();
                    let name = tool_name.clone();
                    async move {
                        match timeout(tool_timeout, tool.invoke(args)).await {
                            Ok(result) => result,
                            Err(_) => Err(AiError::Tool(format!("tool '{name}' timed out"))),
                        }
                    }
                },
                |attempt, message, delay| {
                    let name = tool_name.clone();
                    let session_id = session_id.clone();
                    async move {
                        tracing::warn!(
                            tool = %name,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "retrying after transient failure"
                        );
                        sink.emit(
                            ProgressEvent::new(
                                ProgressStage::Retry,
                                format!("Retry {attempt} for '{name}': {message}"),
                            )
                            .with_tool(name.clone())
                            .with_session(session_id),
                        )
                        .await;
                    }
                },
            )
            .await;

        let mut error = if exec.success {
            let raw = exec.data.unwrap_or_default();
            let response = ToolResponse::parse(&raw);
            if response.is_success() {
                tracker.record_success();
                state.mark_step_executed(step.clone(), &call.name, group);
                self.cache.insert(step, session_version, raw.clone());
                self.apply_tool_result(state, session_guard, &response, sink).await;
                sink.emit(
                    ProgressEvent::new(
                        ProgressStage::ToolResult,
                        format!("'{}' completed", call.name),
                    )
                    .with_tool(&call.name)
                    .with_session(state.session_id.clone()),
                )
                .await;
                return truncate_result(&raw, config.max_tool_result_length);
            }
            // The tool answered, but reported failure in-band.
            let message = response
                .message()
                .unwrap_or("tool reported failure")
                .to_string();
            let category = classify(&message);
            let recoverable = category != ErrorCategory::Fatal && policy.continue_on_failure;
            ToolError::new(
                &call.name,
                scene_index,
                message,
                category,
                exec.retry_count,
                recoverable,
            )
        } else {
            match exec.error {
                Some(error) => error,
                None => ToolError::new(
                    &call.name,
                    scene_index,
                    "unknown failure",
                    ErrorCategory::Recoverable,
                    exec.retry_count,
                    policy.continue_on_failure,
                ),
            }
        };

        if error.recoverable {
            if let Some(action) = policy.fallback_action.clone() {
                let context = self.fallback_context(state, scene_index).await;
                if let Some(payload) = config.fallbacks.apply(&action, &error, &context) {
                    error.mark_fallback(&action);
                    self.append_session_error(state, &error).await;
                    tracker.record_error(error.clone(), true);
                    sink.emit(
                        ProgressEvent::new(
                            ProgressStage::Fallback,
                            format!("Applied fallback '{}' for '{}'", action, call.name),
                        )
                        .with_tool(&call.name)
                        .with_session(state.session_id.clone()),
                    )
                    .await;
                    state.mark_step_executed(step, &call.name, group);
                    let applied = ToolResponse::Structured {
                        success: true,
                        message: None,
                        data: payload.clone(),
                    };
                    self.apply_tool_result(state, session_guard, &applied, sink).await;
                    return json!({
                        "success": true,
                        "fallback_applied": action,
                        "message": format!(
                            "'{}' failed ({}); continued with fallback '{}'.",
                            call.name, error.message, action
                        ),
                        "data": payload,
                    })
                    .to_string();
                }
            }
        }

        self.append_session_error(state, &error).await;
        tracker.record_error(error.clone(), false);
        sink.emit(
            ProgressEvent::new(
                ProgressStage::ToolResult,
                format!("'{}' failed: {}", call.name, error.message),
            )
            .with_tool(&call.name)
            .with_session(state.session_id.clone()),
        )
        .await;
        json!({
            "success": false,
            "error": {
                "tool": error.tool,
                "message": error.message,
                "category": error.category,
                "retry_count": error.retry_count,
                "recoverable": error.recoverable,
            },
            "message": format!(
                "'{}' failed after {} attempt(s): {}",
                call.name,
                error.retry_count + 1,
                error.message
            ),
        })
        .to_string()
    }

    /// Fold a structured tool result into the session record.
    async fn apply_tool_result(
        &self,
        state: &mut PipelineState,
        session_guard: &mut Option<OwnedMutexGuard<()>>,
        response: &ToolResponse,
        sink: &dyn ProgressSink,
    ) {
        let ToolResponse::Structured { data, .. } = response else {
            return;
        };

        // A planning-family tool announcing a session id starts the session.
        if state.session_id.is_none() {
            if let Some(session_id) = data.get("session_id").and_then(Value::as_str) {
                state.session_id = Some(session_id.to_string());
                *session_guard = Some(self.acquire_session(session_id).await);
                if self.store.get(session_id).await.is_none() {
                    let mut session = ProductionSession::new(session_id);
                    if let Some(title) = data.get("title").and_then(Value::as_str) {
                        session.title = Some(title.to_string());
                    }
                    self.store.set(session_id, session).await;
                }
                sink.emit(
                    ProgressEvent::new(
                        ProgressStage::SessionCreated,
                        format!("Production session {session_id} created"),
                    )
                    .with_session(Some(session_id.to_string())),
                )
                .await;
            }
        }

        let Some(session_id) = state.session_id.clone() else {
            return;
        };
        let Some(mut session) = self.store.get(&session_id).await else {
            return;
        };

        let scene_index = data.get("scene_index").and_then(Value::as_u64).map(|v| v as usize);
        let mut changed = false;

        if let Some(image_ref) = data.get("image_ref").and_then(Value::as_str) {
            session.scene_mut(scene_index.unwrap_or(0)).image_ref = Some(image_ref.to_string());
            changed = true;
        }
        if let Some(video_ref) = data.get("video_ref").and_then(Value::as_str) {
            session.scene_mut(scene_index.unwrap_or(0)).video_ref = Some(video_ref.to_string());
            changed = true;
        }
        if let Some(narration) = data.get("narration").and_then(Value::as_str) {
            session.scene_mut(scene_index.unwrap_or(0)).narration = Some(narration.to_string());
            changed = true;
        }
        if let Some(music_ref) = data.get("music_ref").and_then(Value::as_str) {
            session.music_ref = Some(music_ref.to_string());
            changed = true;
        }
        if let Some(lyrics) = data.get("lyrics").and_then(Value::as_str) {
            session.lyrics = Some(lyrics.to_string());
            changed = true;
        }

        if changed {
            session.touch();
            self.store.set(&session_id, session).await;
        }
    }

    /// Append a terminal error to the session record, if one exists.
    async fn append_session_error(&self, state: &PipelineState, error: &ToolError) {
        let Some(session_id) = &state.session_id else {
            return;
        };
        let Some(mut session) = self.store.get(session_id).await else {
            return;
        };
        session.errors.push(SessionError {
            tool: error.tool.clone(),
            scene_index: error.scene_index,
            message: error.message.clone(),
            recoverable: error.recoverable,
            fallback_applied: error.fallback_applied.clone(),
            timestamp: error.timestamp,
        });
        session.touch();
        self.store.set(session_id, session).await;
    }

    /// Ambient session material handed to fallback handlers.
    async fn fallback_context(
        &self,
        state: &PipelineState,
        scene_index: Option<usize>,
    ) -> FallbackContext {
        let session = match &state.session_id {
            Some(id) => self.store.get(id).await,
            None => None,
        };
        let scene = session
            .as_ref()
            .and_then(|s| scene_index.and_then(|idx| s.scenes.get(idx)));

        FallbackContext {
            session_id: state.session_id.clone(),
            scene_index,
            previous_image: scene.and_then(|s| s.image_ref.clone()),
            narration: scene.and_then(|s| s.narration.clone()),
            music_reference: session.as_ref().and_then(|s| s.music_ref.clone()),
        }
    }
}

#[cfg(test)]
mod tests;
