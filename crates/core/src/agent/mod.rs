use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use grok_provider::{ChatRequest, ContentPart, Provider, ProviderError, StreamEvent, ToolChoice};

use crate::conversation::Thread;
use crate::outcome::{SelfCorrectError, ToolOutcome};
use crate::planner::executor::{execute_plan, ExecutorOptions, PlanEvent};
use crate::planner::validation::PlannerOptions;
use crate::planner::{analyzer, plan_builder, risk, validation, PlanStatus, TaskPlan};
use crate::streaming::StreamAccumulator;
use crate::tools::{ToolCallRequest, ToolContext, ToolRegistry};

/// Typed event stream consumed by the UI collaborator.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    Content(String),
    ToolCall {
        id: String,
        name: String,
        args: serde_json::Value,
    },
    ToolResult {
        id: String,
        name: String,
        outcome: ToolOutcome,
    },
    PlanGenerated {
        plan_id: String,
        preview: String,
    },
    PlanConfirmed {
        plan_id: String,
        approved: bool,
    },
    PlanProgress {
        completed: usize,
        total: usize,
        estimated_remaining_ms: u64,
        current_step: String,
    },
    PlanStepStarted {
        step_id: String,
        description: String,
    },
    PlanStepCompleted {
        step_id: String,
        duration_ms: u64,
        files_modified: Vec<String>,
    },
    PlanStepFailed {
        step_id: String,
        error: String,
    },
    CorrectionAttempt {
        tool: String,
        attempt: usize,
        max_attempts: usize,
        hint: String,
    },
    CorrectionFailed {
        tool: String,
        attempts: usize,
    },
    Done,
    Error(String),
}

/// External confirmation seam: the CLI prompts, tests script an answer.
#[async_trait]
pub trait PlanApproval: Send + Sync {
    async fn confirm(&self, plan: &TaskPlan, preview: &str) -> bool;
}

pub struct AutoApprove(pub bool);

#[async_trait]
impl PlanApproval for AutoApprove {
    async fn confirm(&self, _plan: &TaskPlan, _preview: &str) -> bool {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 4_000,
        }
    }
}

#[derive(Clone)]
pub struct AgentConfig {
    pub model: String,
    pub system_prompt: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub max_tool_rounds: u32,
    pub max_correction_attempts: usize,
    pub max_concurrent_tools: usize,
    pub parallel_tool_calls: bool,
    pub retry: RetryPolicy,
    pub planner: PlannerOptions,
    pub auto_rollback_on_failure: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            system_prompt: default_system_prompt(),
            temperature: None,
            max_tokens: None,
            max_tool_rounds: 25,
            max_correction_attempts: 3,
            max_concurrent_tools: 3,
            parallel_tool_calls: true,
            retry: RetryPolicy::default(),
            planner: PlannerOptions::default(),
            auto_rollback_on_failure: true,
        }
    }
}

impl AgentConfig {
    pub fn from_settings(settings: &grok_config::Settings) -> Self {
        Self {
            model: settings.default_model.clone().unwrap_or_default(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            max_concurrent_tools: settings.max_concurrent_tools,
            parallel_tool_calls: settings.parallel_tool_calls,
            ..Default::default()
        }
    }
}

pub fn default_system_prompt() -> String {
    "You are a coding agent working in the user's repository. Use the available tools to \
     inspect and edit files; prefer small, verifiable changes. When a tool fails with a \
     suggestion, follow the suggestion before retrying the same call."
        .to_string()
}

#[derive(Debug, Clone)]
pub struct CorrectionAttempt {
    pub tool: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
    pub fallback_strategy: String,
}

/// Per-request correction bookkeeping, keyed by a stable hash of the
/// original user request.
#[derive(Debug, Default)]
pub struct CorrectionLedger {
    attempts: HashMap<String, Vec<CorrectionAttempt>>,
}

impl CorrectionLedger {
    pub fn key(request: &str) -> String {
        hex::encode(Sha256::digest(request.as_bytes()))
    }

    pub fn count(&self, key: &str) -> usize {
        self.attempts.get(key).map(Vec::len).unwrap_or(0)
    }

    pub fn record(&mut self, key: &str, attempt: CorrectionAttempt) {
        self.attempts.entry(key.to_string()).or_default().push(attempt);
    }
}

/// Plan-detection score per the complexity heuristic; planning kicks in at 3.
pub fn plan_complexity_score(message: &str) -> u32 {
    let lowered = message.to_lowercase();
    let word = |w: &str| {
        lowered
            .split(|c: char| !c.is_alphanumeric())
            .any(|token| token == w)
    };

    let mut score = 0;
    const PLAN_KEYWORDS: [&str; 10] = [
        "refactor",
        "move",
        "extract",
        "implement",
        "restructure",
        "redesign",
        "reorganize",
        "migrate",
        "convert",
        "transform",
    ];
    if PLAN_KEYWORDS.iter().any(|kw| word(kw)) {
        score += 2;
    }
    if analyzer::extract_file_paths(message).len() >= 2 {
        score += 2;
    }
    const STRUCTURE_KEYWORDS: [&str; 5] =
        ["architecture", "design", "pattern", "dependency", "module"];
    if STRUCTURE_KEYWORDS.iter().any(|kw| word(kw)) {
        score += 1;
    }
    if word("across") || word("throughout") {
        score += 1;
    }
    score
}

pub fn should_create_plan(message: &str) -> bool {
    plan_complexity_score(message) >= 3
}

pub struct Agent {
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    config: AgentConfig,
    ctx: ToolContext,
}

impl Agent {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        config: AgentConfig,
        ctx: ToolContext,
    ) -> Self {
        Self {
            provider,
            registry,
            config,
            ctx,
        }
    }

    pub fn context(&self) -> &ToolContext {
        &self.ctx
    }

    /// One agent turn: the user message plus every LLM round and tool batch
    /// until the model answers without tool calls (or a bound trips).
    pub async fn run_turn(
        &self,
        thread: &mut Thread,
        user_message: &str,
        events: &mpsc::UnboundedSender<AgentEvent>,
        approval: &dyn PlanApproval,
        cancel: &CancellationToken,
    ) -> Result<()> {
        thread.push_user_text(user_message);

        if should_create_plan(user_message) {
            if self
                .try_plan_path(thread, user_message, events, approval, cancel)
                .await?
            {
                return Ok(());
            }
        }

        let mut ledger = CorrectionLedger::default();
        let ledger_key = CorrectionLedger::key(user_message);

        for round in 0..self.config.max_tool_rounds {
            let request = ChatRequest {
                model: self.config.model.clone(),
                messages: thread.messages().to_vec(),
                tools: self.registry.definitions(),
                tool_choice: ToolChoice::Auto,
                max_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
                system: Some(self.config.system_prompt.clone()),
                stream: true,
            };

            let acc = match self.stream_with_retry(&request, events, cancel).await? {
                Some(acc) => acc,
                None => {
                    // Cancelled mid-stream.
                    let _ = events.send(AgentEvent::Done);
                    return Ok(());
                }
            };

            if !acc.has_tool_calls() {
                if !acc.text.is_empty() {
                    thread.push_assistant_text(acc.text);
                }
                let _ = events.send(AgentEvent::Done);
                return Ok(());
            }

            let calls: Vec<ToolCallRequest> = acc
                .tool_calls()
                .into_iter()
                .map(|call| ToolCallRequest {
                    id: call.id,
                    name: call.name,
                    args: serde_json::from_str(&call.arguments)
                        .unwrap_or(serde_json::Value::Null),
                })
                .collect();

            let mut tool_use_parts = Vec::with_capacity(calls.len());
            for call in &calls {
                let _ = events.send(AgentEvent::ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    args: call.args.clone(),
                });
                tool_use_parts.push(ContentPart::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.args.clone(),
                });
            }
            if !acc.text.is_empty() {
                tool_use_parts.insert(
                    0,
                    ContentPart::Text {
                        text: acc.text.clone(),
                    },
                );
            }
            thread.push_assistant_parts(tool_use_parts);

            // The whole batch completes before the next LLM call sees any
            // result; tool calls themselves are never interrupted.
            let results = self
                .registry
                .execute_batch(
                    &calls,
                    &self.ctx,
                    self.config.max_concurrent_tools,
                    self.config.parallel_tool_calls,
                )
                .await;

            let mut result_parts = Vec::with_capacity(results.len());
            for (call, outcome) in calls.iter().zip(results.iter()) {
                let _ = events.send(AgentEvent::ToolResult {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    outcome: outcome.clone(),
                });
                result_parts.push(ContentPart::ToolResult {
                    tool_use_id: call.id.clone(),
                    content: outcome.to_model_text(),
                });
            }
            thread.push_tool_results(result_parts);

            // Typed self-correct detection (legacy prefix honored inside).
            let correction = calls
                .iter()
                .zip(results.iter())
                .find_map(|(call, outcome)| {
                    SelfCorrectError::decode(outcome).map(|sc| (call.name.clone(), sc))
                });
            if let Some((tool_name, sc)) = correction {
                let attempts = ledger.count(&ledger_key);
                if attempts < self.config.max_correction_attempts {
                    ledger.record(
                        &ledger_key,
                        CorrectionAttempt {
                            tool: tool_name.clone(),
                            error: sc.message.clone(),
                            timestamp: Utc::now(),
                            fallback_strategy: sc.suggested_fallbacks.join(", "),
                        },
                    );
                    let _ = events.send(AgentEvent::CorrectionAttempt {
                        tool: tool_name,
                        attempt: attempts + 1,
                        max_attempts: self.config.max_correction_attempts,
                        hint: sc.hint.clone(),
                    });
                    let fallbacks = if sc.suggested_fallbacks.is_empty() {
                        String::new()
                    } else {
                        format!(" Consider these tools instead: {}.", sc.suggested_fallbacks.join(", "))
                    };
                    thread.push_user_text(format!(
                        "The previous `{}` call failed: {}.{fallbacks} Adjust your approach and continue.",
                        sc.original_tool, sc.hint
                    ));
                } else {
                    let _ = events.send(AgentEvent::CorrectionFailed {
                        tool: tool_name.clone(),
                        attempts,
                    });
                    let notice = format!(
                        "I was unable to complete the `{tool_name}` operation after {attempts} \
                         correction attempts. Try a narrower instruction, or view the file and \
                         quote its exact content."
                    );
                    let _ = events.send(AgentEvent::Content(notice.clone()));
                    thread.push_assistant_text(notice);
                    let _ = events.send(AgentEvent::Done);
                    return Ok(());
                }
            }

            if round + 1 == self.config.max_tool_rounds {
                let _ = events.send(AgentEvent::Error(
                    "reached the maximum number of tool rounds for this turn".to_string(),
                ));
            }
        }

        let _ = events.send(AgentEvent::Done);
        Ok(())
    }

    /// Returns true when the turn was fully handled by the plan path.
    async fn try_plan_path(
        &self,
        thread: &mut Thread,
        user_message: &str,
        events: &mpsc::UnboundedSender<AgentEvent>,
        approval: &dyn PlanApproval,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let engine = self.ctx.engine.as_ref().filter(|e| e.is_ready());
        let analysis = analyzer::analyze(user_message, engine.map(|e| e.as_ref()));
        let mut plan = plan_builder::build_plan(user_message, &analysis);
        risk::assess_plan(&mut plan);
        let report = validation::validate(&mut plan, &self.config.planner);
        if !report.valid {
            tracing::debug!(
                "generated plan failed validation ({:?}); falling back to the tool loop",
                report.errors
            );
            return Ok(false);
        }

        let preview = plan.render_preview();
        let _ = events.send(AgentEvent::PlanGenerated {
            plan_id: plan.id.clone(),
            preview: preview.clone(),
        });

        let approved = approval.confirm(&plan, &preview).await;
        let _ = events.send(AgentEvent::PlanConfirmed {
            plan_id: plan.id.clone(),
            approved,
        });
        if !approved {
            return Ok(false);
        }

        let registry = self.registry.clone();
        let ctx = self.ctx.clone();
        let runner = move |tool: String, args: serde_json::Value| {
            let registry = registry.clone();
            let ctx = ctx.clone();
            async move { registry.execute(&tool, args, &ctx).await }
        };

        let events_clone = events.clone();
        let on_event = move |event: PlanEvent| {
            let mapped = match event {
                PlanEvent::Progress {
                    completed,
                    total,
                    estimated_remaining_ms,
                    current_step,
                } => AgentEvent::PlanProgress {
                    completed,
                    total,
                    estimated_remaining_ms,
                    current_step,
                },
                PlanEvent::StepStarted {
                    step_id,
                    description,
                } => AgentEvent::PlanStepStarted {
                    step_id,
                    description,
                },
                PlanEvent::StepCompleted {
                    step_id,
                    duration_ms,
                    files_modified,
                } => AgentEvent::PlanStepCompleted {
                    step_id,
                    duration_ms,
                    files_modified,
                },
                PlanEvent::StepFailed { step_id, error } => {
                    AgentEvent::PlanStepFailed { step_id, error }
                }
                PlanEvent::Completed { .. } => return,
            };
            let _ = events_clone.send(mapped);
        };

        execute_plan(
            &mut plan,
            &self.ctx.project_root,
            runner,
            on_event,
            Some(self.ctx.history.as_ref()),
            &ExecutorOptions {
                auto_rollback_on_failure: self.config.auto_rollback_on_failure,
            },
            Some(cancel),
        )
        .await?;

        let summary = match plan.status {
            PlanStatus::Completed => format!(
                "Plan completed: {} step(s) executed.",
                plan.steps.len()
            ),
            PlanStatus::RolledBack => {
                "Plan failed; all completed steps were rolled back.".to_string()
            }
            status => format!("Plan ended with status {status:?}."),
        };
        let _ = events.send(AgentEvent::Content(summary.clone()));
        thread.push_assistant_text(summary);
        let _ = events.send(AgentEvent::Done);
        Ok(true)
    }

    /// Stream one request, retrying transient provider failures with
    /// exponential backoff (1s, 2s, 4s by default). `None` means cancelled.
    async fn stream_with_retry(
        &self,
        request: &ChatRequest,
        events: &mpsc::UnboundedSender<AgentEvent>,
        cancel: &CancellationToken,
    ) -> Result<Option<StreamAccumulator>> {
        let mut attempt: u32 = 0;
        'retry: loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            let mut stream = match self.provider.chat_stream(request).await {
                Ok(stream) => stream,
                Err(e) => {
                    if self.should_retry(&e, &mut attempt, events).await {
                        continue 'retry;
                    }
                    return Err(e);
                }
            };

            let mut acc = StreamAccumulator::new();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(None),
                    next = stream.next() => match next {
                        Some(Ok(event)) => {
                            if let StreamEvent::TextDelta(text) = &event {
                                if !text.is_empty() {
                                    let _ = events.send(AgentEvent::Content(text.clone()));
                                }
                            }
                            acc.process(&event);
                        }
                        Some(Err(e)) => {
                            if self.should_retry(&e, &mut attempt, events).await {
                                continue 'retry;
                            }
                            return Err(e);
                        }
                        None => return Ok(Some(acc)),
                    }
                }
            }
        }
    }

    async fn should_retry(
        &self,
        error: &anyhow::Error,
        attempt: &mut u32,
        events: &mpsc::UnboundedSender<AgentEvent>,
    ) -> bool {
        let retryable = error
            .downcast_ref::<ProviderError>()
            .map(|pe| pe.is_retryable())
            .unwrap_or(false);
        if !retryable || *attempt >= self.config.retry.max_retries {
            return false;
        }
        *attempt += 1;
        let wait = error
            .downcast_ref::<ProviderError>()
            .and_then(|pe| pe.retry_after_ms())
            .unwrap_or_else(|| {
                self.config
                    .retry
                    .initial_backoff_ms
                    .saturating_mul(2u64.saturating_pow(*attempt - 1))
            })
            .min(self.config.retry.max_backoff_ms);
        let _ = events.send(AgentEvent::Error(format!(
            "transient provider error (attempt {attempt}/{}): {error}; retrying in {wait}ms",
            self.config.retry.max_retries
        )));
        tokio::time::sleep(std::time::Duration::from_millis(wait)).await;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::default_registry;
    use futures::stream::BoxStream;
    use grok_provider::{ChatResponse, MessageContent, Usage};
    use std::sync::Mutex;

    /// Scripted provider: each chat_stream call pops the next response.
    struct ScriptedProvider {
        responses: Mutex<Vec<Vec<StreamEvent>>>,
    }

    impl ScriptedProvider {
        fn new(mut responses: Vec<Vec<StreamEvent>>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
            }
        }

        fn tool_call_response(name: &str, args: &str, index: u32) -> Vec<StreamEvent> {
            vec![
                StreamEvent::ToolCallStart {
                    index,
                    id: format!("call-{name}-{index}"),
                    name: name.to_string(),
                },
                StreamEvent::ToolCallDelta {
                    index,
                    arguments_delta: args.to_string(),
                },
                StreamEvent::Done,
            ]
        }

        fn text_response(text: &str) -> Vec<StreamEvent> {
            vec![
                StreamEvent::TextDelta(text.to_string()),
                StreamEvent::Usage(Usage {
                    input_tokens: 1,
                    output_tokens: 1,
                }),
                StreamEvent::Done,
            ]
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn default_model(&self) -> &str {
            "test-model"
        }

        async fn chat(&self, _request: &ChatRequest) -> Result<ChatResponse> {
            anyhow::bail!("scripted provider is stream-only")
        }

        async fn chat_stream(
            &self,
            _request: &ChatRequest,
        ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
            let next = self
                .responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| ScriptedProvider::text_response("(script exhausted)"));
            Ok(Box::pin(futures::stream::iter(
                next.into_iter().map(Ok),
            )))
        }
    }

    fn agent_with(
        dir: &std::path::Path,
        responses: Vec<Vec<StreamEvent>>,
    ) -> (Agent, mpsc::UnboundedReceiver<AgentEvent>, mpsc::UnboundedSender<AgentEvent>) {
        let provider = Arc::new(ScriptedProvider::new(responses));
        let registry = Arc::new(default_registry());
        let ctx = crate::tools::test_context(dir);
        let agent = Agent::new(provider, registry, AgentConfig::default(), ctx);
        let (tx, rx) = mpsc::unbounded_channel();
        (agent, rx, tx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<AgentEvent>) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn plan_scoring_follows_the_heuristic() {
        // keyword only: 2
        assert!(!should_create_plan("refactor this"));
        // keyword + structural term: 3
        assert!(should_create_plan("refactor the dependency layout"));
        // keyword + two files: 4
        assert!(should_create_plan("move helpers from a.ts to b.ts"));
        // two files only: 2
        assert!(!should_create_plan("compare a.ts and b.ts"));
        // keyword + across: 3
        assert!(should_create_plan("refactor logging across the codebase"));
        assert!(!should_create_plan("hello there"));
    }

    #[tokio::test]
    async fn text_only_response_completes_the_turn() {
        let dir = tempfile::tempdir().unwrap();
        let (agent, mut rx, tx) =
            agent_with(dir.path(), vec![ScriptedProvider::text_response("All done.")]);

        let mut thread = Thread::new();
        agent
            .run_turn(
                &mut thread,
                "say hi",
                &tx,
                &AutoApprove(false),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, AgentEvent::Content(t) if t == "All done.")));
        assert!(matches!(events.last(), Some(AgentEvent::Done)));
        assert_eq!(thread.message_count(), 2);
    }

    #[tokio::test]
    async fn tool_batch_results_enter_conversation_in_emission_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha\n").unwrap();

        let round_one = vec![
            StreamEvent::ToolCallStart {
                index: 0,
                id: "t1".into(),
                name: "bash".into(),
            },
            StreamEvent::ToolCallDelta {
                index: 0,
                arguments_delta: "{\"command\":\"sleep 0.3 && echo one\"}".into(),
            },
            StreamEvent::ToolCallStart {
                index: 1,
                id: "t2".into(),
                name: "view_file".into(),
            },
            StreamEvent::ToolCallDelta {
                index: 1,
                arguments_delta: "{\"path\":\"a.txt\"}".into(),
            },
            StreamEvent::ToolCallStart {
                index: 2,
                id: "t3".into(),
                name: "search".into(),
            },
            StreamEvent::ToolCallDelta {
                index: 2,
                arguments_delta: "{\"pattern\":\"alpha\"}".into(),
            },
            StreamEvent::Done,
        ];
        let (agent, mut rx, tx) = agent_with(
            dir.path(),
            vec![round_one, ScriptedProvider::text_response("finished")],
        );

        let mut thread = Thread::new();
        let started = std::time::Instant::now();
        agent
            .run_turn(
                &mut thread,
                "inspect things",
                &tx,
                &AutoApprove(false),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let elapsed = started.elapsed();

        // Bounded-parallel batch: total ≈ the slowest call.
        assert!(elapsed.as_millis() < 900, "batch took {elapsed:?}");

        let events = drain(&mut rx);
        let result_ids: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::ToolResult { id, .. } => Some(id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(result_ids, vec!["t1", "t2", "t3"]);

        // Conversation: user, assistant tool_use, user tool_results, assistant text.
        assert_eq!(thread.message_count(), 4);
        let results_message = &thread.messages()[2];
        let MessageContent::Parts(parts) = &results_message.content else {
            panic!("expected parts");
        };
        let ids: Vec<&str> = parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);
    }

    #[tokio::test]
    async fn correction_attempts_are_bounded_at_three() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.ts"), "const real = 1;\n").unwrap();

        // Every round asks for an edit whose old_str never matches.
        let bad_call = || {
            ScriptedProvider::tool_call_response(
                "str_replace_editor",
                "{\"path\":\"a.ts\",\"old_str\":\"does not exist anywhere\",\"new_str\":\"x\"}",
                0,
            )
        };
        let (agent, mut rx, tx) = agent_with(
            dir.path(),
            vec![bad_call(), bad_call(), bad_call(), bad_call(), bad_call()],
        );

        let mut thread = Thread::new();
        agent
            .run_turn(
                &mut thread,
                "edit the file",
                &tx,
                &AutoApprove(false),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let events = drain(&mut rx);
        let attempts = events
            .iter()
            .filter(|e| matches!(e, AgentEvent::CorrectionAttempt { .. }))
            .count();
        let exhaustions = events
            .iter()
            .filter(|e| matches!(e, AgentEvent::CorrectionFailed { .. }))
            .count();
        assert_eq!(attempts, 3);
        assert_eq!(exhaustions, 1);
        // A single explanatory content message, then done.
        assert!(events.iter().any(
            |e| matches!(e, AgentEvent::Content(t) if t.contains("correction attempts"))
        ));
        assert!(matches!(events.last(), Some(AgentEvent::Done)));

        // File untouched throughout.
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.ts")).unwrap(),
            "const real = 1;\n"
        );
    }

    #[tokio::test]
    async fn rejected_plan_falls_through_to_the_tool_loop() {
        let dir = tempfile::tempdir().unwrap();
        let (agent, mut rx, tx) = agent_with(
            dir.path(),
            vec![ScriptedProvider::text_response("done without plan")],
        );

        let mut thread = Thread::new();
        agent
            .run_turn(
                &mut thread,
                "refactor a.ts and b.ts across the module boundary",
                &tx,
                &AutoApprove(false),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, AgentEvent::PlanGenerated { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, AgentEvent::PlanConfirmed { approved: false, .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, AgentEvent::Content(t) if t.contains("done without plan"))));
    }

    #[tokio::test]
    async fn cancellation_ends_the_turn_quietly() {
        let dir = tempfile::tempdir().unwrap();
        let (agent, mut rx, tx) = agent_with(
            dir.path(),
            vec![ScriptedProvider::text_response("never consumed")],
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut thread = Thread::new();
        agent
            .run_turn(&mut thread, "anything", &tx, &AutoApprove(false), &cancel)
            .await
            .unwrap();
        let events = drain(&mut rx);
        assert!(matches!(events.last(), Some(AgentEvent::Done)));
    }
}
