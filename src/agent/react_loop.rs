//! The ReAct (reason, act, observe) loop.
//!
//! Each step replays the run's memory to the model, parses the tool calls it
//! asks for, executes them concurrently and records the observations. The loop
//! stops when `final_answer` is called, a step or budget limit is reached, the
//! run is interrupted, or every configured model has failed.

use crate::agent::action::parse_action;
use crate::agent::executor::ToolExecutor;
use crate::agent::result::{RunOutcome, RunResult};
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::events::{AgentEvent, EventBus};
use crate::llm::{GenerationConfig, Model, TokenCounter};
use crate::memory::{ActionStep, LoopPhase, Memory, StepError, ToolOutput};
use crate::resilience::{ModelReliability, ReliabilitySession};
use crate::tools::{Tool, ToolBox, ToolDescriptor, FINAL_ANSWER_TOOL};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert assistant who solves tasks step by step using tools. \
At each step, think about what to do next, then call one or more of the available tools. \
Tool results are returned to you as observations. \
When you know the answer, call the final_answer tool with it. \
If your model does not support native tool calls, reply with a single JSON object of the form \
{\"name\": \"<tool name>\", \"arguments\": {...}}.";

/// Shared flag that stops a run at the next step boundary
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle(Arc<AtomicBool>);

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A step that ended the run because no model could answer
struct FailedStep {
    step: ActionStep,
    error: AgentError,
}

pub struct ReActLoop {
    reliability: ModelReliability,
    executor: ToolExecutor,
    descriptors: Vec<ToolDescriptor>,
    config: AgentConfig,
    generation: GenerationConfig,
    memory: Memory,
    events: EventBus,
    interrupt: InterruptHandle,
    token_counter: Option<Arc<TokenCounter>>,
}

impl ReActLoop {
    /// Loop over a single model with default settings
    pub fn new(model: Arc<dyn Model>) -> Result<Self> {
        Self::builder(ModelReliability::new(model)).build()
    }

    pub fn builder(reliability: ModelReliability) -> ReActLoopBuilder {
        ReActLoopBuilder::new(reliability)
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn toolbox(&self) -> &ToolBox {
        self.executor.toolbox()
    }

    pub fn reliability(&self) -> &ModelReliability {
        &self.reliability
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Run `task` to completion.
    ///
    /// Only invalid input is reported as `Err`. Every other way a run can end,
    /// including total model failure, is described by the returned
    /// [`RunResult`].
    pub async fn run(&mut self, task: impl Into<String>) -> Result<RunResult> {
        let task = task.into();
        if task.trim().is_empty() {
            return Err(AgentError::ConfigError("task must not be empty".into()));
        }

        let run_id = Uuid::new_v4();
        let started = Instant::now();
        self.interrupt.clear();
        self.memory.start_task(task.clone());
        let mut session = self.reliability.start_session();

        info!(%run_id, max_steps = self.config.max_steps, "Starting task");
        self.events.emit(AgentEvent::TaskStarted {
            run_id,
            task: task.clone(),
        });

        let mut outcome = RunOutcome::MaxStepsReached;
        let mut final_output = None;
        let mut error = None;

        for step_number in 1..=self.config.max_steps {
            if let Some(stop) = self.budget_exceeded(started) {
                outcome = stop;
                break;
            }

            self.events.emit(AgentEvent::StepStarted {
                run_id,
                step_number,
            });

            let (step, failure) = match self.step(run_id, step_number, &mut session).await {
                Ok(step) => (step, None),
                Err(FailedStep { step, error }) => (step, Some(error)),
            };

            let answer = step.final_output.clone();
            self.memory.push(step.clone())?;
            self.events.emit(AgentEvent::StepCompleted {
                run_id,
                step: Box::new(step),
            });

            if let Some(failure) = failure {
                warn!(%run_id, step_number, error = %failure, "No model could complete the step");
                outcome = RunOutcome::Error;
                error = Some(failure.to_string());
                break;
            }

            if let Some(answer) = answer {
                outcome = RunOutcome::Success;
                final_output = Some(answer);
                break;
            }
        }

        let token_usage = self.memory.total_token_usage();
        let result = RunResult {
            run_id,
            task,
            outcome,
            final_output,
            error,
            token_usage,
            steps: self.memory.steps().to_vec(),
            duration_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            %run_id,
            outcome = ?result.outcome,
            steps = result.step_count(),
            total_tokens = token_usage.total(),
            "Task finished"
        );
        self.events.emit(AgentEvent::TaskCompleted {
            run_id,
            outcome: result.outcome,
            final_output: result.final_output.clone(),
            steps: result.step_count(),
            token_usage,
        });

        Ok(result)
    }

    fn budget_exceeded(&self, started: Instant) -> Option<RunOutcome> {
        if self.interrupt.is_interrupted() {
            info!("Run interrupted");
            return Some(RunOutcome::Interrupted);
        }

        if let Some(limit) = self.config.max_duration() {
            if started.elapsed() >= limit {
                warn!(limit_secs = limit.as_secs(), "Time budget exceeded");
                return Some(RunOutcome::TimeBudgetExceeded);
            }
        }

        if let Some(limit) = self.config.max_total_tokens {
            let used = self.memory.total_token_usage().total();
            if used >= limit {
                warn!(used, limit, "Token budget exceeded");
                return Some(RunOutcome::TokenBudgetExceeded);
            }
        }

        None
    }

    async fn step(
        &self,
        run_id: Uuid,
        step_number: usize,
        session: &mut ReliabilitySession,
    ) -> std::result::Result<ActionStep, FailedStep> {
        let mut step = ActionStep::new(step_number);

        debug!(step_number, phase = ?LoopPhase::Generate, "Entering phase");
        let messages = self.memory.to_messages();
        let generation = match self
            .reliability
            .generate(session, &messages, &self.descriptors, &self.generation, &self.events)
            .await
        {
            Ok(generation) => generation,
            Err(error) => {
                step.error = Some(StepError::new(LoopPhase::Generate, error.to_string()));
                step.timing.finish();
                return Err(FailedStep { step, error });
            }
        };

        let response = generation.response;
        step.model_id = Some(generation.model_id);
        step.model_output = response.content.clone();
        step.token_usage = response
            .token_usage
            .or_else(|| {
                self.token_counter
                    .as_ref()
                    .map(|counter| counter.estimate_usage(&messages, &response))
            })
            .unwrap_or_default();

        debug!(step_number, phase = ?LoopPhase::Parse, "Entering phase");
        let calls = match parse_action(&response) {
            Ok(calls) => calls,
            Err(error) => {
                warn!(step_number, error = %error, "Could not parse an action");
                step.error = Some(StepError::new(LoopPhase::Parse, error.to_string()));
                step.timing.finish();
                return Ok(step);
            }
        };
        step.tool_calls = calls.clone();

        debug!(step_number, phase = ?LoopPhase::Execute, calls = calls.len(), "Entering phase");
        let outcomes = self.executor.execute_all(&calls).await;

        debug!(step_number, phase = ?LoopPhase::Evaluate, "Entering phase");
        let mut failures = Vec::new();
        for outcome in outcomes {
            let error = outcome.result.as_ref().err().map(|e| e.to_string());
            self.events.emit(AgentEvent::ToolCallCompleted {
                run_id,
                step_number,
                tool: outcome.call.name.clone(),
                duration_ms: outcome.duration.as_millis() as u64,
                error: error.clone(),
            });

            let (content, is_error) = match outcome.result {
                Ok(value) => {
                    let text = value_text(&value);
                    if outcome.call.name == FINAL_ANSWER_TOOL {
                        step.final_output = Some(value);
                    }
                    (text, false)
                }
                Err(e) => {
                    failures.push(format!("{}: {}", outcome.call.name, e));
                    (format!("Error: {}", e), true)
                }
            };

            step.tool_outputs.push(ToolOutput {
                tool_call_id: outcome.call.id,
                name: outcome.call.name,
                content,
                is_error,
            });
        }

        step.observations = Some(
            step.tool_outputs
                .iter()
                .map(|o| format!("{}: {}", o.name, o.content))
                .collect::<Vec<_>>()
                .join("\n"),
        );
        if !failures.is_empty() {
            step.error = Some(StepError::new(LoopPhase::Execute, failures.join("\n")));
        }

        step.timing.finish();
        Ok(step)
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Builder for [`ReActLoop`]
pub struct ReActLoopBuilder {
    reliability: ModelReliability,
    tools: Vec<Arc<dyn Tool>>,
    config: AgentConfig,
    max_tokens: Option<usize>,
    events: Option<EventBus>,
    token_counter: Option<Arc<TokenCounter>>,
}

impl ReActLoopBuilder {
    fn new(reliability: ModelReliability) -> Self {
        Self {
            reliability,
            tools: Vec::new(),
            config: AgentConfig::default(),
            max_tokens: None,
            events: None,
            token_counter: None,
        }
    }

    /// Tools available to the model; `final_answer` is always added
    pub fn tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.tools = tools;
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the maximum number of steps (default: 20)
    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.config.max_steps = max_steps;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    /// Output token limit for each model call
    pub fn max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Publish events on an existing bus
    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Estimate usage with `counter` when a model does not report it
    pub fn token_counter(mut self, counter: Arc<TokenCounter>) -> Self {
        self.token_counter = Some(counter);
        self
    }

    pub fn build(self) -> Result<ReActLoop> {
        self.config.validate()?;

        let toolbox = ToolBox::from_tools(self.tools)?;
        let descriptors = toolbox.descriptors();
        let system_prompt = render_system_prompt(
            self.config.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT),
            &descriptors,
        );

        let mut generation = GenerationConfig {
            temperature: self.config.temperature,
            ..Default::default()
        };
        if let Some(max_tokens) = self.max_tokens {
            generation.max_tokens = max_tokens;
        }

        Ok(ReActLoop {
            reliability: self.reliability,
            executor: ToolExecutor::new(toolbox, self.config.max_tool_threads),
            descriptors,
            generation,
            memory: Memory::new(system_prompt),
            events: self.events.unwrap_or_default(),
            interrupt: InterruptHandle::default(),
            token_counter: self.token_counter,
            config: self.config,
        })
    }
}

fn render_system_prompt(base: &str, descriptors: &[ToolDescriptor]) -> String {
    let tools = descriptors
        .iter()
        .map(|d| format!("- {}: {}", d.name(), d.function.description))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{}\n\nAvailable tools:\n{}", base, tools)
}
