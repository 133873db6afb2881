//! Agent lifecycle events and the bus that delivers them.
//!
//! Subscribers are plain callbacks. Emission is synchronous: every subscriber
//! sees events in emission order before `emit` returns. A subscriber that panics
//! is logged and skipped; it never takes the run down with it.

use crate::agent::RunOutcome;
use crate::llm::TokenUsage;
use crate::memory::ActionStep;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    TaskStarted {
        run_id: Uuid,
        task: String,
    },
    StepStarted {
        run_id: Uuid,
        step_number: usize,
    },
    ModelRetry {
        model_id: String,
        attempt: usize,
        delay_ms: u64,
        error: String,
    },
    ModelFallback {
        from_model: String,
        to_model: Option<String>,
        error: String,
    },
    CircuitOpened {
        service: String,
    },
    ToolCallCompleted {
        run_id: Uuid,
        step_number: usize,
        tool: String,
        duration_ms: u64,
        error: Option<String>,
    },
    StepCompleted {
        run_id: Uuid,
        step: Box<ActionStep>,
    },
    TaskCompleted {
        run_id: Uuid,
        outcome: RunOutcome,
        final_output: Option<Value>,
        steps: usize,
        token_usage: TokenUsage,
    },
}

impl AgentEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AgentEvent::TaskStarted { .. } => "task_started",
            AgentEvent::StepStarted { .. } => "step_started",
            AgentEvent::ModelRetry { .. } => "model_retry",
            AgentEvent::ModelFallback { .. } => "model_fallback",
            AgentEvent::CircuitOpened { .. } => "circuit_opened",
            AgentEvent::ToolCallCompleted { .. } => "tool_call_completed",
            AgentEvent::StepCompleted { .. } => "step_completed",
            AgentEvent::TaskCompleted { .. } => "task_completed",
        }
    }
}

/// An event as kept in the bus history
#[derive(Debug, Clone, Serialize)]
pub struct RecordedEvent {
    pub timestamp: DateTime<Utc>,
    pub event: AgentEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type EventCallback = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

struct BusInner {
    subscribers: Mutex<Vec<(SubscriptionId, EventCallback)>>,
    next_id: AtomicU64,
    history: Mutex<VecDeque<RecordedEvent>>,
    history_limit: usize,
}

/// Cloneable handle to a shared set of event subscribers
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_history(0)
    }

    /// Bus that also keeps the most recent `limit` events
    pub fn with_history(limit: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                history: Mutex::new(VecDeque::new()),
                history_limit: limit,
            }),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        id
    }

    /// Remove a subscriber. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.inner.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn emit(&self, event: AgentEvent) {
        // Snapshot so callbacks may subscribe or unsubscribe without deadlocking
        let subscribers: Vec<EventCallback> = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();

        for callback in subscribers {
            if catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                error!(event = event.name(), "Event subscriber panicked");
            }
        }

        if self.inner.history_limit > 0 {
            let mut history = self.inner.history.lock().unwrap_or_else(|e| e.into_inner());
            if history.len() == self.inner.history_limit {
                history.pop_front();
            }
            history.push_back(RecordedEvent {
                timestamp: Utc::now(),
                event,
            });
        }
    }

    pub fn history(&self) -> Vec<RecordedEvent> {
        self.inner
            .history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
