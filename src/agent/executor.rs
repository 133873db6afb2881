//! Concurrent execution of the tool calls made in one step.

use crate::error::{AgentError, Result};
use crate::llm::ToolCall;
use crate::tools::ToolBox;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Outcome of one tool call
#[derive(Debug)]
pub struct ToolOutcome {
    pub call: ToolCall,
    pub result: Result<Value>,
    pub duration: Duration,
}

/// Runs tool calls on the blocking pool, at most `max_threads` at a time.
///
/// Results come back in the order the calls were made, whatever order they
/// finish in.
#[derive(Clone)]
pub struct ToolExecutor {
    toolbox: ToolBox,
    permits: Arc<Semaphore>,
    max_threads: usize,
}

impl ToolExecutor {
    pub fn new(toolbox: ToolBox, max_threads: usize) -> Self {
        let max_threads = max_threads.max(1);
        Self {
            toolbox,
            permits: Arc::new(Semaphore::new(max_threads)),
            max_threads,
        }
    }

    pub fn toolbox(&self) -> &ToolBox {
        &self.toolbox
    }

    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    pub async fn execute_all(&self, calls: &[ToolCall]) -> Vec<ToolOutcome> {
        let runs = calls.iter().cloned().map(|call| self.execute(call));
        futures::future::join_all(runs).await
    }

    async fn execute(&self, call: ToolCall) -> ToolOutcome {
        let started = Instant::now();

        let result = match self.toolbox.get(&call.name) {
            None => {
                warn!(tool = %call.name, "Model called an unknown tool");
                Err(AgentError::UnknownTool(format!(
                    "{}. Available tools: {}",
                    call.name,
                    self.toolbox.names().join(", ")
                )))
            }
            Some(tool) => match self.permits.clone().acquire_owned().await {
                Err(_) => Err(AgentError::ToolError("tool pool is closed".into())),
                Ok(permit) => {
                    let arguments = call.arguments.clone();
                    debug!(tool = %call.name, "Running tool");
                    let joined = tokio::task::spawn_blocking(move || {
                        let _permit = permit;
                        tool.run(&arguments)
                    })
                    .await;
                    match joined {
                        Ok(result) => result,
                        Err(e) => Err(AgentError::ToolError(format!("{} panicked: {}", call.name, e))),
                    }
                }
            },
        };

        ToolOutcome {
            call,
            result,
            duration: started.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::tool_call;
    use crate::tools::{Tool, ToolDescriptor};
    use serde_json::{json, Map};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SlowTool {
        name: &'static str,
        delay: Duration,
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Tool for SlowTool {
        fn run(&self, args: &Map<String, Value>) -> Result<Value> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(args.get("id").cloned().unwrap_or(Value::Null))
        }

        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor::function(self.name, "sleeps", json!({}))
        }
    }

    struct PanickingTool;

    impl Tool for PanickingTool {
        fn run(&self, _args: &Map<String, Value>) -> Result<Value> {
            panic!("tool bug")
        }

        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor::function("explode", "panics", json!({}))
        }
    }

    fn slow_toolbox(peak: Arc<AtomicUsize>) -> ToolBox {
        let running = Arc::new(AtomicUsize::new(0));
        ToolBox::from_tools(vec![
            Arc::new(SlowTool {
                name: "slow",
                delay: Duration::from_millis(50),
                running: running.clone(),
                peak: peak.clone(),
            }),
            Arc::new(SlowTool {
                name: "fast",
                delay: Duration::from_millis(1),
                running,
                peak,
            }),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_results_keep_call_order() {
        let executor = ToolExecutor::new(slow_toolbox(Arc::new(AtomicUsize::new(0))), 4);
        let calls = vec![
            tool_call("slow", json!({"id": 1})),
            tool_call("fast", json!({"id": 2})),
            tool_call("slow", json!({"id": 3})),
        ];

        let outcomes = executor.execute_all(&calls).await;

        let ids: Vec<Value> = outcomes.iter().map(|o| o.result.as_ref().unwrap().clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);
        assert_eq!(outcomes[1].call.id, calls[1].id);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let peak = Arc::new(AtomicUsize::new(0));
        let executor = ToolExecutor::new(slow_toolbox(peak.clone()), 2);
        let calls: Vec<_> = (0..6).map(|i| tool_call("slow", json!({"id": i}))).collect();

        let outcomes = executor.execute_all(&calls).await;

        assert_eq!(outcomes.len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_reported_without_stopping_others() {
        let executor = ToolExecutor::new(slow_toolbox(Arc::new(AtomicUsize::new(0))), 2);
        let calls = vec![tool_call("missing", json!({})), tool_call("fast", json!({"id": 7}))];

        let outcomes = executor.execute_all(&calls).await;

        assert!(matches!(outcomes[0].result, Err(AgentError::UnknownTool(_))));
        assert_eq!(outcomes[1].result.as_ref().unwrap(), &json!(7));
    }

    #[tokio::test]
    async fn test_panicking_tool_becomes_error() {
        let toolbox = ToolBox::from_tools(vec![Arc::new(PanickingTool)]).unwrap();
        let executor = ToolExecutor::new(toolbox, 1);

        let outcomes = executor.execute_all(&[tool_call("explode", json!({}))]).await;

        assert!(matches!(outcomes[0].result, Err(AgentError::ToolError(_))));
    }
}
