//! The agent: a ReAct loop over tools and reliable models.

pub mod action;
pub mod executor;
pub mod react_loop;
mod result;

pub use action::parse_action;
pub use executor::{ToolExecutor, ToolOutcome};
pub use react_loop::{InterruptHandle, ReActLoop, ReActLoopBuilder, DEFAULT_SYSTEM_PROMPT};
pub use result::{RunOutcome, RunResult};
