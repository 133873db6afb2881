pub mod final_answer;
mod tool;
pub mod toolbox;

pub use final_answer::{FinalAnswerTool, FINAL_ANSWER_TOOL};
pub use tool::{FunctionDescriptor, Tool, ToolDescriptor};
pub use toolbox::ToolBox;
