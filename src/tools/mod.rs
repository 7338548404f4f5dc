//! Agent tool surface: typed invocations, their schemas, and execution.

pub mod invocation;
pub mod landed_cost;
pub mod toolbox;

pub use invocation::{ToolInvocation, tool_schemas};
pub use toolbox::{ToolOutcome, Toolbox};
