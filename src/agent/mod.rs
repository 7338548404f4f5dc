//! Agent module — model context rebuild, the tool-calling loop, and
//! reply sanitization.

pub mod history;
pub mod orchestrator;
pub mod sanitize;

pub use orchestrator::Orchestrator;
