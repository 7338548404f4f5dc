//! SendCat Agent — async shopping-agent job engine.

pub mod agent;
pub mod config;
pub mod error;
pub mod http;
pub mod jobs;
pub mod llm;
pub mod notify;
pub mod search;
pub mod store;
pub mod tools;
