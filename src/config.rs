//! Configuration types.

use std::time::Duration;

/// System instruction sent to the model on every orchestrator run.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are SendCat's shopping concierge and freight-forwarding assistant for Jamaican shoppers. \
Be conversational and helpful like a store clerk. \
Use the conversation history to understand what the user means. \
Use the search tools to find products, and the landed cost tool when the user asks about \
total cost to Jamaica. If the request is missing the product, ask ONE short clarifying question \
instead of searching. \
Do not mention internal tool calls or JSON. \
IMPORTANT: Output plain text only. Do not use Markdown formatting (no # headings, no bullet '-' \
lists, no **bold**, no backticks). If you include lists, use short sentences separated by line \
breaks, and use the '\u{2022}' character for bullets.";

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the libSQL database file.
    pub db_path: String,
    /// HTTP listen port.
    pub port: u16,
    /// Maximum model/tool iterations per job before forcing completion.
    pub max_tool_iterations: usize,
    /// Conversation turns replayed into model context (each turn = user + assistant).
    pub history_turns: usize,
    /// Overall deadline for one orchestrator run.
    pub job_deadline: Duration,
    /// Search result cache TTL.
    pub search_cache_ttl: Duration,
    /// Per-call timeout for search provider requests.
    pub search_timeout: Duration,
    /// Per-call timeout for push delivery.
    pub push_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: "./data/sendcat-agent.db".to_string(),
            port: 8080,
            max_tool_iterations: 5,
            history_turns: 6,
            job_deadline: Duration::from_secs(120),
            search_cache_ttl: Duration::from_secs(20 * 60),
            search_timeout: Duration::from_secs(10),
            push_timeout: Duration::from_secs(10),
        }
    }
}

impl EngineConfig {
    /// Build from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            db_path: std::env::var("SENDCAT_DB_PATH").unwrap_or(defaults.db_path),
            port: env_parse("SENDCAT_PORT", defaults.port),
            max_tool_iterations: env_parse(
                "SENDCAT_MAX_TOOL_ITERATIONS",
                defaults.max_tool_iterations,
            ),
            history_turns: env_parse("SENDCAT_HISTORY_TURNS", defaults.history_turns),
            job_deadline: Duration::from_secs(env_parse(
                "SENDCAT_JOB_DEADLINE_SECS",
                defaults.job_deadline.as_secs(),
            )),
            search_cache_ttl: Duration::from_secs(env_parse(
                "SEARCH_CACHE_TTL_SECS",
                defaults.search_cache_ttl.as_secs(),
            )),
            search_timeout: Duration::from_millis(env_parse(
                "SEARCH_TIMEOUT_MS",
                defaults.search_timeout.as_millis() as u64,
            )),
            push_timeout: Duration::from_millis(env_parse(
                "SENDCAT_PUSH_TIMEOUT_MS",
                defaults.push_timeout.as_millis() as u64,
            )),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
