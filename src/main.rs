use std::sync::Arc;

use sendcat_agent::agent::Orchestrator;
use sendcat_agent::config::EngineConfig;
use sendcat_agent::http::{AppState, api_routes};
use sendcat_agent::jobs::JobDispatcher;
use sendcat_agent::llm::{LlmConfig, create_provider};
use sendcat_agent::notify::{HttpPushTransport, Notifier};
use sendcat_agent::search::{EbayClient, EbayConfig, ExaClient, ExaConfig, SearchService};
use sendcat_agent::store::{Database, LibSqlBackend};
use sendcat_agent::tools::Toolbox;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = EngineConfig::from_env();

    eprintln!("🐱 SendCat Agent v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Jobs API: http://0.0.0.0:{}/api/agent/jobs", config.port);
    eprintln!("   Health:   http://0.0.0.0:{}/health", config.port);

    // ── LLM ──────────────────────────────────────────────────────────────
    let llm_config = LlmConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        eprintln!("  export OPENROUTER_API_KEY=sk-or-...");
        std::process::exit(1);
    });
    let llm = create_provider(&llm_config)?;
    eprintln!("   Model: {}", llm_config.model);

    // ── Database ─────────────────────────────────────────────────────────
    let db_path_ref = std::path::Path::new(&config.db_path);
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(db_path_ref)
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {}: {}", config.db_path, e);
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {}", config.db_path);

    // ── Search providers ─────────────────────────────────────────────────
    let mut search = SearchService::new(
        Arc::clone(&db),
        config.search_cache_ttl,
        config.search_timeout,
    );
    let mut active_providers = Vec::new();
    match EbayConfig::from_env() {
        Ok(ebay_config) => {
            search.register(Arc::new(EbayClient::new(&ebay_config)?));
            active_providers.push("ebay");
        }
        Err(e) => eprintln!("   Warning: eBay search disabled ({})", e),
    }
    match ExaConfig::from_env() {
        Ok(exa_config) => {
            search.register(Arc::new(ExaClient::new(&exa_config)?));
            active_providers.push("exa");
        }
        Err(e) => eprintln!("   Warning: web search disabled ({})", e),
    }
    eprintln!(
        "   Search: {}",
        if active_providers.is_empty() {
            "none".to_string()
        } else {
            active_providers.join(", ")
        }
    );
    let toolbox = Arc::new(Toolbox::new(Arc::new(search)));

    // ── Push notifications ───────────────────────────────────────────────
    let transport = Arc::new(HttpPushTransport::new(config.push_timeout)?);
    let notifier = Arc::new(Notifier::new(Arc::clone(&db), transport));

    // ── Orchestrator + dispatcher ────────────────────────────────────────
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&db),
        llm,
        toolbox,
        notifier,
        config.clone(),
    ));
    let dispatcher = Arc::new(JobDispatcher::new(Arc::clone(&db), orchestrator));

    // ── HTTP server ──────────────────────────────────────────────────────
    let app = api_routes(AppState { db, dispatcher });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(port = config.port, "SendCat agent engine started");
    eprintln!("   Listening on 0.0.0.0:{}\n", config.port);
    axum::serve(listener, app).await?;

    Ok(())
}
