use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use clubdesk::config::AgentConfig;
use clubdesk::context::ContextResolver;
use clubdesk::delivery::DeliveryDispatcher;
use clubdesk::escalation::EscalationHandler;
use clubdesk::generation::GenerationLoop;
use clubdesk::humanize::Humanizer;
use clubdesk::integrations::{
    BackendGateway, CrmClient, MessengerClient, TelegramNotifier, TrackerClient,
    VectorSearchClient,
};
use clubdesk::llm::LlmClient;
use clubdesk::orchestrator::Orchestrator;
use clubdesk::state::TurnRequest;
use clubdesk::store::SqliteStore;
use clubdesk::tools::docs::{DocumentCache, ReferenceDocsTool};
use clubdesk::tools::knowledge::KnowledgeTool;
use clubdesk::tools::payment::PaymentLinkTool;
use clubdesk::tools::schedule::ScheduleTool;
use clubdesk::tools::ToolRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,clubdesk=debug")),
        )
        .init();

    let request = parse_args().context(
        "usage: clubdesk <sender_id> <message> [source] [channel_id]\n\
         Processes one conversation turn and prints the outcome as JSON.",
    )?;

    let config = AgentConfig::load();
    let orchestrator = build_orchestrator(&config).await?;

    let outcome = orchestrator.process_turn(request).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    Ok(())
}

fn parse_args() -> Result<TurnRequest> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let sender_id = args.first().context("missing sender_id")?.clone();
    let message = args.get(1).context("missing message")?.clone();
    let source = args.get(2).cloned().unwrap_or_else(|| "whatsapp".to_string());
    let channel_id = args.get(3).cloned().unwrap_or_default();

    Ok(TurnRequest {
        thread_id: sender_id.clone(),
        sender_id,
        message,
        source,
        channel_id,
    })
}

async fn build_orchestrator(config: &AgentConfig) -> Result<Orchestrator> {
    let backend = Arc::new(BackendGateway::new(config));
    let model = Arc::new(LlmClient::new(config));
    let clubs = config.club_directory();

    let registry = Arc::new(ToolRegistry::new(config.tool_output_max_chars));
    registry
        .register(Arc::new(ScheduleTool::new(backend.clone(), clubs.clone())))
        .await;
    registry
        .register(Arc::new(KnowledgeTool::new(Arc::new(
            VectorSearchClient::new(config),
        ))))
        .await;
    registry
        .register(Arc::new(PaymentLinkTool::new(backend.clone())))
        .await;
    registry
        .register(Arc::new(ReferenceDocsTool::new(Arc::new(
            DocumentCache::new(backend.clone()),
        ))))
        .await;

    let store = Arc::new(
        SqliteStore::new(&config.database_path)
            .with_context(|| format!("Failed to open store at {}", config.database_path))?,
    );

    Ok(Orchestrator::new(
        ContextResolver::new(backend.clone(), clubs),
        GenerationLoop::new(model.clone(), registry, config.max_iterations as u32),
        Humanizer::new(model, config.reply_max_chars),
        DeliveryDispatcher::new(Arc::new(MessengerClient::new(config)), backend),
        EscalationHandler::new(
            Arc::new(TelegramNotifier::new(config)),
            Arc::new(TrackerClient::new(config)),
            Arc::new(CrmClient::new(config)),
            config.fallback_managers_chat,
        ),
        store,
        config.history_window,
    ))
}
