use anyhow::{Context, Result};
use casc::analysis::{HttpFaceAnalyzer, HttpVisionAnalyzer};
use casc::api::{AppState, RestApi};
use casc::llm::{ChatCompletionsClient, LlmClient};
use casc::messaging::alerts::requires_alert;
use casc::messaging::{
    create_message_broker, format_alert, EventCreatedPayload, EventMessage, EventType,
    MessageBrokerTrait,
};
use casc::{config, db, ConversationManager, EventPipeline, Monitor, TestPatternSource};
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

async fn run_app() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("CASC_CONFIG").ok())
        .map(PathBuf::from);

    let mut config = config::load_config(config_path.as_deref())?;
    config.apply_env();

    // Initialize logging, RUST_LOG wins over the configured level
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.api.log_level.as_str()),
    )
    .init();
    info!("Starting CASC security monitor");

    config.validate().context("Invalid configuration")?;
    info!("Configuration loaded");

    let store = db::open_store(&config.database).await?;

    let http = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;
    let vision = Arc::new(HttpVisionAnalyzer::new(
        http.clone(),
        config.analysis.vision_url.clone(),
    ));
    let face = Arc::new(HttpFaceAnalyzer::new(
        http.clone(),
        config.analysis.face_url.clone(),
    ));
    if config.llm.api_key.is_empty() {
        warn!("No LLM API key configured");
    }
    let llm: Arc<dyn LlmClient> = Arc::new(ChatCompletionsClient::new(http, config.llm.clone()));

    // Create and initialize message broker
    let message_broker = create_message_broker();
    let mut subscriptions = Vec::new();
    let alerts = message_broker
        .subscribe(
            EventType::EventCreated,
            Arc::new(|message: EventMessage| -> Result<()> {
                let payload: EventCreatedPayload = serde_json::from_value(message.payload)?;
                if requires_alert(&payload) {
                    warn!("{}", format_alert(&payload));
                } else {
                    info!("Event {}: {}", payload.event_id, payload.summary);
                }
                Ok(())
            }),
        )
        .await?;
    subscriptions.push(alerts);

    // Trigger audit trail, including triggers dropped while busy
    let motion_audit = message_broker
        .subscribe_pattern(
            "motion.#",
            Arc::new(|message: EventMessage| -> Result<()> {
                debug!("{} at {}: {}", message.event_type, message.timestamp, message.payload);
                Ok(())
            }),
        )
        .await?;
    subscriptions.push(motion_audit);
    info!("Message broker initialized");

    if let Err(e) = message_broker
        .publish(
            EventType::SystemStartup,
            None,
            serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }),
        )
        .await
    {
        warn!("Failed to publish system startup event: {}", e);
    }

    let shutdown = CancellationToken::new();

    let pipeline = Arc::new(
        EventPipeline::new(&config, vision, face, llm.clone(), store.clone())
            .with_broker(message_broker.clone())
            .with_cancellation(shutdown.child_token()),
    );
    let conversations = Arc::new(
        ConversationManager::new(store.clone(), llm, &config.conversation)
            .with_broker(message_broker.clone()),
    );

    let source = Box::new(TestPatternSource::new(&config.camera));
    let monitor = Monitor::new(source, &config.motion, pipeline.clone())
        .with_broker(message_broker.clone());
    let monitor_task = tokio::spawn(monitor.run(shutdown.clone()));

    let http_server = RestApi::new(
        &config.api,
        AppState {
            store,
            conversations,
            pipeline,
        },
    );
    let api_shutdown = shutdown.clone();
    let api_task = tokio::spawn(async move { http_server.run(api_shutdown).await });

    // Wait for termination signals
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    shutdown.cancel();

    let stats = match monitor_task.await {
        Ok(Ok(stats)) => Some(stats),
        Ok(Err(e)) => {
            error!("Monitor failed: {}", e);
            None
        }
        Err(e) => {
            error!("Monitor task panicked: {}", e);
            None
        }
    };

    match api_task.await {
        Ok(Err(e)) => error!("API server error: {}", e),
        Err(e) => error!("API server task panicked: {}", e),
        Ok(Ok(())) => {}
    }

    // Publish a system shutdown event
    if let Err(e) = message_broker
        .publish(
            EventType::SystemShutdown,
            None,
            serde_json::json!({"reason": "Normal shutdown", "monitor": stats}),
        )
        .await
    {
        error!("Failed to publish shutdown event: {}", e);
    }

    for subscription in subscriptions {
        if let Err(e) = message_broker.unsubscribe(&subscription).await {
            warn!("Failed to unsubscribe {}: {}", subscription, e);
        }
    }

    Ok(())
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run_app()) {
        eprintln!("Application error: {:#}", e);
        std::process::exit(1);
    }
}
