use anyhow::Context;
use promptly::{ChatService, CompletionClient, OpenAiProvider, Settings};
use promptly_server::{router, AppState, InMemoryChatStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env().context("reading settings")?;
    let shutdown = CancellationToken::new();

    let provider = OpenAiProvider::new(settings.api_key.clone()).with_api_base(&settings.api_base);
    let client = CompletionClient::from_settings(provider, &settings, shutdown.clone())
        .context("building completion client")?;
    let service = ChatService::new(client, settings.model.clone());
    let state = AppState::new(Arc::new(service), Arc::new(InMemoryChatStore::new()));

    let listener = tokio::net::TcpListener::bind(&settings.bind)
        .await
        .with_context(|| format!("binding {}", settings.bind))?;
    tracing::info!(
        addr = %listener.local_addr()?,
        model = %settings.model,
        deadline = ?settings.deadline,
        embedded_errors = ?settings.embedded_errors,
        "promptly-server listening"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %err, "could not listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutting down");
            shutdown.cancel();
        })
        .await
        .context("serving HTTP")?;
    Ok(())
}
