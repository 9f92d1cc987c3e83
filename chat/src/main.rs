use anyhow::Context;
use argus_chat::config::ChatConfig;
use argus_chat::llm::OllamaClient;
use argus_chat::server::{self, AppState};
use argus_chat::session::SessionStore;
use argus_chat::turn::TurnRunner;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ChatConfig::from_env()?;
    let client = OllamaClient::new(&config)?;
    info!(
        model = client.model(),
        host = %config.ollama_host,
        log = ?config.log_path,
        history = config.with_history,
        "chat backend configured"
    );

    let sessions = SessionStore::new(config.session_idle, config.max_sessions);
    let sweeper = sessions.clone();
    let sweep_every = config.session_idle.min(Duration::from_secs(60));
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(sweep_every).await;
            sweeper.sweep().await;
        }
    });

    let state = AppState {
        sessions,
        runner: TurnRunner::new(client, config.log_path.clone(), config.with_history),
    };
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!("Argus chat running at http://{}", config.bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("received shutdown signal, stopping");
        })
        .await?;
    Ok(())
}
