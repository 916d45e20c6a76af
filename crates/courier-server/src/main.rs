use anyhow::Context;
use courier::dispatcher::Dispatcher;
use courier::registry::ModelRegistry;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod configuration;
mod error;
mod routes;
mod state;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = configuration::Settings::new()?;

    let registry = ModelRegistry::from_env_or_file(&settings.models.config_path)
        .context("Failed to load the model list")?;
    if registry.is_empty() {
        tracing::warn!("no usable models configured");
    }
    info!(models = registry.len(), excluded = registry.rejected().len(), "model registry ready");

    let dispatcher = Dispatcher::new(settings.chat.into_config()).context("Failed to build the dispatcher")?;
    let state = state::AppState::new(registry, dispatcher);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::configure(state).layer(cors);

    let listener = tokio::net::TcpListener::bind(settings.server.socket_addr()?).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
