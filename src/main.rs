use std::{path::Path, sync::Arc};

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use causal_lm_service::{
    AppConfig, ModelRegistry, build_router, config::load_env_file, model::load_model,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    match load_env_file(Path::new(".env")) {
        Ok(true) => tracing::info!("loaded .env"),
        Ok(false) => {}
        Err(err) => tracing::warn!(%err, "ignoring unreadable .env"),
    }

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!(model = %config.model_name, "loading model");

    let loaded = match load_model(config.as_ref()) {
        Ok(loaded) => loaded,
        Err(err) => {
            tracing::error!(model = %config.model_name, %err, "failed to load model");
            tracing::error!(
                "make sure the model is reachable (network or MODEL_DIR) and the model name is correct"
            );
            return Err(err.into());
        }
    };
    let registry = Arc::new(ModelRegistry::initialize(config.as_ref(), loaded)?);
    let router = build_router(config.clone(), registry);

    let listener = TcpListener::bind(config.bind_address()).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "REST server ready");

    axum::serve(listener, router).await?;

    Ok(())
}

fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,hyper=warn,axum::rejection=trace".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
