#[macro_use]
mod macros;

mod analytics;
mod app;
mod applications;
mod auth;
mod config;
mod error;
mod events;
mod requests;
mod response;
mod state;
mod store;
mod users;

#[cfg(test)]
mod test_support;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "vrdash=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let app_state = state::AppState::init().await?;
    tracing::info!(
        backend = ?app_state.config.store_backend,
        events = %app_state.events.path().display(),
        "state ready"
    );

    let listener = app::bind(&app_state.config).await?;
    app::serve(listener, app::build_app(app_state)).await
}
