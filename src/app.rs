use axum::{middleware, Router, routing::get};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use crate::auth::middleware::session_gate;
use crate::config::AppConfig;
use crate::state::AppState;
use crate::{analytics, applications, auth, requests, users};

pub fn build_app(state: AppState) -> Router {
    let mut router = Router::new().nest(
        "/api",
        Router::new()
            .merge(auth::router())
            .merge(requests::router())
            .merge(users::router())
            .merge(applications::router())
            .merge(analytics::router())
            .route("/health", get(|| async { "ok" })),
    );

    // Static admin pages; the session gate below decides who sees them.
    if let Some(dir) = state.config.admin_assets_dir.clone() {
        router = router.nest_service("/admin", ServeDir::new(dir).append_index_html_on_directories(true));
    }

    router
        .layer(middleware::from_fn_with_state(state.clone(), session_gate))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
                        }
                    },
                ),
        )
}

pub async fn bind(config: &AppConfig) -> anyhow::Result<tokio::net::TcpListener> {
    let listener = tokio::net::TcpListener::bind((config.app_host.as_str(), config.app_port)).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    Ok(listener)
}

pub async fn serve(listener: tokio::net::TcpListener, app: Router) -> anyhow::Result<()> {
    axum::serve(listener, app).await?;
    Ok(())
}
