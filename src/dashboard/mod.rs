//! Read-only web dashboard for monitoring the queue.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::Html,
    routing::get,
};
use sqlx::SqlitePool;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};

use crate::schema::{Job, MetricsSummary};
use crate::storage;

/// Serve the dashboard at `addr` until the process exits.
pub async fn serve(addr: SocketAddr, pool: SqlitePool) -> anyhow::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/api/jobs", get(list_jobs_handler))
        .route("/api/stats", get(stats_handler))
        .layer(cors)
        .with_state(pool);

    tracing::info!(%addr, "dashboard listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(include_str!("index.html"))
}

async fn list_jobs_handler(
    State(pool): State<SqlitePool>,
) -> Result<Json<Vec<Job>>, (StatusCode, String)> {
    let jobs = storage::list(&pool, &[], 100, 0, true)
        .await
        .map_err(internal_error)?;

    Ok(Json(jobs))
}

async fn stats_handler(
    State(pool): State<SqlitePool>,
) -> Result<Json<MetricsSummary>, (StatusCode, String)> {
    let summary = storage::metrics(&pool).await.map_err(internal_error)?;

    Ok(Json(summary))
}

fn internal_error(error: sqlx::Error) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
}
