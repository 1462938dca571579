//! Procura Workflow Orchestration Service
//!
//! HTTP surface over BOM runs: start, status, review resolution, resume,
//! cancel and draft purchase orders.

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use procura_models::{PoDraft, ReviewDecision, ReviewRequest};
use procura_utils::{init_logging, validate_model, AppConfig, BomFormat, BomSource, ErrorResponse, ProcuraError};
use procura_workflow::{build_service, RunService, RunSnapshot};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    config.validate()?;
    init_logging(&config.logging)?;
    info!("Starting Procura Workflow Orchestration Service");

    let service = build_service(&config).await?;

    let app = Router::new()
        .route("/health", get(health_check))
        // Runs
        .route("/api/v1/runs", post(start_run))
        .route("/api/v1/runs", get(list_runs))
        .route("/api/v1/runs/:id", get(get_run))
        .route("/api/v1/runs/:id/resume", post(resume_run))
        .route("/api/v1/runs/:id/cancel", post(cancel_run))
        // Reviews
        .route("/api/v1/runs/:id/reviews", get(list_reviews))
        .route("/api/v1/reviews/:id", post(resolve_review))
        // Purchase orders
        .route("/api/v1/runs/:id/purchase-orders", get(list_purchase_orders))
        .layer(TraceLayer::new_for_http())
        .with_state(service);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = TcpListener::bind(&addr).await?;
    info!("Workflow Orchestration Service listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(error: ProcuraError) -> ApiError {
    let status = StatusCode::from_u16(error.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorResponse::from(error)))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "workflow-orchestration",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

// ===== Run Endpoints =====

#[derive(Debug, Deserialize, Validate)]
pub struct StartRunQuery {
    #[validate(length(min = 1, max = 255, message = "BOM name must be between 1 and 255 characters"))]
    pub bom_name: String,
    #[validate(length(min = 1, max = 255, message = "Filename must be between 1 and 255 characters"))]
    pub filename: String,
}

async fn start_run(
    State(service): State<RunService>,
    Query(query): Query<StartRunQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<RunSnapshot>), ApiError> {
    validate_model(&query).map_err(error_response)?;

    let mut source = BomSource::new(query.filename.clone(), body.to_vec());
    if let Some(format) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(BomFormat::from_content_type)
    {
        source = source.with_format(format);
    }

    let run = service.start(&query.bom_name, source).await.map_err(error_response)?;

    Ok((StatusCode::ACCEPTED, Json(run)))
}

async fn list_runs(State(service): State<RunService>) -> Result<Json<Vec<RunSnapshot>>, ApiError> {
    let runs = service.list().await.map_err(error_response)?;

    Ok(Json(runs))
}

async fn get_run(
    State(service): State<RunService>,
    Path(id): Path<Uuid>,
) -> Result<Json<RunSnapshot>, ApiError> {
    let run = service.get(id).await.map_err(error_response)?;

    Ok(Json(run))
}

async fn resume_run(
    State(service): State<RunService>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<RunSnapshot>), ApiError> {
    let run = service.resume(id).await.map_err(error_response)?;

    Ok((StatusCode::ACCEPTED, Json(run)))
}

async fn cancel_run(
    State(service): State<RunService>,
    Path(id): Path<Uuid>,
) -> Result<Json<RunSnapshot>, ApiError> {
    let run = service.cancel(id).await.map_err(error_response)?;

    Ok(Json(run))
}

// ===== Review Endpoints =====

async fn list_reviews(
    State(service): State<RunService>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ReviewRequest>>, ApiError> {
    let reviews = service.reviews(id).await.map_err(error_response)?;

    Ok(Json(reviews))
}

async fn resolve_review(
    State(service): State<RunService>,
    Path(id): Path<Uuid>,
    Json(decision): Json<ReviewDecision>,
) -> Result<Json<ReviewRequest>, ApiError> {
    let review = service.resolve_review(id, &decision).await.map_err(error_response)?;

    Ok(Json(review))
}

// ===== Purchase Order Endpoints =====

async fn list_purchase_orders(
    State(service): State<RunService>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<PoDraft>>, ApiError> {
    let drafts = service.purchase_orders(id).await.map_err(error_response)?;

    Ok(Json(drafts))
}
