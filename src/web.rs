//! Web server for the catalog UI
//!
//! Read-only views over the store plus an on-demand refresh endpoint guarded
//! by the shared cooldown gate. Rendering stays in one static page; every
//! interesting behavior lives behind the JSON API.

use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::catalog::InventoryItem;
use crate::export::to_csv_string;
use crate::sync::{refresh_due, RefreshGate, SyncEngine, SyncReport};

/// Last completed sync report, shared between the daemon and the web UI
pub type SharedReport = Arc<Mutex<Option<SyncReport>>>;

/// Shared application state
#[derive(Clone)]
struct AppState {
    engine: Arc<SyncEngine>,
    gate: Arc<RefreshGate>,
    last_report: SharedReport,
    max_age_hours: i64,
}

/// API response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// GET / - Serve the web UI (single HTML page)
async fn index_handler() -> Html<&'static str> {
    Html(include_str!("../static/index.html"))
}

/// GET /api/items - the canonical collection, straight from the store
async fn items_handler(State(state): State<AppState>) -> Json<ApiResponse<Vec<InventoryItem>>> {
    let catalog = state.engine.store().read();
    Json(ApiResponse::ok(catalog.items))
}

/// GET /api/report - the last sync report from this process, if any
async fn report_handler(State(state): State<AppState>) -> Json<ApiResponse<SyncReport>> {
    let report = state.last_report.lock().unwrap().clone();
    match report {
        Some(report) => Json(ApiResponse::ok(report)),
        None => Json(ApiResponse::err("no sync has completed yet")),
    }
}

/// POST /api/refresh - on-demand refresh through the cooldown gate
async fn refresh_handler(State(state): State<AppState>) -> Json<ApiResponse<SyncReport>> {
    if !state.gate.try_begin() {
        return Json(ApiResponse::err("refresh is cooling down, try again later"));
    }

    match state.engine.sync(refresh_due(state.max_age_hours)).await {
        Ok(report) => {
            *state.last_report.lock().unwrap() = Some(report.clone());
            Json(ApiResponse::ok(report))
        }
        Err(e) => {
            log::error!("On-demand refresh failed: {}", e);
            Json(ApiResponse::err(e.to_string()))
        }
    }
}

/// GET /api/export.csv - catalog download for spreadsheets
async fn export_handler(State(state): State<AppState>) -> Response {
    let catalog = state.engine.store().read();
    match to_csv_string(&catalog.items) {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/csv; charset=utf-8")
            .header(
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"catalog.csv\"",
            )
            .body(Body::from(body))
            .unwrap(),
        Err(e) => {
            log::error!("CSV export failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Build the web server router
pub fn create_router(
    engine: Arc<SyncEngine>,
    gate: Arc<RefreshGate>,
    last_report: SharedReport,
    max_age_hours: i64,
) -> Router {
    let state = AppState {
        engine,
        gate,
        last_report,
        max_age_hours,
    };

    Router::new()
        .route("/", get(index_handler))
        .route("/api/items", get(items_handler))
        .route("/api/report", get(report_handler))
        .route("/api/refresh", post(refresh_handler))
        .route("/api/export.csv", get(export_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the web server (async)
///
/// Binds to 0.0.0.0 (all interfaces) to work with Docker port mapping; use
/// firewall rules or port mapping to control external exposure.
pub async fn serve(
    engine: Arc<SyncEngine>,
    gate: Arc<RefreshGate>,
    last_report: SharedReport,
    max_age_hours: i64,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_router(engine, gate, last_report, max_age_hours);
    let addr = format!("0.0.0.0:{}", port);

    log::info!("Web UI listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
