use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{any, get},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::config::Config;
use crate::dashboard;
use crate::error::ProxyError;
use crate::memory::MemorySheets;
use crate::record::{ID_COLUMN, coerce_body};
use crate::sheets::SheetsBackend;
use crate::store::TabStore;

pub struct AppState<B> {
    pub store: TabStore<B>,
}

impl<B: SheetsBackend> AppState<B> {
    pub fn new(store: TabStore<B>) -> Self {
        AppState { store }
    }
}

#[derive(Deserialize)]
struct DeleteQuery {
    id: Option<String>,
}

type ApiResult = Result<Json<Value>, ProxyError>;

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            log::error!("{} {}", status.as_u16(), self);
        } else {
            log::warn!("{} {}", status.as_u16(), self);
        }

        (
            status,
            Json(json!({
                "success": false,
                "error": self.to_string(),
            })),
        )
            .into_response()
    }
}

/// Build the proxy router over a shared store
pub fn router<B: SheetsBackend>(state: Arc<AppState<B>>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/sheets", any(missing_tab))
        .route("/api/sheets/", any(missing_tab))
        .route(
            "/api/sheets/:tab",
            get(read_tab::<B>)
                .post(append_row::<B>)
                .put(update_row::<B>)
                .delete(delete_row::<B>),
        )
        .route("/api/portfolio", get(portfolio::<B>))
        .route("/api/projects/:id/dashboard", get(project_dashboard::<B>))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the server described by `config`
///
/// With `--demo` the tabs come from a JSON seed file held in memory;
/// otherwise they come from Google Sheets.
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let schemas = config.schemas()?;
    let listener = TcpListener::bind(&config.bind).await?;

    match &config.demo {
        Some(seed) => {
            let backend = MemorySheets::from_seed_file(seed)?;
            log::info!(
                "Demo mode: serving tabs {:?} from {}",
                backend.tab_names(),
                seed.display()
            );
            serve(listener, TabStore::new(backend).with_schemas(schemas)).await
        }
        None => {
            let backend = config.google_sheets()?;
            log::info!("Proxying spreadsheet {}", backend.spreadsheet_id());
            serve(listener, TabStore::new(backend).with_schemas(schemas)).await
        }
    }
}

async fn serve<B: SheetsBackend>(
    listener: TcpListener,
    store: TabStore<B>,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = router(Arc::new(AppState::new(store)));

    log::info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn missing_tab() -> ProxyError {
    ProxyError::BadRequest("Missing tab".to_string())
}

fn json_body(body: Result<Json<Value>, JsonRejection>) -> Result<Value, ProxyError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ProxyError::BadRequest(rejection.body_text()))
}

async fn read_tab<B: SheetsBackend>(
    State(state): State<Arc<AppState<B>>>,
    Path(tab): Path<String>,
) -> ApiResult {
    let records = state.store.read(&tab).await?;
    log::debug!("Read {} record(s) from \"{}\"", records.len(), tab);
    Ok(Json(json!({ "success": true, "data": records })))
}

async fn append_row<B: SheetsBackend>(
    State(state): State<Arc<AppState<B>>>,
    Path(tab): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult {
    let record = coerce_body(json_body(body)?)?;
    let written = state.store.append(&tab, record).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Row added successfully",
        "data": written,
    })))
}

async fn update_row<B: SheetsBackend>(
    State(state): State<Arc<AppState<B>>>,
    Path(tab): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult {
    let mut fields = coerce_body(json_body(body)?)?;
    let id = fields
        .remove(ID_COLUMN)
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ProxyError::BadRequest("Missing 'id' field".to_string()))?;

    let updated = state.store.update(&tab, &id, fields).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Row updated successfully",
        "data": updated,
    })))
}

async fn delete_row<B: SheetsBackend>(
    State(state): State<Arc<AppState<B>>>,
    Path(tab): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult {
    let id = query
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ProxyError::BadRequest("Missing 'id' query param".to_string()))?;

    state.store.delete(&tab, &id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Row deleted successfully",
    })))
}

async fn portfolio<B: SheetsBackend>(State(state): State<Arc<AppState<B>>>) -> ApiResult {
    let summary = dashboard::portfolio(&state.store).await?;
    Ok(Json(json!({ "success": true, "data": summary })))
}

async fn project_dashboard<B: SheetsBackend>(
    State(state): State<Arc<AppState<B>>>,
    Path(id): Path<String>,
) -> ApiResult {
    let dashboard = dashboard::project_dashboard(&state.store, &id).await?;
    Ok(Json(json!({ "success": true, "data": dashboard })))
}
