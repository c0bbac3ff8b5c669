// 🌐 Web view - holders, their transactions and import history
//
// Read-only. Handlers share one connection behind a mutex; every query here
// is a single short SELECT.

use crate::db::{
    count_holders, count_transactions, get_holder, list_holders, list_import_runs,
    list_transactions_for_holder, ImportRun,
};
use crate::error::StoreError;
use crate::model::{PersistedHolder, PersistedTransaction};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use rusqlite::Connection;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::error;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    db: Arc<Mutex<Connection>>,
}

impl AppState {
    pub fn new(conn: Connection) -> Self {
        AppState {
            db: Arc::new(Mutex::new(conn)),
        }
    }

    fn with_db<T>(
        &self,
        query: impl FnOnce(&Connection) -> Result<T, WebError>,
    ) -> Result<T, WebError> {
        let conn = self
            .db
            .lock()
            .map_err(|_| WebError::Internal("database lock poisoned".to_string()))?;
        query(&conn)
    }
}

/// API Response wrapper
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
}

impl ApiResponse<()> {
    fn err(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

#[derive(Debug)]
enum WebError {
    NotFound(String),
    Internal(String),
}

impl From<StoreError> for WebError {
    fn from(e: StoreError) -> Self {
        WebError::Internal(e.to_string())
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            WebError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            WebError::Internal(message) => {
                error!(error = %message, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };
        (status, Json(ApiResponse::err(message))).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, WebError>;

/// Stats response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    holders: i64,
    transactions: i64,
    imports: usize,
    last_import: Option<ImportRun>,
}

/// One holder plus the transactions it takes part in
#[derive(Serialize)]
struct HolderTransactions {
    holder: PersistedHolder,
    transactions: Vec<PersistedTransaction>,
}

fn holder_or_404(conn: &Connection, id: i64) -> Result<PersistedHolder, WebError> {
    get_holder(conn, id)?.ok_or_else(|| WebError::NotFound(format!("holder {} not found", id)))
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/holders - Favorites first, then by id
async fn get_holders(State(state): State<AppState>) -> ApiResult<Vec<PersistedHolder>> {
    let holders = state.with_db(|conn| Ok(list_holders(conn)?))?;
    Ok(Json(ApiResponse::ok(holders)))
}

/// GET /api/holders/:id
async fn get_holder_by_id(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<PersistedHolder> {
    let holder = state.with_db(|conn| holder_or_404(conn, id))?;
    Ok(Json(ApiResponse::ok(holder)))
}

/// GET /api/holders/:id/transactions - Newest first
async fn get_holder_transactions(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<HolderTransactions> {
    let response = state.with_db(|conn| {
        let holder = holder_or_404(conn, id)?;
        let transactions = list_transactions_for_holder(conn, id)?;
        Ok(HolderTransactions {
            holder,
            transactions,
        })
    })?;
    Ok(Json(ApiResponse::ok(response)))
}

/// GET /api/stats
async fn get_stats(State(state): State<AppState>) -> ApiResult<StatsResponse> {
    let stats = state.with_db(|conn| {
        let mut runs = list_import_runs(conn)?;
        Ok(StatsResponse {
            holders: count_holders(conn)?,
            transactions: count_transactions(conn)?,
            imports: runs.len(),
            last_import: if runs.is_empty() { None } else { Some(runs.remove(0)) },
        })
    })?;
    Ok(Json(ApiResponse::ok(stats)))
}

/// GET /api/imports - Most recent first
async fn get_imports(State(state): State<AppState>) -> ApiResult<Vec<ImportRun>> {
    let runs = state.with_db(|conn| Ok(list_import_runs(conn)?))?;
    Ok(Json(ApiResponse::ok(runs)))
}

/// GET / - Serve index.html
async fn serve_index() -> impl IntoResponse {
    Html(include_str!("../web/index.html"))
}

/// GET /holders/:id - The page loads its data from the API
async fn serve_holder_page() -> impl IntoResponse {
    Html(include_str!("../web/holder.html"))
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/holders", get(get_holders))
        .route("/holders/:id", get(get_holder_by_id))
        .route("/holders/:id/transactions", get(get_holder_transactions))
        .route("/stats", get(get_stats))
        .route("/imports", get(get_imports))
        .with_state(state);

    Router::new()
        .route("/", get(serve_index))
        .route("/holders/:id", get(serve_holder_page))
        .nest("/api", api_routes)
        .nest_service("/static", ServeDir::new("web"))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{setup_database, SqliteStore};
    use crate::model::{HolderDescriptor, HolderIdentifier, NewTransaction, TransactionBody};
    use crate::repository::{HolderRepository, TransactionRepository};
    use axum::body::Body;
    use axum::http::Request;
    use chrono::{TimeZone, Utc};
    use serde_json::Value;
    use tower::ServiceExt;

    fn seeded_state() -> AppState {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        {
            let store = SqliteStore::new(&conn);
            let shop = store
                .insert_holder(&HolderDescriptor::new(HolderIdentifier::new("dkb/payee", "Kiosk"), "Kiosk"))
                .unwrap();
            let account = store
                .insert_holder(
                    &HolderDescriptor::new(HolderIdentifier::new("iban", "DE02120300000000202051"), "Girokonto")
                        .favorite(),
                )
                .unwrap();
            store
                .insert_transaction(&NewTransaction {
                    from_holder_id: account.id,
                    to_holder_id: shop.id,
                    transaction: TransactionBody::new(350, Utc.with_ymd_and_hms(2024, 2, 28, 0, 0, 0).unwrap()),
                })
                .unwrap();
        }
        AppState::new(conn)
    }

    async fn get_json(uri: &str) -> (StatusCode, Value) {
        let response = router(seeded_state())
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_json("/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], "OK");
    }

    #[tokio::test]
    async fn test_holders_favorites_first() {
        let (status, body) = get_json("/api/holders").await;
        assert_eq!(status, StatusCode::OK);

        let holders = body["data"].as_array().unwrap();
        assert_eq!(holders.len(), 2);
        assert_eq!(holders[0]["name"], "Girokonto");
        assert_eq!(holders[0]["type"], "iban");
        assert_eq!(holders[1]["name"], "Kiosk");
    }

    #[tokio::test]
    async fn test_holder_transactions() {
        let (status, body) = get_json("/api/holders/1/transactions").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["holder"]["identifier"], "Kiosk");
        assert_eq!(body["data"]["transactions"][0]["amount"], 350);
    }

    #[tokio::test]
    async fn test_missing_holder_is_404() {
        let (status, body) = get_json("/api/holders/99").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "holder 99 not found");
    }

    #[tokio::test]
    async fn test_stats() {
        let (status, body) = get_json("/api/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["holders"], 2);
        assert_eq!(body["data"]["transactions"], 1);
        assert_eq!(body["data"]["imports"], 0);
        assert!(body["data"]["lastImport"].is_null());
    }

    #[tokio::test]
    async fn test_index_page() {
        let response = router(seeded_state())
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
