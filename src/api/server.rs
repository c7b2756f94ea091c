//! HTTP API server
//!
//! A thin axum binding over [`ClassificationService`]: handlers deserialize
//! the request, call the service method, and map the error enum onto HTTP
//! status codes.

use crate::config::HttpConfig;
use crate::error::TriageError;
use crate::service::{
    BulkLabelRequest, ClassificationService, ClassifyRequest, FeedbackRequest, LabelRequest,
    TrainRequest,
};
use crate::types::OwnerId;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

/// Service error wrapped for HTTP transport
pub struct ApiError(TriageError);

impl From<TriageError> for ApiError {
    fn from(e: TriageError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TriageError::InsufficientData(_) => StatusCode::BAD_REQUEST,
            TriageError::ClassifierNotFound(_) | TriageError::UnresolvedReference(_) => {
                StatusCode::NOT_FOUND
            }
            TriageError::ModelNotTrained(_) => StatusCode::CONFLICT,
            TriageError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!("Request failed: {}", self.0);
        }
        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

#[derive(Clone)]
struct AppState {
    service: Arc<ClassificationService>,
}

/// API server over the classification service
pub struct ApiServer {
    config: HttpConfig,
    service: Arc<ClassificationService>,
}

impl ApiServer {
    pub fn new(config: HttpConfig, service: Arc<ClassificationService>) -> Self {
        Self { config, service }
    }

    fn build_router(state: AppState) -> Router {
        Router::new()
            // Classifier lifecycle
            .route("/train", post(train_handler))
            .route("/classify", post(classify_handler))
            .route("/feedback", post(feedback_handler))
            // Labeling
            .route("/label", post(label_handler))
            .route("/bulk-label", post(bulk_label_handler))
            // Introspection and management
            .route("/stats/:owner_id", get(stats_handler))
            .route("/reset/:owner_id", post(reset_handler))
            .route("/persistence/status", get(persistence_status_handler))
            // Health check
            .route("/health", get(health_handler))
            // State
            .with_state(state)
            // Middleware
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until the shutdown signal flips
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port).parse()?;
        let router = Self::build_router(AppState {
            service: self.service,
        });

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("API server listening on http://{}", addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
                info!("API server shutting down");
            })
            .await?;
        Ok(())
    }
}

async fn train_handler(
    State(state): State<AppState>,
    Json(request): Json<TrainRequest>,
) -> ApiResult<impl Serialize> {
    Ok(Json(state.service.train(request).await?))
}

async fn classify_handler(
    State(state): State<AppState>,
    Json(request): Json<ClassifyRequest>,
) -> ApiResult<impl Serialize> {
    Ok(Json(state.service.classify(request).await?))
}

async fn feedback_handler(
    State(state): State<AppState>,
    Json(request): Json<FeedbackRequest>,
) -> ApiResult<impl Serialize> {
    Ok(Json(state.service.feedback(request).await?))
}

async fn label_handler(
    State(state): State<AppState>,
    Json(request): Json<LabelRequest>,
) -> ApiResult<impl Serialize> {
    Ok(Json(state.service.label(request).await?))
}

async fn bulk_label_handler(
    State(state): State<AppState>,
    Json(request): Json<BulkLabelRequest>,
) -> ApiResult<impl Serialize> {
    Ok(Json(state.service.bulk_label(request).await?))
}

async fn stats_handler(
    State(state): State<AppState>,
    Path(owner_id): Path<OwnerId>,
) -> ApiResult<impl Serialize> {
    Ok(Json(state.service.stats(&owner_id).await?))
}

async fn reset_handler(
    State(state): State<AppState>,
    Path(owner_id): Path<OwnerId>,
) -> ApiResult<impl Serialize> {
    state.service.reset(&owner_id).await?;
    Ok(Json(json!({
        "owner_id": owner_id,
        "reset": true,
    })))
}

async fn persistence_status_handler(State(state): State<AppState>) -> ApiResult<impl Serialize> {
    Ok(Json(state.service.persistence_status().await?))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ClassifierRegistry;
    use crate::config::ClassifierConfig;
    use crate::persist::PersistenceLayer;
    use crate::storage::memory::MemoryEmbeddingStore;
    use tempfile::TempDir;

    fn state(dir: &TempDir) -> AppState {
        let registry = Arc::new(ClassifierRegistry::new(
            PersistenceLayer::new(dir.path()),
            ClassifierConfig::default(),
        ));
        let embeddings = Arc::new(MemoryEmbeddingStore::default());
        AppState {
            service: Arc::new(ClassificationService::new(
                registry,
                embeddings,
                ClassifierConfig::default(),
            )),
        }
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = health_handler().await;
        assert_eq!(response.0.status, "ok");
        assert!(!response.0.version.is_empty());
    }

    #[tokio::test]
    async fn stats_for_unknown_owner_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = state(&dir)
            .service
            .stats(&OwnerId::from("nobody"))
            .await
            .unwrap_err();
        let response = ApiError(err).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn store_outage_maps_to_service_unavailable() {
        let response =
            ApiError(TriageError::StoreUnavailable("down".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn insufficient_data_maps_to_bad_request() {
        let response =
            ApiError(TriageError::InsufficientData("need 2".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
