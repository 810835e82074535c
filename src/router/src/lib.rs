use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use deletes::{DeleteStore, TombstonesLoader};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod endpoints;

/// Header carrying the tenant a request acts on
pub const TENANT_HEADER: &str = "X-Tenant-ID";

pub trait RouterState: std::fmt::Debug + Clone + Send + Sync + 'static {
    fn delete_store(&self) -> &DeleteStore;
    fn tombstones(&self) -> &Arc<TombstonesLoader>;
}

/// Shared state of the delete request API
#[derive(Debug, Clone)]
pub struct DeletesStateImpl {
    delete_store: DeleteStore,
    tombstones: Arc<TombstonesLoader>,
}

impl DeletesStateImpl {
    pub fn new(delete_store: DeleteStore, tombstones: Arc<TombstonesLoader>) -> Self {
        Self {
            delete_store,
            tombstones,
        }
    }
}

impl RouterState for DeletesStateImpl {
    fn delete_store(&self) -> &DeleteStore {
        &self.delete_store
    }

    fn tombstones(&self) -> &Arc<TombstonesLoader> {
        &self.tombstones
    }
}

/// Error body returned by every failing endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    pub message: String,
}

impl ApiError {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

/// Create a new router instance with all routes configured
pub fn create_router<S: RouterState>(state: S) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", endpoints::delete_series::router())
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}
