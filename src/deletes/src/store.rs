use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::config::DeleteStoreConfig;
use tracing::{debug, info};

use crate::Timestamp;
use crate::error::{DeletesError, Result};
use crate::index::IndexClient;
use crate::request::{DeleteRequest, DeleteRequestQuery, DeleteRequestStatus, DeleteRequestUpdate};
use crate::schema::new_delete_request;
use crate::storage::{DeleteRequestsStorage, IndexDeleteRequestsStorage};

/// Lifecycle operations on delete requests, keyed by user and request ID.
#[derive(Debug, Clone)]
pub struct DeleteStore {
    storage: Arc<dyn DeleteRequestsStorage>,
}

impl DeleteStore {
    pub fn new(storage: Arc<dyn DeleteRequestsStorage>) -> Self {
        Self { storage }
    }

    /// Store backed by `index` with the two-record layout.
    pub fn with_index(index: Arc<dyn IndexClient>, config: &DeleteStoreConfig) -> Self {
        Self::new(Arc::new(IndexDeleteRequestsStorage::new(
            index,
            &config.requests_table_name,
        )))
    }

    /// Record a new request in the `Received` status and return it.
    pub async fn add_delete_request(
        &self,
        user_id: &str,
        start_time: Timestamp,
        end_time: Timestamp,
        selectors: Vec<String>,
    ) -> Result<DeleteRequest> {
        self.add_delete_request_at(user_id, start_time, end_time, selectors, Utc::now())
            .await
    }

    /// [`DeleteStore::add_delete_request`] with an explicit submission instant.
    pub async fn add_delete_request_at(
        &self,
        user_id: &str,
        start_time: Timestamp,
        end_time: Timestamp,
        selectors: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<DeleteRequest> {
        let request = new_delete_request(user_id, start_time, end_time, selectors, now);
        self.storage.add_delete_request(&request).await?;

        info!(
            tenant_id = %user_id,
            request_id = %request.request_id,
            start_time,
            end_time,
            "Delete request added"
        );
        Ok(request)
    }

    pub async fn get_delete_requests_by_status(
        &self,
        status: DeleteRequestStatus,
    ) -> Result<Vec<DeleteRequest>> {
        self.storage
            .get_delete_requests(&DeleteRequestQuery::Status { status })
            .await
    }

    pub async fn get_delete_requests_for_user_by_status(
        &self,
        user_id: &str,
        status: DeleteRequestStatus,
    ) -> Result<Vec<DeleteRequest>> {
        self.storage
            .get_delete_requests(&DeleteRequestQuery::UserStatus {
                user_id: user_id.to_string(),
                status,
            })
            .await
    }

    pub async fn get_all_delete_requests_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<DeleteRequest>> {
        self.storage
            .get_delete_requests(&DeleteRequestQuery::User {
                user_id: user_id.to_string(),
            })
            .await
    }

    /// A single request, or `None` when it does not exist.
    pub async fn get_delete_request(
        &self,
        user_id: &str,
        request_id: &str,
    ) -> Result<Option<DeleteRequest>> {
        let mut found = self
            .storage
            .get_delete_requests(&DeleteRequestQuery::UserRequest {
                user_id: user_id.to_string(),
                request_id: request_id.to_string(),
            })
            .await?;
        Ok(found.pop())
    }

    /// Overwrite the status of a request. Transitions are not checked; see
    /// [`DeleteStore::advance_status`].
    pub async fn update_status(
        &self,
        user_id: &str,
        request_id: &str,
        status: DeleteRequestStatus,
    ) -> Result<()> {
        self.storage
            .update_delete_request(&DeleteRequestUpdate {
                user_id: user_id.to_string(),
                request_id: request_id.to_string(),
                status,
            })
            .await?;

        debug!(tenant_id = %user_id, request_id, %status, "Delete request status updated");
        Ok(())
    }

    /// Move an existing request forward to `next`, rejecting backward moves.
    pub async fn advance_status(
        &self,
        user_id: &str,
        request_id: &str,
        next: DeleteRequestStatus,
    ) -> Result<()> {
        let current = self
            .get_delete_request(user_id, request_id)
            .await?
            .ok_or_else(|| DeletesError::NotFound {
                user_id: user_id.to_string(),
                request_id: request_id.to_string(),
            })?;

        if !current.status.can_transition_to(next) {
            return Err(DeletesError::InvalidTransition {
                from: current.status,
                to: next,
            });
        }
        if current.status == next {
            return Ok(());
        }

        self.update_status(user_id, request_id, next).await
    }

    /// Requests of `user_id` still masking data, grouped by status in
    /// lifecycle order.
    pub async fn get_pending_delete_requests_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<DeleteRequest>> {
        let mut pending = Vec::new();
        for status in DeleteRequestStatus::PENDING {
            pending.extend(
                self.get_delete_requests_for_user_by_status(user_id, status)
                    .await?,
            );
        }
        Ok(pending)
    }
}
