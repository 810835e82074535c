//! Pluggable persistence boundary for delete requests.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{DeletesError, Result};
use crate::index::{IndexClient, IndexQuery, ReadBatch};
use crate::request::{DeleteRequest, DeleteRequestQuery, DeleteRequestStatus, DeleteRequestUpdate};
use crate::schema::{DeleteRequestsSchema, decode_details, decode_status_key};

/// Backend persisting delete requests.
#[async_trait]
pub trait DeleteRequestsStorage: std::fmt::Debug + Send + Sync + 'static {
    /// Persist a complete request. Implementations must make it visible
    /// all at once or not at all.
    async fn add_delete_request(&self, entry: &DeleteRequest) -> Result<()>;

    /// Every request selected by `query`, in key order.
    async fn get_delete_requests(&self, query: &DeleteRequestQuery) -> Result<Vec<DeleteRequest>>;

    /// Overwrite the status of a request.
    async fn update_delete_request(&self, update: &DeleteRequestUpdate) -> Result<()>;
}

/// [`DeleteRequestsStorage`] using the two-record layout of
/// [`DeleteRequestsSchema`] over an [`IndexClient`].
#[derive(Debug, Clone)]
pub struct IndexDeleteRequestsStorage {
    index: Arc<dyn IndexClient>,
    schema: DeleteRequestsSchema,
}

/// Status record hit of a scan.
struct StatusHit {
    user_id: String,
    request_id: String,
    status: DeleteRequestStatus,
}

impl IndexDeleteRequestsStorage {
    pub fn new(index: Arc<dyn IndexClient>, table_name: &str) -> Self {
        Self {
            index,
            schema: DeleteRequestsSchema::new(table_name),
        }
    }

    pub fn schema(&self) -> &DeleteRequestsSchema {
        &self.schema
    }

    async fn scan_statuses(&self, query: &DeleteRequestQuery) -> Result<Vec<StatusHit>> {
        let point = match query {
            DeleteRequestQuery::UserRequest {
                user_id,
                request_id,
            }
            | DeleteRequestQuery::Exact {
                user_id,
                request_id,
                ..
            } => Some((user_id.as_str(), request_id.as_str())),
            _ => None,
        };
        // A user prefix also covers tenants such as `a:b` when scanning `a`.
        let owner = match query {
            DeleteRequestQuery::User { user_id }
            | DeleteRequestQuery::UserStatus { user_id, .. } => Some(user_id.as_str()),
            _ => None,
        };

        let mut hits = Vec::new();
        let mut failure: Option<DeletesError> = None;
        let mut consume = |_: &IndexQuery, page: &ReadBatch| -> bool {
            for row in page {
                let decoded = decode_status_key(&row.range_value).and_then(|(user_id, request_id)| {
                    DeleteRequestStatus::from_code(&row.value).map(|status| StatusHit {
                        user_id,
                        request_id,
                        status,
                    })
                });
                let hit = match decoded {
                    Ok(hit) => hit,
                    Err(e) => {
                        failure = Some(e);
                        return false;
                    }
                };

                match point {
                    Some((user_id, request_id)) => {
                        if hit.user_id == user_id && hit.request_id == request_id {
                            hits.push(hit);
                            return false;
                        }
                    }
                    None => {
                        if owner.is_none_or(|user_id| hit.user_id == user_id) {
                            hits.push(hit);
                        }
                    }
                }
            }
            true
        };

        self.index
            .query_pages(&[self.schema.status_query(query)], &mut consume)
            .await?;

        match failure {
            Some(e) => Err(e),
            None => Ok(hits),
        }
    }

    async fn fetch_details(&self, hit: StatusHit) -> Result<DeleteRequest> {
        let mut record = None;
        self.index
            .query_pages(
                &[self.schema.detail_query(&hit.user_id, &hit.request_id)],
                &mut |_, page| {
                    record = page
                        .iter()
                        .next()
                        .map(|row| (row.range_value.clone(), row.value.clone()));
                    record.is_none()
                },
            )
            .await?;

        let Some((range_value, value)) = record else {
            return Err(DeletesError::encoding(format!(
                "missing detail record for {}:{}",
                hit.user_id, hit.request_id
            )));
        };
        let details = decode_details(&range_value, &value)?;

        Ok(DeleteRequest {
            request_id: hit.request_id,
            user_id: hit.user_id,
            start_time: details.start_time,
            end_time: details.end_time,
            selectors: details.selectors,
            status: hit.status,
            matchers: Vec::new(),
            created_at: details.created_at,
        })
    }
}

#[async_trait]
impl DeleteRequestsStorage for IndexDeleteRequestsStorage {
    async fn add_delete_request(&self, entry: &DeleteRequest) -> Result<()> {
        let mut batch = self.index.new_write_batch();
        self.schema.add_request_entries(&mut batch, entry);
        self.index.batch_write(batch).await?;
        Ok(())
    }

    async fn get_delete_requests(&self, query: &DeleteRequestQuery) -> Result<Vec<DeleteRequest>> {
        let hits = self.scan_statuses(query).await?;

        let mut requests = Vec::with_capacity(hits.len());
        for hit in hits {
            requests.push(self.fetch_details(hit).await?);
        }
        Ok(requests)
    }

    async fn update_delete_request(&self, update: &DeleteRequestUpdate) -> Result<()> {
        let mut batch = self.index.new_write_batch();
        self.schema.add_status_entry(
            &mut batch,
            &update.user_id,
            &update.request_id,
            update.status,
        );
        self.index.batch_write(batch).await?;
        Ok(())
    }
}
