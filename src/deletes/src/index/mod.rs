//! The indexed key/value contract the delete request store is built on.
//!
//! Records are addressed by `(table, hash value, range value)`. Writes are
//! grouped into a [`WriteBatch`] applied atomically; reads are paginated scans
//! over one `(table, hash value)` bucket, optionally narrowed by a range value
//! prefix and an exact value.

use std::sync::Arc;

use async_trait::async_trait;
use common::config::{IndexBackend, IndexConfig};

use crate::error::StorageError;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryIndexClient;
pub use sqlite::SqliteIndexClient;

/// One record of a write batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub table_name: String,
    pub hash_value: String,
    pub range_value: Vec<u8>,
    pub value: Vec<u8>,
}

/// Records written all-or-nothing by [`IndexClient::batch_write`].
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    entries: Vec<IndexEntry>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a record; a later record with the same key overwrites an earlier one.
    pub fn add(
        &mut self,
        table_name: &str,
        hash_value: &str,
        range_value: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) {
        self.entries.push(IndexEntry {
            table_name: table_name.to_string(),
            hash_value: hash_value.to_string(),
            range_value: range_value.into(),
            value: value.into(),
        });
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Scan over one `(table, hash value)` bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexQuery {
    pub table_name: String,
    pub hash_value: String,
    pub range_value_prefix: Option<Vec<u8>>,
    pub value_equal: Option<Vec<u8>>,
}

impl IndexQuery {
    pub fn new(table_name: &str, hash_value: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            hash_value: hash_value.to_string(),
            ..Default::default()
        }
    }

    pub fn with_range_prefix(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.range_value_prefix = Some(prefix.into());
        self
    }

    pub fn with_value_equal(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.value_equal = Some(value.into());
        self
    }

    /// Whether a record of this query's bucket passes the prefix and value filters.
    pub fn accepts(&self, range_value: &[u8], value: &[u8]) -> bool {
        let prefix_ok = self
            .range_value_prefix
            .as_deref()
            .is_none_or(|prefix| range_value.starts_with(prefix));
        let value_ok = self.value_equal.as_deref().is_none_or(|v| v == value);
        prefix_ok && value_ok
    }
}

/// A single row of a [`ReadBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRow {
    pub range_value: Vec<u8>,
    pub value: Vec<u8>,
}

/// One page of scan results, ordered by range value.
#[derive(Debug, Clone, Default)]
pub struct ReadBatch {
    rows: Vec<IndexRow>,
}

impl ReadBatch {
    pub fn new(rows: Vec<IndexRow>) -> Self {
        Self { rows }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, IndexRow> {
        self.rows.iter()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl<'a> IntoIterator for &'a ReadBatch {
    type Item = &'a IndexRow;
    type IntoIter = std::slice::Iter<'a, IndexRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// Page consumer for [`IndexClient::query_pages`]. Returning `false` stops
/// the scan of the current query.
pub type PageCallback<'a> = dyn FnMut(&IndexQuery, &ReadBatch) -> bool + Send + 'a;

/// Minimal contract of an indexed key/value store.
#[async_trait]
pub trait IndexClient: std::fmt::Debug + Send + Sync + 'static {
    fn new_write_batch(&self) -> WriteBatch {
        WriteBatch::new()
    }

    /// Apply every record of the batch, or none of them.
    async fn batch_write(&self, batch: WriteBatch) -> Result<(), StorageError>;

    /// Run each query in order, handing every non-empty page to `callback`
    /// until the pages are exhausted or the callback declines to continue.
    async fn query_pages(
        &self,
        queries: &[IndexQuery],
        callback: &mut PageCallback<'_>,
    ) -> Result<(), StorageError>;
}

/// Open the backend selected by `config`.
pub async fn connect(config: &IndexConfig) -> Result<Arc<dyn IndexClient>, StorageError> {
    let client: Arc<dyn IndexClient> = match config.backend {
        IndexBackend::Memory => Arc::new(MemoryIndexClient::new(config.page_size)),
        IndexBackend::Sqlite => {
            Arc::new(SqliteIndexClient::new(&config.dsn, config.page_size).await?)
        }
    };
    tracing::info!(backend = %config.backend, page_size = config.page_size, "Index backend ready");
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_filters() {
        let query = IndexQuery::new("t", "")
            .with_range_prefix("user:")
            .with_value_equal("0");

        assert!(query.accepts(b"user:abc", b"0"));
        assert!(!query.accepts(b"user:abc", b"1"));
        assert!(!query.accepts(b"other:abc", b"0"));
        assert!(IndexQuery::new("t", "").accepts(b"anything", b"x"));
    }

    #[test]
    fn test_write_batch_collects_entries() {
        let mut batch = WriteBatch::new();
        assert!(batch.is_empty());

        batch.add("t", "", "a:b", "0");
        batch.add("t", "a:b", "1:2:3", "up");

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.entries()[1].hash_value, "a:b");
        assert_eq!(batch.entries()[1].value, b"up".to_vec());
    }

    #[tokio::test]
    async fn test_connect_memory_backend() {
        let client = connect(&IndexConfig::in_memory()).await.unwrap();
        let mut batch = client.new_write_batch();
        batch.add("t", "", "k", "v");
        client.batch_write(batch).await.unwrap();

        let mut rows = 0;
        client
            .query_pages(&[IndexQuery::new("t", "")], &mut |_, page| {
                rows += page.len();
                true
            })
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }
}
