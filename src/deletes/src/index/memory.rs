use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{IndexClient, IndexQuery, IndexRow, PageCallback, ReadBatch, WriteBatch};
use crate::error::StorageError;

const DEFAULT_PAGE_SIZE: usize = 100;

type Bucket = BTreeMap<Vec<u8>, Vec<u8>>;

/// In-memory index backed by ordered maps, one per `(table, hash value)` bucket.
#[derive(Debug)]
pub struct MemoryIndexClient {
    buckets: RwLock<BTreeMap<(String, String), Bucket>>,
    page_size: usize,
}

impl Default for MemoryIndexClient {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl MemoryIndexClient {
    /// Create an empty index delivering at most `page_size` rows per page.
    pub fn new(page_size: usize) -> Self {
        Self {
            buckets: RwLock::new(BTreeMap::new()),
            page_size: page_size.max(1),
        }
    }

    /// Number of records stored across all tables.
    pub async fn len(&self) -> usize {
        self.buckets.read().await.values().map(|b| b.len()).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn matching_rows(&self, query: &IndexQuery) -> Vec<IndexRow> {
        let buckets = self.buckets.read().await;
        let Some(bucket) = buckets.get(&(query.table_name.clone(), query.hash_value.clone()))
        else {
            return Vec::new();
        };

        let start = query.range_value_prefix.clone().unwrap_or_default();
        bucket
            .range(start..)
            .take_while(|(range_value, _)| {
                query
                    .range_value_prefix
                    .as_deref()
                    .is_none_or(|prefix| range_value.starts_with(prefix))
            })
            .filter(|(range_value, value)| query.accepts(range_value, value))
            .map(|(range_value, value)| IndexRow {
                range_value: range_value.clone(),
                value: value.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl IndexClient for MemoryIndexClient {
    async fn batch_write(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write().await;
        for entry in batch.entries() {
            buckets
                .entry((entry.table_name.clone(), entry.hash_value.clone()))
                .or_default()
                .insert(entry.range_value.clone(), entry.value.clone());
        }
        Ok(())
    }

    async fn query_pages(
        &self,
        queries: &[IndexQuery],
        callback: &mut PageCallback<'_>,
    ) -> Result<(), StorageError> {
        for query in queries {
            // Rows are snapshotted so the callback never runs under the lock.
            let rows = self.matching_rows(query).await;
            for page in rows.chunks(self.page_size) {
                if !callback(query, &ReadBatch::new(page.to_vec())) {
                    break;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(client: &MemoryIndexClient, query: IndexQuery) -> (Vec<Vec<u8>>, usize) {
        let mut rows = Vec::new();
        let mut pages = 0;
        client
            .query_pages(&[query], &mut |_, batch| {
                pages += 1;
                rows.extend(batch.iter().map(|r| r.range_value.clone()));
                true
            })
            .await
            .unwrap();
        (rows, pages)
    }

    #[tokio::test]
    async fn test_prefix_and_value_filters() {
        let client = MemoryIndexClient::new(2);
        let mut batch = client.new_write_batch();
        batch.add("t", "", "a:1", "0");
        batch.add("t", "", "a:2", "1");
        batch.add("t", "", "ab:3", "0");
        batch.add("t", "", "b:4", "0");
        batch.add("t", "h", "a:5", "0");
        client.batch_write(batch).await.unwrap();

        let (rows, _) = collect(&client, IndexQuery::new("t", "").with_range_prefix("a:")).await;
        assert_eq!(rows, vec![b"a:1".to_vec(), b"a:2".to_vec()]);

        let (rows, _) = collect(&client, IndexQuery::new("t", "").with_value_equal("0")).await;
        assert_eq!(
            rows,
            vec![b"a:1".to_vec(), b"ab:3".to_vec(), b"b:4".to_vec()]
        );

        let (rows, _) = collect(&client, IndexQuery::new("other", "")).await;
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_pagination_and_early_stop() {
        let client = MemoryIndexClient::new(3);
        let mut batch = client.new_write_batch();
        for i in 0..10 {
            batch.add("t", "", format!("k{i:02}"), "v");
        }
        client.batch_write(batch).await.unwrap();

        let (rows, pages) = collect(&client, IndexQuery::new("t", "")).await;
        assert_eq!(rows.len(), 10);
        assert_eq!(pages, 4);

        let mut seen = 0;
        client
            .query_pages(&[IndexQuery::new("t", "")], &mut |_, batch| {
                seen += batch.len();
                false
            })
            .await
            .unwrap();
        assert_eq!(seen, 3);
    }

    #[tokio::test]
    async fn test_overwrite_same_key() {
        let client = MemoryIndexClient::default();
        let mut batch = client.new_write_batch();
        batch.add("t", "", "k", "0");
        client.batch_write(batch).await.unwrap();

        let mut batch = client.new_write_batch();
        batch.add("t", "", "k", "3");
        client.batch_write(batch).await.unwrap();

        assert_eq!(client.len().await, 1);
        let (rows, _) = collect(&client, IndexQuery::new("t", "").with_value_equal("3")).await;
        assert_eq!(rows, vec![b"k".to_vec()]);
    }
}
