use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool, query};

use super::{IndexClient, IndexQuery, IndexRow, PageCallback, ReadBatch, WriteBatch};
use crate::error::StorageError;

const IN_MEMORY_DSN: &str = "sqlite::memory:";

/// SQLite implementation of the index contract. All tables share a single
/// `index_entries` relation keyed by `(table_name, hash_value, range_value)`.
#[derive(Debug, Clone)]
pub struct SqliteIndexClient {
    pool: SqlitePool,
    page_size: usize,
}

impl SqliteIndexClient {
    /// Connect to `dsn` and create the schema if needed.
    pub async fn new(dsn: &str, page_size: usize) -> Result<Self, StorageError> {
        log::info!("Connecting to index database with DSN: {dsn}");

        let in_memory = dsn == IN_MEMORY_DSN;
        let dsn = if in_memory {
            dsn.to_string()
        } else {
            create_parent_dir(dsn).await?;
            with_create_mode(dsn)
        };

        // Every connection to `sqlite::memory:` opens a distinct database.
        let options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = options.connect(&dsn).await.map_err(|e| {
            log::error!("Failed to connect to SQLite index with DSN '{dsn}': {e}");
            e
        })?;

        let client = Self {
            pool,
            page_size: page_size.max(1),
        };
        client.init().await.map_err(|e| {
            log::error!("Failed to initialize index schema: {e}");
            e
        })?;
        log::info!("Index schema initialized successfully");
        Ok(client)
    }

    /// Private in-memory database, mostly useful in tests.
    pub async fn new_in_memory(page_size: usize) -> Result<Self, StorageError> {
        Self::new(IN_MEMORY_DSN, page_size).await
    }

    async fn init(&self) -> Result<(), StorageError> {
        let create_entries = r#"
        CREATE TABLE IF NOT EXISTS index_entries (
            table_name TEXT NOT NULL,
            hash_value TEXT NOT NULL,
            range_value BLOB NOT NULL,
            value BLOB NOT NULL,
            PRIMARY KEY (table_name, hash_value, range_value)
        )"#;
        query(create_entries).execute(&self.pool).await?;
        Ok(())
    }

    /// Fetch one page of `q`, strictly after `after` when given.
    async fn fetch_page(
        &self,
        q: &IndexQuery,
        after: Option<&[u8]>,
    ) -> Result<Vec<IndexRow>, StorageError> {
        let mut sql = String::from(
            "SELECT range_value, value FROM index_entries WHERE table_name = ? AND hash_value = ?",
        );
        if after.is_some() {
            sql.push_str(" AND range_value > ?");
        } else {
            sql.push_str(" AND range_value >= ?");
        }
        if q.value_equal.is_some() {
            sql.push_str(" AND value = ?");
        }
        sql.push_str(" ORDER BY range_value LIMIT ?");

        let lower = after
            .map(<[u8]>::to_vec)
            .or_else(|| q.range_value_prefix.clone())
            .unwrap_or_default();

        let mut stmt = query(&sql)
            .bind(&q.table_name)
            .bind(&q.hash_value)
            .bind(lower);
        if let Some(value) = &q.value_equal {
            stmt = stmt.bind(value.clone());
        }
        let limit = i64::try_from(self.page_size).unwrap_or(i64::MAX);
        let rows = stmt.bind(limit).fetch_all(&self.pool).await?;

        rows.into_iter()
            .map(|row| -> Result<IndexRow, StorageError> {
                Ok(IndexRow {
                    range_value: row.try_get("range_value")?,
                    value: row.try_get("value")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl IndexClient for SqliteIndexClient {
    async fn batch_write(&self, batch: WriteBatch) -> Result<(), StorageError> {
        if batch.is_empty() {
            return Ok(());
        }

        let upsert = r#"
        INSERT INTO index_entries (table_name, hash_value, range_value, value)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (table_name, hash_value, range_value) DO UPDATE SET value = excluded.value
        "#;

        let mut tx = self.pool.begin().await?;
        for entry in batch.entries() {
            query(upsert)
                .bind(&entry.table_name)
                .bind(&entry.hash_value)
                .bind(entry.range_value.as_slice())
                .bind(entry.value.as_slice())
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    log::error!(
                        "Failed to write index entry in table '{}': {e}",
                        entry.table_name
                    );
                    e
                })?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query_pages(
        &self,
        queries: &[IndexQuery],
        callback: &mut PageCallback<'_>,
    ) -> Result<(), StorageError> {
        for q in queries {
            let mut cursor: Option<Vec<u8>> = None;
            loop {
                let fetched = self.fetch_page(q, cursor.as_deref()).await?;
                let exhausted = fetched.len() < self.page_size;
                cursor = fetched.last().map(|row| row.range_value.clone());

                // Rows are ordered, so a last row past the prefix ends the scan.
                let past_prefix = q
                    .range_value_prefix
                    .as_deref()
                    .zip(cursor.as_deref())
                    .is_some_and(|(prefix, last)| !last.starts_with(prefix));
                let rows: Vec<IndexRow> = fetched
                    .into_iter()
                    .filter(|row| q.accepts(&row.range_value, &row.value))
                    .collect();

                if !rows.is_empty() && !callback(q, &ReadBatch::new(rows)) {
                    break;
                }
                if exhausted || past_prefix {
                    break;
                }
            }
        }
        Ok(())
    }
}

fn with_create_mode(dsn: &str) -> String {
    if dsn.contains("mode=") {
        dsn.to_string()
    } else if dsn.contains('?') {
        format!("{dsn}&mode=rwc")
    } else {
        format!("{dsn}?mode=rwc")
    }
}

async fn create_parent_dir(dsn: &str) -> Result<(), StorageError> {
    let path = dsn
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    let path = path.split('?').next().unwrap_or_default();
    if let Some(parent) = Path::new(path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
    {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            StorageError::Backend(format!("cannot create directory {}: {e}", parent.display()))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn scan(client: &SqliteIndexClient, q: IndexQuery) -> (Vec<Vec<u8>>, usize) {
        let mut rows = Vec::new();
        let mut pages = 0;
        client
            .query_pages(&[q], &mut |_, batch| {
                pages += 1;
                rows.extend(batch.iter().map(|r| r.range_value.clone()));
                true
            })
            .await
            .unwrap();
        (rows, pages)
    }

    #[tokio::test]
    async fn test_prefix_scan_across_pages() {
        let client = SqliteIndexClient::new_in_memory(2).await.unwrap();
        let mut batch = client.new_write_batch();
        for key in ["a:1", "a:2", "a:3", "ab:4", "b:5"] {
            batch.add("t", "", key, "0");
        }
        client.batch_write(batch).await.unwrap();

        let (rows, pages) = scan(&client, IndexQuery::new("t", "").with_range_prefix("a:")).await;
        assert_eq!(rows, vec![b"a:1".to_vec(), b"a:2".to_vec(), b"a:3".to_vec()]);
        assert_eq!(pages, 2);

        let (rows, _) = scan(&client, IndexQuery::new("t", "")).await;
        assert_eq!(rows.len(), 5);
    }

    #[tokio::test]
    async fn test_value_filter_and_upsert() {
        let client = SqliteIndexClient::new_in_memory(10).await.unwrap();
        let mut batch = client.new_write_batch();
        batch.add("t", "", "u:1", "0");
        batch.add("t", "", "u:2", "1");
        client.batch_write(batch).await.unwrap();

        let mut batch = client.new_write_batch();
        batch.add("t", "", "u:1", "3");
        client.batch_write(batch).await.unwrap();

        let (rows, _) = scan(&client, IndexQuery::new("t", "").with_value_equal("3")).await;
        assert_eq!(rows, vec![b"u:1".to_vec()]);
        let (rows, _) = scan(&client, IndexQuery::new("t", "").with_value_equal("0")).await;
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_early_stop() {
        let client = SqliteIndexClient::new_in_memory(1).await.unwrap();
        let mut batch = client.new_write_batch();
        batch.add("t", "h", "1", "x");
        batch.add("t", "h", "2", "x");
        client.batch_write(batch).await.unwrap();

        let mut calls = 0;
        client
            .query_pages(&[IndexQuery::new("t", "h")], &mut |_, _| {
                calls += 1;
                false
            })
            .await
            .unwrap();
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_create_mode_is_appended_once() {
        assert_eq!(with_create_mode("sqlite://a.db"), "sqlite://a.db?mode=rwc");
        assert_eq!(with_create_mode("sqlite://a.db?x=1"), "sqlite://a.db?x=1&mode=rwc");
        assert_eq!(with_create_mode("sqlite://a.db?mode=ro"), "sqlite://a.db?mode=ro");
    }
}
