//! Per-tenant cache of pending delete requests.
//!
//! A [`TombstonesSet`] is an immutable snapshot of one tenant's pending
//! requests with their selectors already parsed. The [`TombstonesLoader`]
//! hands out shared references to these snapshots and swaps them wholesale on
//! every refresh, so a reader keeps a consistent view for as long as it holds
//! one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::config::DeleteStoreConfig;
use tokio::sync::{Mutex, RwLock, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::Timestamp;
use crate::error::{Result, StorageError};
use crate::intervals::{Interval, Intervals};
use crate::matchers::{Labels, matches_labels};
use crate::request::DeleteRequest;
use crate::store::DeleteStore;

/// Pending delete requests of one tenant at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct TombstonesSet {
    tombstones: Vec<DeleteRequest>,
    oldest_start: Timestamp,
    newest_end: Timestamp,
}

impl TombstonesSet {
    /// Snapshot of `tombstones`, whose matchers must already be parsed.
    pub fn new(tombstones: Vec<DeleteRequest>) -> Self {
        Self::with_now(tombstones, Utc::now().timestamp_millis())
    }

    /// Like [`TombstonesSet::new`]; `now` is the oldest start of an empty set.
    pub fn with_now(tombstones: Vec<DeleteRequest>, now: Timestamp) -> Self {
        let mut oldest_start = now;
        let mut newest_end = 0;
        for tombstone in &tombstones {
            oldest_start = oldest_start.min(tombstone.start_time);
            newest_end = newest_end.max(tombstone.end_time);
        }

        Self {
            tombstones,
            oldest_start,
            newest_end,
        }
    }

    pub fn tombstones(&self) -> &[DeleteRequest] {
        &self.tombstones
    }

    pub fn oldest_start(&self) -> Timestamp {
        self.oldest_start
    }

    pub fn newest_end(&self) -> Timestamp {
        self.newest_end
    }

    pub fn len(&self) -> usize {
        self.tombstones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tombstones.is_empty()
    }

    /// Bounds-only pre-filter. `true` does not mean any series is affected.
    ///
    /// An empty set always answers `false`, whatever its bounds.
    pub fn has_tombstones_for_interval(&self, from: Timestamp, to: Timestamp) -> bool {
        !self.is_empty() && to >= self.oldest_start && from <= self.newest_end
    }

    /// Sub-intervals of `[from, to)` deleted for the series with `labels`.
    ///
    /// The result is sorted and its intervals neither overlap nor touch.
    pub fn get_deleted_intervals(
        &self,
        labels: &Labels,
        from: Timestamp,
        to: Timestamp,
    ) -> Intervals {
        if !self.has_tombstones_for_interval(from, to) {
            return Intervals::new();
        }

        let query = Interval::new(from, to);
        let mut deleted = Vec::new();
        for tombstone in &self.tombstones {
            let span = Interval::new(tombstone.start_time, tombstone.end_time);
            let Some(overlap) = span.overlap(&query) else {
                continue;
            };

            let matched = tombstone
                .matchers
                .iter()
                .any(|group| matches_labels(group, labels));
            if !matched {
                continue;
            }

            if overlap == query {
                return Intervals::single(query);
            }
            deleted.push(overlap);
        }

        Intervals::merge(deleted)
    }
}

/// Cached [`TombstonesSet`]s, refreshed in the background.
///
/// Only tenants that were queried at least once are refreshed. The refresh
/// task is spawned on construction, so a loader must be created inside a
/// Tokio runtime, and is shut down with [`TombstonesLoader::stop`]. Dropping
/// the loader signals the task too, without waiting for it.
pub struct TombstonesLoader {
    inner: Arc<LoaderInner>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    refresh_handle: Mutex<Option<JoinHandle<()>>>,
}

struct LoaderInner {
    tombstones: RwLock<HashMap<String, Arc<TombstonesSet>>>,
    store: DeleteStore,
    load_timeout: Duration,
}

impl std::fmt::Debug for TombstonesLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TombstonesLoader")
            .field("tombstones", &"RwLock<HashMap<String, Arc<TombstonesSet>>>")
            .field("store", &self.inner.store)
            .field("load_timeout", &self.inner.load_timeout)
            .finish()
    }
}

impl TombstonesLoader {
    pub fn new(store: DeleteStore, config: &DeleteStoreConfig) -> Self {
        let inner = Arc::new(LoaderInner {
            tombstones: RwLock::new(HashMap::new()),
            store,
            load_timeout: config.load_timeout,
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let refresh_handle = tokio::spawn(refresh_loop(
            inner.clone(),
            config.tombstones_reload_interval,
            shutdown_rx,
        ));

        Self {
            inner,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            refresh_handle: Mutex::new(Some(refresh_handle)),
        }
    }

    /// Pending tombstones of `tenant_id`, loaded on first use.
    pub async fn get_pending_tombstones(&self, tenant_id: &str) -> Result<Arc<TombstonesSet>> {
        if let Some(set) = self.inner.tombstones.read().await.get(tenant_id) {
            return Ok(set.clone());
        }

        let set = Arc::new(self.inner.load(tenant_id).await?);
        self.inner
            .tombstones
            .write()
            .await
            .insert(tenant_id.to_string(), set.clone());
        Ok(set)
    }

    /// Whether `tenant_id` currently has a cached snapshot.
    pub async fn is_cached(&self, tenant_id: &str) -> bool {
        self.inner.tombstones.read().await.contains_key(tenant_id)
    }

    /// Reload every cached tenant once, outside the periodic schedule.
    pub async fn reload(&self) {
        self.inner.reload_cached().await;
    }

    /// Stop the refresh task, letting an in-flight reload finish first.
    /// Later calls return immediately.
    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.refresh_handle.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Tombstones refresh task ended abnormally");
            }
        }
    }
}

impl Drop for TombstonesLoader {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.get_mut().take() {
            let _ = tx.send(());
        }
    }
}

impl LoaderInner {
    async fn load(&self, tenant_id: &str) -> Result<TombstonesSet> {
        let pending = tokio::time::timeout(
            self.load_timeout,
            self.store.get_pending_delete_requests_for_user(tenant_id),
        )
        .await
        .map_err(|_| StorageError::Timeout(self.load_timeout))??;

        let mut tombstones = Vec::with_capacity(pending.len());
        for mut request in pending {
            request.parse_matchers()?;
            tombstones.push(request);
        }

        debug!(tenant_id, tombstones = tombstones.len(), "Loaded pending tombstones");
        Ok(TombstonesSet::new(tombstones))
    }

    async fn reload_cached(&self) {
        let tenants: Vec<String> = self.tombstones.read().await.keys().cloned().collect();

        for tenant_id in tenants {
            match self.load(&tenant_id).await {
                Ok(set) => {
                    self.tombstones
                        .write()
                        .await
                        .insert(tenant_id, Arc::new(set));
                }
                Err(e) => {
                    warn!(
                        tenant_id = %tenant_id,
                        error = %e,
                        "Failed to reload tombstones, keeping previous snapshot"
                    );
                }
            }
        }
    }
}

async fn refresh_loop(
    inner: Arc<LoaderInner>,
    period: Duration,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => inner.reload_cached().await,
            _ = &mut shutdown_rx => {
                info!("Tombstones refresh task stopped");
                break;
            }
        }
    }
}
