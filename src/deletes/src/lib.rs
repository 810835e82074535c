//! Tombstone based logical deletion of series data.
//!
//! Users submit delete requests made of label selectors and a time range.
//! They are persisted by the [`DeleteStore`] on top of an [`IndexClient`],
//! cached per tenant by the [`TombstonesLoader`], and applied at query time
//! through [`TombstonesSet::get_deleted_intervals`], which returns the parts
//! of a query range that must be masked for a given series.

pub mod error;
pub mod index;
pub mod intervals;
pub mod matchers;
pub mod request;
pub mod schema;
pub mod storage;
pub mod store;
pub mod tombstones;

/// Milliseconds since the Unix epoch
pub type Timestamp = i64;

pub use error::{DeletesError, Result, StorageError};
pub use index::{IndexClient, MemoryIndexClient, SqliteIndexClient};
pub use intervals::{Interval, Intervals};
pub use matchers::{LabelMatcher, Labels, MatcherGroup, MatcherOp, parse_metric_selector};
pub use request::{DeleteRequest, DeleteRequestQuery, DeleteRequestStatus, DeleteRequestUpdate};
pub use storage::{DeleteRequestsStorage, IndexDeleteRequestsStorage};
pub use store::DeleteStore;
pub use tombstones::{TombstonesLoader, TombstonesSet};
