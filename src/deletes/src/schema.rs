//! Two-record layout of delete requests on top of the index.
//!
//! Every request is persisted as:
//!
//! * a **status record**: hash value `""`, range value `"<user>:<request>"`,
//!   value the status code;
//! * a **detail record**: hash value `"<user>:<request>"`, range value
//!   `"<created>:<start>:<end>"` with each timestamp hex encoded, value the
//!   selectors joined with `&`.
//!
//! Status-only and user-only scans therefore never read selector payloads.

use chrono::{DateTime, Utc};

use crate::Timestamp;
use crate::error::{DeletesError, Result};
use crate::index::{IndexQuery, WriteBatch};
use crate::request::{DeleteRequest, DeleteRequestQuery, DeleteRequestStatus, request_key};

const SELECTOR_SEPARATOR: &str = "&";
const KEY_SEPARATOR: char = ':';

const FNV32_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV32_PRIME: u32 = 16_777_619;

/// Request ID derived from the user, the submission instant and the selectors.
///
/// FNV-1 32 bit over the user bytes, the little-endian nanosecond timestamp
/// and every selector, rendered as 8 lowercase hex characters. Collisions are
/// neither detected nor resolved.
pub fn generate_unique_id(user_id: &str, now_nanos: i64, selectors: &[String]) -> String {
    let mut hash = FNV32_OFFSET_BASIS;
    let mut write = |bytes: &[u8]| {
        for byte in bytes {
            hash = hash.wrapping_mul(FNV32_PRIME);
            hash ^= u32::from(*byte);
        }
    };

    write(user_id.as_bytes());
    write(&now_nanos.to_le_bytes());
    for selector in selectors {
        write(selector.as_bytes());
    }

    hex::encode(hash.to_be_bytes())
}

/// Build a freshly received request submitted at `now`.
pub fn new_delete_request(
    user_id: &str,
    start_time: Timestamp,
    end_time: Timestamp,
    selectors: Vec<String>,
    now: DateTime<Utc>,
) -> DeleteRequest {
    let nanos = now.timestamp_nanos_opt().unwrap_or(i64::MAX);
    DeleteRequest {
        request_id: generate_unique_id(user_id, nanos, &selectors),
        user_id: user_id.to_string(),
        start_time,
        end_time,
        selectors,
        status: DeleteRequestStatus::Received,
        matchers: Vec::new(),
        created_at: now.timestamp_millis(),
    }
}

/// Hex rendering of a signed timestamp; negative values keep a leading `-`.
pub fn encode_timestamp(ts: Timestamp) -> String {
    if ts < 0 {
        format!("-{:x}", ts.unsigned_abs())
    } else {
        format!("{ts:x}")
    }
}

pub fn decode_timestamp(field: &str) -> Result<Timestamp> {
    if field.is_empty() || field.starts_with('+') {
        return Err(DeletesError::encoding(format!(
            "invalid hex timestamp {field:?}"
        )));
    }
    Timestamp::from_str_radix(field, 16)
        .map_err(|e| DeletesError::encoding(format!("invalid hex timestamp {field:?}: {e}")))
}

/// Fields recovered from a detail record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDetails {
    pub created_at: Timestamp,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub selectors: Vec<String>,
}

/// Key and value layout of one delete requests table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequestsSchema {
    table_name: String,
}

impl DeleteRequestsSchema {
    pub fn new(table_name: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Queue both records of a new request.
    pub fn add_request_entries(&self, batch: &mut WriteBatch, request: &DeleteRequest) {
        let key = request.key();
        batch.add(&self.table_name, "", key.as_bytes(), request.status.code());
        batch.add(
            &self.table_name,
            &key,
            detail_range_value(request.created_at, request.start_time, request.end_time),
            request.selectors.join(SELECTOR_SEPARATOR),
        );
    }

    /// Queue an overwrite of the status record only.
    pub fn add_status_entry(
        &self,
        batch: &mut WriteBatch,
        user_id: &str,
        request_id: &str,
        status: DeleteRequestStatus,
    ) {
        batch.add(
            &self.table_name,
            "",
            request_key(user_id, request_id),
            status.code(),
        );
    }

    /// Scan of the status records selected by `query`.
    ///
    /// Prefixes end with the key separator so that user `a` never matches
    /// the records of user `ab`. Point lookups still have to compare the
    /// decoded key exactly.
    pub fn status_query(&self, query: &DeleteRequestQuery) -> IndexQuery {
        let scan = IndexQuery::new(&self.table_name, "");
        match query {
            DeleteRequestQuery::User { user_id } => {
                scan.with_range_prefix(format!("{user_id}{KEY_SEPARATOR}"))
            }
            DeleteRequestQuery::UserRequest {
                user_id,
                request_id,
            } => scan.with_range_prefix(request_key(user_id, request_id)),
            DeleteRequestQuery::Status { status } => scan.with_value_equal(status.code()),
            DeleteRequestQuery::UserStatus { user_id, status } => scan
                .with_range_prefix(format!("{user_id}{KEY_SEPARATOR}"))
                .with_value_equal(status.code()),
            DeleteRequestQuery::Exact {
                user_id,
                request_id,
                status,
            } => scan
                .with_range_prefix(request_key(user_id, request_id))
                .with_value_equal(status.code()),
        }
    }

    /// Point lookup of the detail record of one request.
    pub fn detail_query(&self, user_id: &str, request_id: &str) -> IndexQuery {
        IndexQuery::new(&self.table_name, &request_key(user_id, request_id))
    }
}

pub fn detail_range_value(created_at: Timestamp, start: Timestamp, end: Timestamp) -> String {
    format!(
        "{}{KEY_SEPARATOR}{}{KEY_SEPARATOR}{}",
        encode_timestamp(created_at),
        encode_timestamp(start),
        encode_timestamp(end)
    )
}

/// Split a status record range value into `(user, request)`.
pub fn decode_status_key(range_value: &[u8]) -> Result<(String, String)> {
    let key = std::str::from_utf8(range_value)
        .map_err(|e| DeletesError::encoding(format!("status key is not UTF-8: {e}")))?;
    match key.rsplit_once(KEY_SEPARATOR) {
        Some((user_id, request_id)) if !request_id.is_empty() => {
            Ok((user_id.to_string(), request_id.to_string()))
        }
        _ => Err(DeletesError::encoding(format!(
            "status key {key:?} is not <user>:<request>"
        ))),
    }
}

/// Decode a detail record. The range value must hold exactly three hex fields.
pub fn decode_details(range_value: &[u8], value: &[u8]) -> Result<RequestDetails> {
    let range = std::str::from_utf8(range_value)
        .map_err(|e| DeletesError::encoding(format!("detail key is not UTF-8: {e}")))?;

    let fields: Vec<&str> = range.split(KEY_SEPARATOR).collect();
    let [created_at, start_time, end_time] = fields.as_slice() else {
        return Err(DeletesError::encoding(format!(
            "detail key {range:?} has {} fields, expected 3",
            fields.len()
        )));
    };

    let selectors = std::str::from_utf8(value)
        .map_err(|e| DeletesError::encoding(format!("selectors are not UTF-8: {e}")))?;
    let selectors = if selectors.is_empty() {
        Vec::new()
    } else {
        selectors
            .split(SELECTOR_SEPARATOR)
            .map(str::to_string)
            .collect()
    };

    Ok(RequestDetails {
        created_at: decode_timestamp(created_at)?,
        start_time: decode_timestamp(start_time)?,
        end_time: decode_timestamp(end_time)?,
        selectors,
    })
}
