use axum::{
    Json, Router,
    extract::{RawQuery, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use deletes::{DeleteRequest, Timestamp, parse_metric_selector};
use serde::Serialize;

use crate::{ApiError, RouterState, TENANT_HEADER};

pub fn router<S: RouterState>() -> Router<S> {
    Router::new()
        .route(
            "/admin/tsdb/delete_series",
            get(get_all_delete_requests::<S>).post(add_delete_request::<S>),
        )
        .route("/admin/tsdb/tombstones", get(get_pending_tombstones::<S>))
}

/// Parameters of a delete series submission, as found in the query string
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DeleteSeriesParams {
    pub selectors: Vec<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

impl DeleteSeriesParams {
    /// Collect repeated `match[]` values; for `start` and `end` the first value wins.
    pub fn from_query(query: Option<&str>) -> Self {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
            match key.as_ref() {
                "match[]" => params.selectors.push(value.into_owned()),
                "start" if params.start.is_none() => params.start = Some(value.into_owned()),
                "end" if params.end.is_none() => params.end = Some(value.into_owned()),
                _ => {}
            }
        }
        params
    }
}

/// A submission that passed validation
#[derive(Debug, PartialEq, Eq)]
pub struct ValidDeleteSeries {
    pub selectors: Vec<String>,
    pub start: Timestamp,
    pub end: Timestamp,
}

/// Validate a submission against the current time `now` (milliseconds).
pub fn validate_delete_series(
    params: DeleteSeriesParams,
    now: Timestamp,
) -> Result<ValidDeleteSeries, String> {
    if params.selectors.is_empty() {
        return Err("selectors not set".to_string());
    }
    for selector in &params.selectors {
        parse_metric_selector(selector).map_err(|e| e.to_string())?;
    }

    let start = match params.start.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => parse_time(raw)?,
        None => 0,
    };
    let end = match params.end.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => {
            let end = parse_time(raw)?;
            if end > now {
                return Err("deletes in future not allowed".to_string());
            }
            end
        }
        None => now,
    };
    if start > end {
        return Err("start time can't be greater than end time".to_string());
    }

    Ok(ValidDeleteSeries {
        selectors: params.selectors,
        start,
        end,
    })
}

/// Parse Unix seconds (fractions allowed) or an RFC 3339 timestamp into milliseconds.
pub fn parse_time(raw: &str) -> Result<Timestamp, String> {
    if let Ok(seconds) = raw.parse::<f64>() {
        if !seconds.is_finite() {
            return Err(format!("cannot parse {raw:?} to a valid timestamp"));
        }
        return Ok((seconds * 1000.0).round() as Timestamp);
    }

    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.timestamp_millis())
        .map_err(|_| format!("cannot parse {raw:?} to a valid timestamp"))
}

fn error_response(status: StatusCode, error: &str, message: impl Into<String>) -> Response {
    (status, Json(ApiError::new(error, message))).into_response()
}

fn tenant_id(headers: &HeaderMap) -> Result<String, Response> {
    headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            error_response(
                StatusCode::BAD_REQUEST,
                "validation_error",
                format!("missing {TENANT_HEADER} header"),
            )
        })
}

/// POST /admin/tsdb/delete_series
///
/// Record a delete request for the calling tenant
#[tracing::instrument(skip_all)]
pub async fn add_delete_request<S: RouterState>(
    State(state): State<S>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    let tenant_id = match tenant_id(&headers) {
        Ok(tenant_id) => tenant_id,
        Err(response) => return response,
    };

    let params = DeleteSeriesParams::from_query(query.as_deref());
    let request = match validate_delete_series(params, Utc::now().timestamp_millis()) {
        Ok(request) => request,
        Err(message) => {
            return error_response(StatusCode::BAD_REQUEST, "validation_error", message);
        }
    };

    match state
        .delete_store()
        .add_delete_request(&tenant_id, request.start, request.end, request.selectors)
        .await
    {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            log::error!("Failed to add delete request for tenant {tenant_id}: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e.to_string())
        }
    }
}

/// GET /admin/tsdb/delete_series
///
/// List every delete request of the calling tenant
#[tracing::instrument(skip_all)]
pub async fn get_all_delete_requests<S: RouterState>(
    State(state): State<S>,
    headers: HeaderMap,
) -> Response {
    let tenant_id = match tenant_id(&headers) {
        Ok(tenant_id) => tenant_id,
        Err(response) => return response,
    };

    match state
        .delete_store()
        .get_all_delete_requests_for_user(&tenant_id)
        .await
    {
        Ok(requests) => (StatusCode::OK, Json(requests)).into_response(),
        Err(e) => {
            log::error!("Failed to list delete requests for tenant {tenant_id}: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e.to_string())
        }
    }
}

/// Cached snapshot of a tenant's pending tombstones
#[derive(Debug, Serialize)]
pub struct TombstonesResponse {
    pub oldest_start: Timestamp,
    pub newest_end: Timestamp,
    pub tombstones: Vec<DeleteRequest>,
}

/// GET /admin/tsdb/tombstones
///
/// Pending tombstones of the calling tenant as currently cached
#[tracing::instrument(skip_all)]
pub async fn get_pending_tombstones<S: RouterState>(
    State(state): State<S>,
    headers: HeaderMap,
) -> Response {
    let tenant_id = match tenant_id(&headers) {
        Ok(tenant_id) => tenant_id,
        Err(response) => return response,
    };

    match state.tombstones().get_pending_tombstones(&tenant_id).await {
        Ok(set) => (
            StatusCode::OK,
            Json(TombstonesResponse {
                oldest_start: set.oldest_start(),
                newest_end: set.newest_end(),
                tombstones: set.tombstones().to_vec(),
            }),
        )
            .into_response(),
        Err(e) => {
            log::error!("Failed to load tombstones for tenant {tenant_id}: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e.to_string())
        }
    }
}
