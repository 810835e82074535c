//! Delete request records and their lifecycle.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Timestamp;
use crate::error::{DeletesError, Result};
use crate::matchers::{MatcherGroup, parse_metric_selector};

/// Lifecycle of a delete request. Variants are declared in lifecycle order
/// and serialize to the codes stored in the status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DeleteRequestStatus {
    #[serde(rename = "0")]
    Received,
    #[serde(rename = "1")]
    BuildingPlan,
    #[serde(rename = "2")]
    Deleting,
    #[serde(rename = "3")]
    Processed,
}

impl DeleteRequestStatus {
    /// Statuses of requests that still mask query results, in scan order.
    pub const PENDING: [DeleteRequestStatus; 3] = [
        DeleteRequestStatus::Received,
        DeleteRequestStatus::BuildingPlan,
        DeleteRequestStatus::Deleting,
    ];

    /// Code persisted as the value of the status record.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Received => "0",
            Self::BuildingPlan => "1",
            Self::Deleting => "2",
            Self::Processed => "3",
        }
    }

    pub fn from_code(code: &[u8]) -> Result<Self> {
        match code {
            b"0" => Ok(Self::Received),
            b"1" => Ok(Self::BuildingPlan),
            b"2" => Ok(Self::Deleting),
            b"3" => Ok(Self::Processed),
            other => Err(DeletesError::encoding(format!(
                "unknown status code {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    pub fn is_pending(&self) -> bool {
        !matches!(self, Self::Processed)
    }

    /// Forward-only transition table. Staying in the same status is allowed
    /// so that re-applying an update stays idempotent.
    pub fn can_transition_to(&self, next: DeleteRequestStatus) -> bool {
        next >= *self
    }
}

impl fmt::Display for DeleteRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received => write!(f, "received"),
            Self::BuildingPlan => write!(f, "building_plan"),
            Self::Deleting => write!(f, "deleting"),
            Self::Processed => write!(f, "processed"),
        }
    }
}

/// One user-submitted deletion intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub request_id: String,
    #[serde(skip)]
    pub user_id: String,
    /// Inclusive start, milliseconds since the Unix epoch
    pub start_time: Timestamp,
    /// Exclusive end, milliseconds since the Unix epoch
    pub end_time: Timestamp,
    /// Alternative selectors; a series is affected if it matches any of them
    pub selectors: Vec<String>,
    pub status: DeleteRequestStatus,
    /// Parsed form of `selectors`, filled by [`DeleteRequest::parse_matchers`]
    #[serde(skip)]
    pub matchers: Vec<MatcherGroup>,
    pub created_at: Timestamp,
}

impl DeleteRequest {
    /// Parse every selector into its matcher group. On error the previous
    /// matchers are left untouched.
    pub fn parse_matchers(&mut self) -> Result<()> {
        let matchers = self
            .selectors
            .iter()
            .map(|selector| parse_metric_selector(selector))
            .collect::<Result<Vec<_>>>()?;
        self.matchers = matchers;
        Ok(())
    }

    /// `"<UserID>:<RequestID>"`, the key shared by both records of a request.
    pub fn key(&self) -> String {
        request_key(&self.user_id, &self.request_id)
    }
}

pub(crate) fn request_key(user_id: &str, request_id: &str) -> String {
    format!("{user_id}:{request_id}")
}

/// The legal shapes of a delete request lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteRequestQuery {
    /// Every request of a user
    User { user_id: String },
    /// A single request, whatever its status
    UserRequest { user_id: String, request_id: String },
    /// Every request in a status, across users
    Status { status: DeleteRequestStatus },
    /// A user's requests in one status
    UserStatus {
        user_id: String,
        status: DeleteRequestStatus,
    },
    /// A single request, only if it is in the given status
    Exact {
        user_id: String,
        request_id: String,
        status: DeleteRequestStatus,
    },
}

/// Status change of an existing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequestUpdate {
    pub user_id: String,
    pub request_id: String,
    pub status: DeleteRequestStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        for status in [
            DeleteRequestStatus::Received,
            DeleteRequestStatus::BuildingPlan,
            DeleteRequestStatus::Deleting,
            DeleteRequestStatus::Processed,
        ] {
            let decoded = DeleteRequestStatus::from_code(status.code().as_bytes()).unwrap();
            assert_eq!(decoded, status);
        }

        assert!(DeleteRequestStatus::from_code(b"4").is_err());
        assert!(DeleteRequestStatus::from_code(b"").is_err());
    }

    #[test]
    fn test_pending_statuses() {
        assert!(DeleteRequestStatus::PENDING.iter().all(|s| s.is_pending()));
        assert!(!DeleteRequestStatus::Processed.is_pending());
    }

    #[test]
    fn test_forward_only_transitions() {
        use DeleteRequestStatus::*;

        assert!(Received.can_transition_to(BuildingPlan));
        assert!(Received.can_transition_to(Processed));
        assert!(Deleting.can_transition_to(Deleting));
        assert!(!Deleting.can_transition_to(Received));
        assert!(!Processed.can_transition_to(BuildingPlan));
    }

    #[test]
    fn test_status_serializes_as_code() {
        let json = serde_json::to_string(&DeleteRequestStatus::Deleting).unwrap();
        assert_eq!(json, "\"2\"");
    }

    #[test]
    fn test_parse_matchers_keeps_order() {
        let mut request = DeleteRequest {
            request_id: "0000abcd".to_string(),
            user_id: "user".to_string(),
            start_time: 0,
            end_time: 10,
            selectors: vec![r#"up{job="a"}"#.to_string(), r#"{job="b"}"#.to_string()],
            status: DeleteRequestStatus::Received,
            matchers: vec![],
            created_at: 0,
        };

        request.parse_matchers().unwrap();
        assert_eq!(request.matchers.len(), 2);
        assert!(request.matchers[1].iter().any(|m| m.value == "b"));
        assert_eq!(request.key(), "user:0000abcd");

        request.selectors.push("not a {selector".to_string());
        assert!(request.parse_matchers().is_err());
        assert_eq!(request.matchers.len(), 2);
    }
}
