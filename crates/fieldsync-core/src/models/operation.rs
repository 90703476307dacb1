//! Queued sync operation model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ConflictData;
use crate::error::{Error, Result};

/// Entity type assumed when a mutation does not name one.
pub const DEFAULT_ENTITY_TYPE: &str = "order";

/// Locally assigned, monotonically increasing operation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(i64);

impl OperationId {
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|_| Error::InvalidInput(format!("invalid operation id: {s}")))
    }
}

/// Lifecycle status of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    InProgress,
    Completed,
    Conflict,
    Failed,
}

impl OperationStatus {
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::InProgress,
        Self::Completed,
        Self::Conflict,
        Self::Failed,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Conflict => "CONFLICT",
            Self::Failed => "FAILED",
        }
    }

    /// Whether the operation can never be submitted again as-is.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Edges a stored operation row may take.
    ///
    /// Leaving CONFLICT or FAILED happens by replacing the row with a new
    /// operation, never by updating it in place.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (
                    Self::InProgress,
                    Self::Completed | Self::Pending | Self::Failed | Self::Conflict
                )
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| Error::InvalidInput(format!("unknown operation status: {s}")))
    }
}

/// HTTP verb captured with a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!(
                "unsupported HTTP method for a queued mutation: {other}"
            ))),
        }
    }
}

/// Identity of the entity an operation writes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub entity_type: String,
    pub entity_id: String,
}

impl EntityKey {
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

/// A mutation about to be appended to the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOperation {
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub entity_type: String,
    pub entity_id: String,
}

impl NewOperation {
    pub fn new(
        method: HttpMethod,
        url: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            priority: 0,
            max_retries: None,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Trim identity fields and reject mutations that cannot be attributed.
    pub fn normalized(mut self) -> Result<Self> {
        self.url = self.url.trim().to_string();
        if self.url.is_empty() {
            return Err(Error::InvalidInput("operation url cannot be empty".into()));
        }

        self.entity_id = self.entity_id.trim().to_string();
        if self.entity_id.is_empty() {
            return Err(Error::InvalidInput(
                "operation entity_id cannot be empty".into(),
            ));
        }

        self.entity_type = self.entity_type.trim().to_string();
        if self.entity_type.is_empty() {
            self.entity_type = DEFAULT_ENTITY_TYPE.to_string();
        }

        Ok(self)
    }

    pub fn entity_key(&self) -> EntityKey {
        EntityKey::new(self.entity_type.clone(), self.entity_id.clone())
    }
}

/// The HTTP intent submitted to the server for one operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationRequest {
    pub method: HttpMethod,
    pub url: String,
    pub body: Option<Value>,
}

/// One queued mutation as stored by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub id: OperationId,
    /// Position in its entity's write order; a conflict replacement takes over the original's
    pub sequence: i64,
    pub method: HttpMethod,
    pub url: String,
    pub body: Option<Value>,
    pub priority: i32,
    /// Enqueue time (Unix ms)
    pub timestamp: i64,
    pub retry_count: u32,
    /// Per-operation override of the global retry limit
    pub max_retries: Option<u32>,
    pub status: OperationStatus,
    pub last_error: Option<String>,
    pub entity_type: String,
    pub entity_id: String,
    pub conflict_data: Option<ConflictData>,
    /// Earliest time the operation may be claimed again (Unix ms)
    pub next_attempt_at: i64,
    /// Last status change (Unix ms)
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

impl SyncOperation {
    pub fn effective_max_retries(&self, global: u32) -> u32 {
        self.max_retries.unwrap_or(global)
    }

    /// The optimistic-concurrency version the operation was written against.
    pub fn body_version(&self) -> Option<i64> {
        self.body
            .as_ref()
            .and_then(|body| body.get("version"))
            .and_then(Value::as_i64)
    }

    pub fn entity_key(&self) -> EntityKey {
        EntityKey::new(self.entity_type.clone(), self.entity_id.clone())
    }

    pub const fn is_due(&self, now_ms: i64) -> bool {
        self.next_attempt_at <= now_ms
    }

    pub fn request(&self) -> OperationRequest {
        OperationRequest {
            method: self.method,
            url: self.url.clone(),
            body: self.body.clone(),
        }
    }

    /// Capture the same HTTP intent as a fresh mutation.
    pub fn replay(&self) -> NewOperation {
        NewOperation {
            method: self.method,
            url: self.url.clone(),
            body: self.body.clone(),
            priority: self.priority,
            max_retries: self.max_retries,
            entity_type: self.entity_type.clone(),
            entity_id: self.entity_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_roundtrips_through_strings() {
        for status in OperationStatus::ALL {
            assert_eq!(status.as_str().parse::<OperationStatus>().unwrap(), status);
        }
        assert_eq!(
            "in-progress".parse::<OperationStatus>().unwrap(),
            OperationStatus::InProgress
        );
        assert!("syncing".parse::<OperationStatus>().is_err());
    }

    #[test]
    fn no_status_skips_in_progress() {
        use OperationStatus::{Completed, Conflict, Failed, InProgress, Pending};

        for target in [Completed, Conflict, Failed] {
            assert!(!Pending.can_transition_to(target));
            assert!(InProgress.can_transition_to(target));
        }
        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Pending));
        for source in [Completed, Conflict, Failed] {
            for target in OperationStatus::ALL {
                assert!(!source.can_transition_to(target));
            }
        }
    }

    #[test]
    fn normalized_defaults_entity_type_and_requires_entity_id() {
        let op = NewOperation::new(HttpMethod::Put, " /orders/42 ", "  ", "42")
            .normalized()
            .unwrap();
        assert_eq!(op.entity_type, DEFAULT_ENTITY_TYPE);
        assert_eq!(op.url, "/orders/42");

        let missing = NewOperation::new(HttpMethod::Put, "/orders/42", "order", " ").normalized();
        assert!(matches!(missing, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn method_parse_is_case_insensitive() {
        assert_eq!("patch".parse::<HttpMethod>().unwrap(), HttpMethod::Patch);
        assert!("GET".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn body_version_reads_integer_version() {
        let op = SyncOperation {
            id: OperationId::new(1),
            sequence: 1,
            method: HttpMethod::Put,
            url: "/orders/42".to_string(),
            body: Some(json!({"version": 3, "status": "COMPLETED"})),
            priority: 0,
            timestamp: 0,
            retry_count: 0,
            max_retries: Some(2),
            status: OperationStatus::Pending,
            last_error: None,
            entity_type: "order".to_string(),
            entity_id: "42".to_string(),
            conflict_data: None,
            next_attempt_at: 0,
            updated_at: 0,
            completed_at: None,
        };

        assert_eq!(op.body_version(), Some(3));
        assert_eq!(op.effective_max_retries(5), 2);
        assert_eq!(op.replay().entity_key(), op.entity_key());
    }
}
