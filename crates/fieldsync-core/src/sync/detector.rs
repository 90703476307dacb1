//! Response classification and version conflict detection

use serde_json::Value;
use thiserror::Error;

use super::transport::TransportResponse;
use crate::models::{ConflictData, SyncOperation, DEFAULT_ENTITY_TYPE};
use crate::util::{compact_text, unix_millis_now};

/// Server error code for a stale `version` on write.
pub const VERSION_CONFLICT_CODE: &str = "E2006";
/// Server error code for an illegal entity status transition.
pub const INVALID_TRANSITION_CODE: &str = "E2001";

/// What the processor should do with a server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseClass {
    Success,
    Conflict,
    Retryable(String),
    Rejected(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DetectorError {
    #[error("conflict response is missing `{0}`")]
    MissingField(&'static str),
    #[error("conflict response field `{field}` must be {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },
    #[error("operation body has no integer `version`")]
    MissingLocalVersion,
    #[error("server and local versions are both {0}")]
    NotAConflict(i64),
}

/// Error fields read independently: one malformed field never hides the others.
#[derive(Debug, Default)]
struct ErrorBody {
    code: Option<String>,
    error: Option<String>,
    message: Option<String>,
}

fn error_body(response: &TransportResponse) -> ErrorBody {
    let text = |field: &str| {
        response
            .body
            .get(field)
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    ErrorBody {
        code: text("code"),
        error: text("error"),
        message: text("message"),
    }
}

/// Human-readable summary of a failed response, e.g. `E2001: bad transition (HTTP 422)`.
pub fn describe_failure(response: &TransportResponse) -> String {
    let body = error_body(response);
    let detail = body
        .message
        .or(body.error)
        .map(|text| compact_text(&text))
        .filter(|text| !text.is_empty())
        .or_else(|| Some(compact_text(&response.text)).filter(|text| !text.is_empty()));

    match (body.code, detail) {
        (Some(code), Some(detail)) => format!("{code}: {detail} (HTTP {})", response.status),
        (Some(code), None) => format!("{code} (HTTP {})", response.status),
        (None, Some(detail)) => format!("{detail} (HTTP {})", response.status),
        (None, None) => format!("HTTP {}", response.status),
    }
}

/// Map a server reply onto the queue's response policy.
pub fn classify_response(response: &TransportResponse) -> ResponseClass {
    if response.is_success() {
        return ResponseClass::Success;
    }

    let body = error_body(response);
    let conflict_code = [body.code.as_deref(), body.error.as_deref()]
        .into_iter()
        .flatten()
        .any(|code| code.trim() == VERSION_CONFLICT_CODE);
    if response.status == 409 || conflict_code {
        return ResponseClass::Conflict;
    }

    match response.status {
        408 | 429 | 500..=599 => ResponseClass::Retryable(describe_failure(response)),
        400..=499 => ResponseClass::Rejected(describe_failure(response)),
        _ => ResponseClass::Retryable(describe_failure(response)),
    }
}

/// Build `ConflictData` from a conflict reply to `op`.
///
/// Expects `{ currentVersion: integer, currentState: object }` in the body.
pub fn detect_conflict(
    op: &SyncOperation,
    response: &TransportResponse,
) -> Result<ConflictData, DetectorError> {
    let server_version = match response.body.get("currentVersion") {
        None | Some(Value::Null) => return Err(DetectorError::MissingField("currentVersion")),
        Some(value) => value.as_i64().ok_or(DetectorError::InvalidField {
            field: "currentVersion",
            expected: "an integer",
        })?,
    };
    let server_data = match response.body.get("currentState") {
        None | Some(Value::Null) => return Err(DetectorError::MissingField("currentState")),
        Some(value) if value.is_object() => value.clone(),
        Some(_) => {
            return Err(DetectorError::InvalidField {
                field: "currentState",
                expected: "an object",
            })
        }
    };

    create_conflict_data(op, server_version, server_data)
}

/// Snapshot a conflict between `op`'s body and the server's state.
pub fn create_conflict_data(
    op: &SyncOperation,
    server_version: i64,
    server_data: Value,
) -> Result<ConflictData, DetectorError> {
    let local_version = op.body_version().ok_or(DetectorError::MissingLocalVersion)?;
    if local_version == server_version {
        return Err(DetectorError::NotAConflict(server_version));
    }

    let entity_type = match op.entity_type.trim() {
        "" => DEFAULT_ENTITY_TYPE.to_string(),
        entity_type => entity_type.to_string(),
    };

    Ok(ConflictData {
        entity_type,
        entity_id: op.entity_id.clone(),
        server_version,
        local_version,
        server_data,
        local_data: op.body.clone().unwrap_or(Value::Null),
        timestamp: unix_millis_now(),
    })
}
