//! Version conflict models

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Snapshot of a detected optimistic-concurrency conflict.
///
/// `server_version` never equals `local_version` for a recorded conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictData {
    pub entity_type: String,
    pub entity_id: String,
    pub server_version: i64,
    pub local_version: i64,
    /// Entity state reported by the server
    pub server_data: Value,
    /// Body the operation tried to write
    pub local_data: Value,
    /// Detection time (Unix ms)
    pub timestamp: i64,
}

/// How a human chose to settle a conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictResolution {
    /// Drop the local write and adopt the server state.
    KeepServer,
    /// Re-submit the local body against the server's version.
    KeepLocal,
    /// Submit a caller-provided body against the server's version.
    Merge(Value),
}

impl ConflictResolution {
    pub const fn strategy(&self) -> ResolutionStrategy {
        match self {
            Self::KeepServer => ResolutionStrategy::KeepServer,
            Self::KeepLocal => ResolutionStrategy::KeepLocal,
            Self::Merge(_) => ResolutionStrategy::Merge,
        }
    }

    /// Build a resolution from a strategy name and an optional merged body.
    pub fn from_parts(strategy: ResolutionStrategy, merged_body: Option<Value>) -> Result<Self> {
        match (strategy, merged_body) {
            (ResolutionStrategy::KeepServer, None) => Ok(Self::KeepServer),
            (ResolutionStrategy::KeepLocal, None) => Ok(Self::KeepLocal),
            (ResolutionStrategy::Merge, Some(body)) if body.is_object() => Ok(Self::Merge(body)),
            (ResolutionStrategy::Merge, Some(_)) => Err(Error::InvalidInput(
                "merged body must be a JSON object".into(),
            )),
            (ResolutionStrategy::Merge, None) => Err(Error::InvalidInput(
                "merge resolution requires a merged body".into(),
            )),
            (strategy, Some(_)) => Err(Error::InvalidInput(format!(
                "{strategy} resolution does not take a body"
            ))),
        }
    }
}

/// Resolution kind without payload, as stored in the resolution log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStrategy {
    KeepServer,
    KeepLocal,
    Merge,
}

impl ResolutionStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::KeepServer => "keep-server",
            Self::KeepLocal => "keep-local",
            Self::Merge => "merge",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "keep-server" | "keepserver" => Ok(Self::KeepServer),
            "keep-local" | "keeplocal" => Ok(Self::KeepLocal),
            "merge" => Ok(Self::Merge),
            other => Err(Error::InvalidInput(format!(
                "unknown resolution strategy: {other}"
            ))),
        }
    }
}

/// Audit row written whenever a conflict is resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResolutionRecord {
    pub id: i64,
    pub operation_id: i64,
    pub entity_type: String,
    pub entity_id: String,
    pub server_version: i64,
    pub local_version: i64,
    pub strategy: ResolutionStrategy,
    /// Operation enqueued in place of the conflicting one, if any
    pub replacement_operation_id: Option<i64>,
    /// Resolution timestamp (Unix ms)
    pub resolved_at: i64,
}
