//! Data models for fieldsync

mod conflict;
mod entity;
mod operation;

pub use conflict::{ConflictData, ConflictResolution, ConflictResolutionRecord, ResolutionStrategy};
pub use entity::{merge_json, with_version, CachedEntity};
pub use operation::{
    EntityKey, HttpMethod, NewOperation, OperationId, OperationRequest, OperationStatus,
    SyncOperation, DEFAULT_ENTITY_TYPE,
};
