//! fieldsync-core - Offline mutation queue for field clients
//!
//! Local writes are captured as operations in a durable libSQL queue and
//! drained to the server when connectivity allows. Version conflicts are
//! parked for explicit resolution instead of being retried.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod queue;
pub mod sync;
pub mod util;

pub use config::{ClientConfig, ConfigError, SyncConfig};
pub use error::{Error, Result};
pub use models::{OperationId, OperationStatus, SyncOperation};
pub use queue::QueueStore;
