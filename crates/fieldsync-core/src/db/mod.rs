//! Persistence layer for the operation queue and entity cache

mod cache_repository;
mod connection;
mod migrations;
mod operation_repository;
mod row_ext;

pub use cache_repository::{EntityCacheRepository, LibSqlEntityCacheRepository};
pub use connection::Database;
pub(crate) use connection::{begin_write, finish};
pub use operation_repository::{LibSqlOperationRepository, OperationRepository};
