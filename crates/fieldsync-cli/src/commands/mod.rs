pub mod cache;
pub mod common;
pub mod completions;
pub mod config;
pub mod conflicts;
pub mod enqueue;
pub mod failed;
pub mod list;
pub mod status;
pub mod sync;
