//! Queue draining: transport seam, conflict detection, backoff and scheduling

pub mod backoff;
pub mod connectivity;
pub mod detector;
mod processor;
pub mod transport;

pub use connectivity::{ConnectivityMonitor, ConnectivitySubscription, HttpProbe};
pub use detector::{
    classify_response, create_conflict_data, detect_conflict, DetectorError, ResponseClass,
};
pub use processor::{DrainOutcome, DrainReport, SyncHandle, SyncProcessor};
pub use transport::{HttpTransport, SyncTransport, TransportError, TransportResponse};
