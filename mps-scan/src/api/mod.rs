//! HTTP API handlers for mps-scan

pub mod health;
pub mod profiles;
pub mod scans;
pub mod sse;

pub use health::health_routes;
pub use profiles::profile_routes;
pub use scans::scan_routes;
pub use sse::scan_event_stream;
