//! # MPS Common Library
//!
//! Shared code for the missing person scan services:
//! - Error type shared across crates
//! - Scan lifecycle events and the broadcast event bus
//! - Configuration loading and root folder resolution
//! - SSE stream helpers

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
pub use events::{EventBus, ScanEvent};
