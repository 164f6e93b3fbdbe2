//! Utility modules for mps-scan

pub mod db_retry;

pub use db_retry::retry_once;
