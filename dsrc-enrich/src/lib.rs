//! dsrc-enrich library interface
//!
//! Exposes the enrichment services for the binary and integration tests.

pub mod db;
pub mod error;
pub mod services;
pub mod utils;

pub use crate::error::{EnrichError, EnrichResult};
