//! # DSR Circuits Common Library
//!
//! Shared code for the circuit enrichment tooling:
//! - Database schema and row models
//! - Bootstrap configuration loading
//! - Common error types
//! - Timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};
