//! Core types and utilities for the premium monitor
//!
//! This crate provides shared types used across all components:
//! - Symbols, foreign ticks and domestic observations
//! - Canonical ticker records and published snapshots
//! - Static symbol and instrument-code tables
//! - Premium math
//! - Configuration and error types

pub mod types;
pub mod symbols;
pub mod premium;
pub mod records;
pub mod config;
pub mod errors;

pub use types::*;
pub use records::*;
pub use config::*;
pub use errors::*;
