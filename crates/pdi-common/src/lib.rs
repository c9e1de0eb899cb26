//! PDI Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the PDI project.
//!
//! # Overview
//!
//! This crate provides common functionality used across all PDI workspace members:
//!
//! - **Error Handling**: The `PdiError` taxonomy and result type
//! - **Logging**: Centralized tracing initialization
//! - **Framing**: Length-prefixed control-plane wire codec
//! - **Types**: Control-plane payload types shared by daemon and ctl

pub mod channel;
pub mod error;
pub mod framing;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{PdiError, Result};
