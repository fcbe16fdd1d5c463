//! Gateway client module.
//!
//! This module provides the main entry point: a [`Client`] that keeps one
//! connection to the gateway alive and multiplexes requests over it.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Client`] | Connection plus request correlation |
//! | [`ClientBuilder`] | Fluent configuration builder |
//! | [`ClientOptions`] | Timeouts, backoff and limits |
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use gateway_link::{Client, Request, RequestOptions, Result};
//!
//! # async fn example() -> Result<()> {
//! let client = Client::builder()
//!     .request_timeout(Duration::from_secs(10))
//!     .build()?;
//!
//! client.connect("ws://127.0.0.1:8080", 3u32).await?;
//!
//! let _sub = client.on_device_discovered(|device| {
//!     println!("found {} ({:?})", device.address, device.name);
//! });
//!
//! client
//!     .issue_request(Request::new("scan.start"), RequestOptions::new().with_quiet())
//!     .await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for client configuration.
pub mod builder;

/// Core client implementation.
pub mod core;

/// Client options.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ClientBuilder;
pub use core::Client;
pub use options::ClientOptions;
