//! # segment-core
//!
//! Core library for segment - a client-side analytics event pipeline.
//!
//! This library provides:
//! - Typed messages (`track`, `identify`, `group`, `screen`, `alias`) with
//!   validating builders
//! - An interceptor chain and integration fan-out
//! - A durable queue (SQLite) drained in size-bounded batches by a
//!   background transporter
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! A message flows through four stages:
//! - **Build:** the builder validates fields and fills defaults
//! - **Intercept:** interceptors run in order on the caller's thread
//! - **Persist:** the transporter worker appends the encoded message to the queue
//! - **Upload:** flushes send the oldest messages as one batch and commit on success
//!
//! ## Example
//!
//! ```rust,no_run
//! use segment_core::{AnalyticsBuilder, Config};
//!
//! let config = Config::load().expect("failed to load config");
//! let analytics = AnalyticsBuilder::from_config(config.client)
//!     .build()
//!     .expect("failed to start client");
//! println!("queued: {}", analytics.queue_size().wait().expect("worker stopped"));
//! ```

// Re-export commonly used items at the crate root
pub use client::{Analytics, AnalyticsBuilder};
pub use config::{ClientConfig, Config};
pub use db::Database;
pub use error::{Error, Result};
pub use message::{Message, MessageType, Payload, Properties};
pub use transport::{Callback, Pending, Stage, TransportOptions, Transporter};

// Public modules
pub mod chain;
pub mod client;
pub mod codec;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod identity;
pub mod integration;
pub mod logging;
pub mod message;
pub mod queue;
pub mod transport;

/// Everything needed to build and send messages
pub mod prelude {
    pub use crate::chain::{Chain, Interceptor};
    pub use crate::client::{Analytics, AnalyticsBuilder};
    pub use crate::context::ContextInterceptor;
    pub use crate::integration::Integration;
    pub use crate::message::builder::{
        AliasBuilder, GroupBuilder, IdentifyBuilder, MessageBuilder, ScreenBuilder, TrackBuilder,
    };
    pub use crate::message::{Message, Payload, Properties};
    pub use crate::transport::{Callback, Pending, Stage};
}
