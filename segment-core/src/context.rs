//! Interceptor that stamps library and platform details onto `context`

use serde_json::{json, Value};

use crate::chain::{Chain, Interceptor};
use crate::message::builder::MessageBuilder;
use crate::message::{Message, Properties};
use crate::transport::Pending;

/// Name reported in `context.library.name`
pub const LIBRARY_NAME: &str = "segment-rs";

/// Adds `context.library` and `context.os` to every message.
///
/// Keys the caller already set are left untouched.
#[derive(Debug, Clone)]
pub struct ContextInterceptor {
    defaults: Properties,
}

impl ContextInterceptor {
    pub fn new() -> Self {
        let mut defaults = Properties::new();
        defaults.insert(
            "library".to_string(),
            json!({ "name": LIBRARY_NAME, "version": env!("CARGO_PKG_VERSION") }),
        );
        defaults.insert(
            "os".to_string(),
            json!({ "name": std::env::consts::OS, "arch": std::env::consts::ARCH }),
        );
        Self { defaults }
    }

    /// Add an extra default context entry, e.g. `app` or `device`.
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.defaults.insert(key.into(), value);
        self
    }

    fn stamp(&self, message: &Message) -> crate::error::Result<Message> {
        let mut context = message.context().cloned().unwrap_or_default();
        for (key, value) in &self.defaults {
            context
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        message.to_builder().context(context).build()
    }
}

impl Default for ContextInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Interceptor for ContextInterceptor {
    fn intercept(&self, chain: Chain<'_>) -> Option<Pending<Message>> {
        match self.stamp(chain.message()) {
            Ok(message) => chain.proceed(message),
            Err(e) => {
                tracing::warn!(error = %e, "Could not add context, forwarding message as is");
                chain.proceed(chain.message().clone())
            }
        }
    }
}
