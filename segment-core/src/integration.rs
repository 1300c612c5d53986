//! Fan-out of messages to local integrations
//!
//! A message's `integrations` map decides which integrations see it:
//! - `"All": false` turns every integration off by default
//! - `"<name>": true|false` turns one integration on or off
//! - `"<name>": {..}` (integration options) turns it on

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::message::{Message, Properties};

/// Key in a message's `integrations` map that sets the default for all integrations
pub const ALL_INTEGRATIONS_KEY: &str = "All";

/// A destination that receives every enabled message alongside the upload
///
/// Called on the enqueuing thread; implementations should hand off their
/// own I/O rather than block.
pub trait Integration: Send + Sync {
    /// Name matched against keys of a message's `integrations` map
    fn name(&self) -> &str;

    fn enqueue(&self, message: &Message) -> Result<()>;
}

/// Dispatches messages to every enabled integration
#[derive(Default, Clone)]
pub struct IntegrationRouter {
    integrations: Vec<Arc<dyn Integration>>,
}

impl IntegrationRouter {
    /// Create a router. Integration names must be unique.
    pub fn new(integrations: Vec<Arc<dyn Integration>>) -> Result<Self> {
        let mut router = Self::default();
        for integration in integrations {
            router.register(integration)?;
        }
        Ok(router)
    }

    /// Add an integration; fails if one with the same name is registered.
    pub fn register(&mut self, integration: Arc<dyn Integration>) -> Result<()> {
        if self
            .integrations
            .iter()
            .any(|existing| existing.name() == integration.name())
        {
            return Err(Error::Config(format!(
                "integration {:?} is already registered",
                integration.name()
            )));
        }
        self.integrations.push(integration);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.integrations.is_empty()
    }

    /// Send `message` to each integration its options enable.
    ///
    /// A failing integration is logged and skipped; the rest still receive
    /// the message. Returns how many integrations accepted it.
    pub fn route(&self, message: &Message) -> usize {
        let options = message.integrations();
        let mut delivered = 0;

        for integration in &self.integrations {
            let name = integration.name();
            if !is_enabled(options, name) {
                tracing::trace!(integration = name, "Integration disabled for message");
                continue;
            }

            match integration.enqueue(message) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(
                    integration = name,
                    message_id = %message.message_id(),
                    error = %e,
                    "Integration failed to enqueue message"
                ),
            }
        }

        delivered
    }
}

/// Whether the integration `name` is enabled by a message's `integrations` map
pub fn is_enabled(options: &Properties, name: &str) -> bool {
    match options.get(name) {
        Some(value) => value.as_bool().unwrap_or(true),
        None => options
            .get(ALL_INTEGRATIONS_KEY)
            .and_then(|all| all.as_bool())
            .unwrap_or(true),
    }
}
