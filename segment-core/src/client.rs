//! Client facade
//!
//! [`Analytics`] ties the pieces together: message factories pre-filled with
//! the cached identity, the interceptor chain, integration fan-out and the
//! background transporter.
//!
//! ```rust,no_run
//! use segment_core::prelude::*;
//!
//! # fn main() -> segment_core::Result<()> {
//! let analytics = Analytics::builder("my-write-key")
//!     .interceptor(std::sync::Arc::new(ContextInterceptor::new()))?
//!     .build()?;
//!
//! let message = analytics
//!     .new_track("Signed Up")?
//!     .property("plan", "pro")
//!     .build()?;
//! if let Some(pending) = analytics.enqueue(message) {
//!     pending.wait()?;
//! }
//! analytics.flush().wait()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use uuid::Uuid;

use crate::chain::{Interceptor, Pipeline};
use crate::config::{ClientConfig, Config};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::identity::{IdentityStore, ANONYMOUS_ID_KEY, USER_ID_KEY};
use crate::integration::{Integration, IntegrationRouter};
use crate::message::builder::{
    require_non_empty, AliasBuilder, GroupBuilder, IdentifyBuilder, MessageBuilder,
    ScreenBuilder, TrackBuilder,
};
use crate::message::{Message, Properties};
use crate::queue::DurableQueue;
use crate::transport::{
    BatchUploader, Callback, HttpUploader, Pending, TransportOptions, Transporter,
};

/// Entry point for recording and delivering messages
pub struct Analytics {
    pipeline: Pipeline,
    transporter: Arc<Transporter>,
    identity: Arc<dyn IdentityStore>,
}

impl Analytics {
    /// Start configuring a client for `write_key`
    pub fn builder(write_key: impl Into<String>) -> AnalyticsBuilder {
        AnalyticsBuilder::new(write_key)
    }

    /// Fill in the cached anonymousId and, when known, the userId.
    fn lift<B: MessageBuilder>(&self, builder: B) -> Result<B> {
        let builder = builder.anonymous_id(self.anonymous_id()?)?;
        match self.user_id()? {
            Some(user_id) => builder.user_id(user_id),
            None => Ok(builder),
        }
    }

    /// Record an action the user performed.
    pub fn new_track(&self, event: impl Into<String>) -> Result<TrackBuilder> {
        self.lift(TrackBuilder::new())?.event(event)
    }

    /// Record a screen view.
    pub fn new_screen(&self, name: impl Into<String>) -> Result<ScreenBuilder> {
        self.lift(ScreenBuilder::new())?.name(name)
    }

    /// Associate the user with a group.
    pub fn new_group(&self, group_id: impl Into<String>) -> Result<GroupBuilder> {
        self.lift(GroupBuilder::new())?.group_id(group_id)
    }

    /// Tie the user to `user_id`, which is remembered for every later message.
    pub fn new_identify(&self, user_id: impl Into<String>) -> Result<IdentifyBuilder> {
        let user_id = require_non_empty(user_id.into(), "userId")?;
        self.identity.set(USER_ID_KEY, &user_id)?;
        self.lift(IdentifyBuilder::new())
    }

    /// Record traits for the current user.
    pub fn new_identify_traits(&self, traits: Properties) -> Result<IdentifyBuilder> {
        Ok(self.lift(IdentifyBuilder::new())?.traits(traits))
    }

    /// Merge the current identity into `new_id`.
    ///
    /// The previous id is the cached userId if one was identified, the
    /// anonymousId otherwise.
    pub fn new_alias(&self, new_id: impl Into<String>) -> Result<AliasBuilder> {
        let previous_id = match self.user_id()? {
            Some(user_id) => user_id,
            None => self.anonymous_id()?,
        };
        self.lift(AliasBuilder::new())?
            .previous_id(previous_id)?
            .user_id(new_id)
    }

    /// Run `message` through the interceptors and hand it to the transporter.
    ///
    /// The handle resolves once the message is persisted. Returns `None`
    /// when an interceptor dropped the message.
    pub fn enqueue(&self, message: Message) -> Option<Pending<Message>> {
        tracing::debug!(
            message_id = %message.message_id(),
            message_type = %message.message_type(),
            "Enqueueing message"
        );
        self.pipeline.enqueue(message)
    }

    /// Upload the oldest queued messages as one batch.
    pub fn flush(&self) -> Pending<Vec<Message>> {
        self.transporter.flush()
    }

    /// Number of messages waiting to be uploaded
    pub fn queue_size(&self) -> Pending<usize> {
        self.transporter.size()
    }

    /// Forget the current user and start a new anonymous identity.
    ///
    /// Messages already queued are kept and still uploaded.
    pub fn reset(&self) -> Result<()> {
        self.identity.remove(USER_ID_KEY)?;
        self.identity
            .set(ANONYMOUS_ID_KEY, &Uuid::new_v4().to_string())?;
        tracing::info!("Identity reset");
        Ok(())
    }

    /// The identified user, if any
    pub fn user_id(&self) -> Result<Option<String>> {
        Ok(self
            .identity
            .get(USER_ID_KEY)?
            .filter(|id| !id.trim().is_empty()))
    }

    pub fn anonymous_id(&self) -> Result<String> {
        self.identity
            .get(ANONYMOUS_ID_KEY)?
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| Error::Persistence("anonymousId is missing".to_string()))
    }
}

/// Builder for [`Analytics`]
///
/// Anything not supplied falls back to the persistent defaults: a SQLite
/// queue and identity store per write key, and the HTTP uploader.
pub struct AnalyticsBuilder {
    config: ClientConfig,
    interceptors: Vec<Arc<dyn Interceptor>>,
    integrations: IntegrationRouter,
    callback: Option<Arc<dyn Callback>>,
    queue: Option<Arc<dyn DurableQueue>>,
    identity: Option<Arc<dyn IdentityStore>>,
    uploader: Option<Arc<dyn BatchUploader>>,
    transport: Option<TransportOptions>,
}

impl AnalyticsBuilder {
    pub fn new(write_key: impl Into<String>) -> Self {
        Self::from_config(ClientConfig::with_write_key(write_key))
    }

    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            interceptors: Vec::new(),
            integrations: IntegrationRouter::default(),
            callback: None,
            queue: None,
            identity: None,
            uploader: None,
            transport: None,
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    /// Append an interceptor; interceptors run in the order they are added.
    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Result<Self> {
        let duplicate = self
            .interceptors
            .iter()
            .any(|existing| same_instance(existing, &interceptor));
        if duplicate {
            return Err(Error::Config(
                "interceptor is already registered".to_string(),
            ));
        }
        self.interceptors.push(interceptor);
        Ok(self)
    }

    /// Register an integration; names must be unique.
    pub fn integration(mut self, integration: Arc<dyn Integration>) -> Result<Self> {
        self.integrations.register(integration)?;
        Ok(self)
    }

    pub fn callback(mut self, callback: Arc<dyn Callback>) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn queue(mut self, queue: Arc<dyn DurableQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn identity_store(mut self, identity: Arc<dyn IdentityStore>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn uploader(mut self, uploader: Arc<dyn BatchUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    /// Override the automatic flush policy derived from the config.
    pub fn transport(mut self, options: TransportOptions) -> Self {
        self.transport = Some(options);
        self
    }

    pub fn build(self) -> Result<Analytics> {
        self.config.validate()?;

        let (queue, identity) = match (self.queue, self.identity) {
            (Some(queue), Some(identity)) => (queue, identity),
            (queue, identity) => {
                let path = Config::queue_database_path(self.config.write_key()?);
                let db = Arc::new(Database::open(&path)?);
                db.migrate()?;
                tracing::debug!(path = %path.display(), "Opened queue database");
                (
                    queue.unwrap_or_else(|| db.clone() as Arc<dyn DurableQueue>),
                    identity.unwrap_or_else(|| db.clone() as Arc<dyn IdentityStore>),
                )
            }
        };

        let anonymous_id = identity
            .get(ANONYMOUS_ID_KEY)?
            .filter(|id| !id.trim().is_empty());
        if anonymous_id.is_none() {
            identity.set(ANONYMOUS_ID_KEY, &Uuid::new_v4().to_string())?;
        }

        let uploader: Arc<dyn BatchUploader> = match self.uploader {
            Some(uploader) => uploader,
            None => Arc::new(HttpUploader::new(&self.config)?),
        };
        let options = self
            .transport
            .unwrap_or_else(|| TransportOptions::from(&self.config));

        let router = self.integrations;
        let transporter = Arc::new(Transporter::new(queue, uploader, self.callback, options)?);

        let terminal = transporter.clone();
        let pipeline = Pipeline::new(self.interceptors, move |message: Message| {
            router.route(&message);
            terminal.enqueue(message)
        });

        tracing::info!(
            interceptors = pipeline.interceptor_count(),
            "Analytics client ready"
        );

        Ok(Analytics {
            pipeline,
            transporter,
            identity,
        })
    }
}

fn same_instance(a: &Arc<dyn Interceptor>, b: &Arc<dyn Interceptor>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use crate::identity::MemoryIdentityStore;
    use crate::message::Payload;
    use crate::queue::MemoryQueue;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct NullUploader {
        uploads: Mutex<usize>,
    }

    #[async_trait]
    impl BatchUploader for NullUploader {
        async fn upload(&self, _body: Vec<u8>) -> Result<()> {
            *self.uploads.lock().unwrap() += 1;
            Ok(())
        }
    }

    struct DropTracks;

    impl Interceptor for DropTracks {
        fn intercept(&self, chain: Chain<'_>) -> Option<Pending<Message>> {
            match chain.message().payload() {
                Payload::Track { .. } => None,
                _ => chain.proceed(chain.message().clone()),
            }
        }
    }

    struct Client {
        analytics: Analytics,
        queue: Arc<MemoryQueue>,
        identity: Arc<MemoryIdentityStore>,
        uploader: Arc<NullUploader>,
    }

    fn client_with(builder: AnalyticsBuilder) -> Client {
        let queue = Arc::new(MemoryQueue::new());
        let identity = Arc::new(MemoryIdentityStore::new());
        let uploader = Arc::new(NullUploader::default());
        let analytics = builder
            .queue(queue.clone())
            .identity_store(identity.clone())
            .uploader(uploader.clone())
            .transport(TransportOptions::default())
            .build()
            .unwrap();
        Client {
            analytics,
            queue,
            identity,
            uploader,
        }
    }

    fn client() -> Client {
        client_with(Analytics::builder("test-key"))
    }

    #[test]
    fn test_build_generates_anonymous_id() {
        let c = client();
        let anonymous_id = c.analytics.anonymous_id().unwrap();
        assert!(Uuid::parse_str(&anonymous_id).is_ok());
        assert_eq!(
            c.identity.get(ANONYMOUS_ID_KEY).unwrap(),
            Some(anonymous_id)
        );
        assert_eq!(c.analytics.user_id().unwrap(), None);
    }

    #[test]
    fn test_build_keeps_existing_anonymous_id() {
        let identity = Arc::new(MemoryIdentityStore::new());
        identity.set(ANONYMOUS_ID_KEY, "existing").unwrap();

        let analytics = Analytics::builder("test-key")
            .queue(Arc::new(MemoryQueue::new()))
            .identity_store(identity)
            .uploader(Arc::new(NullUploader::default()))
            .build()
            .unwrap();
        assert_eq!(analytics.anonymous_id().unwrap(), "existing");
    }

    #[test]
    fn test_build_rejects_blank_write_key() {
        let result = Analytics::builder(" ")
            .queue(Arc::new(MemoryQueue::new()))
            .identity_store(Arc::new(MemoryIdentityStore::new()))
            .uploader(Arc::new(NullUploader::default()))
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_factories_fill_identity() {
        let c = client();
        let anonymous_id = c.analytics.anonymous_id().unwrap();

        let track = c.analytics.new_track("foo").unwrap().build().unwrap();
        assert_eq!(track.anonymous_id(), Some(anonymous_id.as_str()));
        assert_eq!(track.user_id(), None);

        let identify = c.analytics.new_identify("prateek").unwrap().build().unwrap();
        assert_eq!(identify.user_id(), Some("prateek"));
        assert_eq!(c.analytics.user_id().unwrap().as_deref(), Some("prateek"));

        let screen = c.analytics.new_screen("Home").unwrap().build().unwrap();
        assert_eq!(screen.user_id(), Some("prateek"));
        assert_eq!(screen.anonymous_id(), Some(anonymous_id.as_str()));

        let group = c.analytics.new_group("acme").unwrap().build().unwrap();
        assert!(matches!(group.payload(), Payload::Group { group_id, .. } if group_id == "acme"));
    }

    #[test]
    fn test_new_identify_rejects_blank_user_id() {
        let c = client();
        assert!(matches!(
            c.analytics.new_identify(""),
            Err(Error::Validation(_))
        ));
        assert_eq!(c.analytics.user_id().unwrap(), None);
    }

    #[test]
    fn test_alias_previous_id() {
        let c = client();
        let anonymous_id = c.analytics.anonymous_id().unwrap();

        let alias = c.analytics.new_alias("new-id").unwrap().build().unwrap();
        assert_eq!(alias.user_id(), Some("new-id"));
        assert!(matches!(
            alias.payload(),
            Payload::Alias { previous_id } if *previous_id == anonymous_id
        ));

        c.analytics.new_identify("prateek").unwrap();
        let alias = c.analytics.new_alias("new-id").unwrap().build().unwrap();
        assert!(matches!(
            alias.payload(),
            Payload::Alias { previous_id } if previous_id == "prateek"
        ));
    }

    #[test]
    fn test_reset_rotates_identity() {
        let c = client();
        let before = c.analytics.anonymous_id().unwrap();
        c.analytics.new_identify("prateek").unwrap();

        c.analytics.reset().unwrap();

        assert_eq!(c.analytics.user_id().unwrap(), None);
        assert_ne!(c.analytics.anonymous_id().unwrap(), before);
    }

    #[test]
    fn test_enqueue_persists_and_flush_uploads() {
        let c = client();
        let message = c.analytics.new_track("foo").unwrap().build().unwrap();

        let persisted = c.analytics.enqueue(message.clone()).unwrap().wait().unwrap();
        assert_eq!(persisted, message);
        assert_eq!(c.analytics.queue_size().wait().unwrap(), 1);

        let sent = c.analytics.flush().wait().unwrap();
        assert_eq!(sent, vec![message]);
        assert_eq!(c.queue.size().unwrap(), 0);
        assert_eq!(*c.uploader.uploads.lock().unwrap(), 1);
    }

    #[test]
    fn test_interceptor_can_drop_messages() {
        let c = client_with(
            Analytics::builder("test-key")
                .interceptor(Arc::new(DropTracks))
                .unwrap(),
        );

        let track = c.analytics.new_track("foo").unwrap().build().unwrap();
        assert!(c.analytics.enqueue(track).is_none());

        let screen = c.analytics.new_screen("Home").unwrap().build().unwrap();
        assert!(c.analytics.enqueue(screen).is_some());
        assert_eq!(c.analytics.queue_size().wait().unwrap(), 1);
    }

    #[test]
    fn test_duplicate_interceptor_rejected() {
        let interceptor: Arc<dyn Interceptor> = Arc::new(DropTracks);
        let result = Analytics::builder("test-key")
            .interceptor(interceptor.clone())
            .unwrap()
            .interceptor(interceptor);
        assert!(matches!(result, Err(Error::Config(_))));

        // A second instance of the same type is fine.
        assert!(Analytics::builder("test-key")
            .interceptor(Arc::new(DropTracks))
            .unwrap()
            .interceptor(Arc::new(DropTracks))
            .is_ok());
    }
}
