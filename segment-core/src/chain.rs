//! Interceptor chain
//!
//! Every enqueued message passes through the registered interceptors in
//! registration order. Each interceptor sees the message through a
//! [`Chain`] and either forwards it (possibly rewritten) with
//! [`Chain::proceed`] or drops it by returning without proceeding. After the
//! last interceptor, the message is handed to the pipeline's terminal stage
//! (integration fan-out and the transporter).

use std::sync::Arc;

use crate::message::Message;
use crate::transport::Pending;

/// A stage that can observe, rewrite, or drop messages
pub trait Interceptor: Send + Sync {
    /// Return `chain.proceed(..)` to forward the message, or `None` to drop it.
    fn intercept(&self, chain: Chain<'_>) -> Option<Pending<Message>>;
}

type Terminal = dyn Fn(Message) -> Pending<Message> + Send + Sync;

/// Ordered interceptors plus the stage that runs after them
pub struct Pipeline {
    interceptors: Vec<Arc<dyn Interceptor>>,
    terminal: Box<Terminal>,
}

impl Pipeline {
    pub fn new<F>(interceptors: Vec<Arc<dyn Interceptor>>, terminal: F) -> Self
    where
        F: Fn(Message) -> Pending<Message> + Send + Sync + 'static,
    {
        Self {
            interceptors,
            terminal: Box::new(terminal),
        }
    }

    /// Run `message` through the chain on the calling thread.
    ///
    /// Returns `None` if an interceptor dropped it.
    pub fn enqueue(&self, message: Message) -> Option<Pending<Message>> {
        Chain {
            index: 0,
            message,
            pipeline: self,
        }
        .run()
    }

    pub fn interceptor_count(&self) -> usize {
        self.interceptors.len()
    }
}

/// One position in the interceptor chain
pub struct Chain<'a> {
    index: usize,
    message: Message,
    pipeline: &'a Pipeline,
}

impl<'a> Chain<'a> {
    /// The message as it arrived at this stage
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Hand `message` to the next stage.
    pub fn proceed(&self, message: Message) -> Option<Pending<Message>> {
        Chain {
            index: self.index + 1,
            message,
            pipeline: self.pipeline,
        }
        .run()
    }

    fn run(self) -> Option<Pending<Message>> {
        let pipeline = self.pipeline;
        match pipeline.interceptors.get(self.index) {
            Some(interceptor) => interceptor.intercept(self),
            None => Some((pipeline.terminal)(self.message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::builder::{MessageBuilder, TrackBuilder};
    use crate::message::Payload;
    use std::sync::Mutex;

    /// Records its name, then forwards the message unchanged
    struct Tag {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Interceptor for Tag {
        fn intercept(&self, chain: Chain<'_>) -> Option<Pending<Message>> {
            self.log.lock().unwrap().push(self.name);
            chain.proceed(chain.message().clone())
        }
    }

    struct DropAll;

    impl Interceptor for DropAll {
        fn intercept(&self, _chain: Chain<'_>) -> Option<Pending<Message>> {
            None
        }
    }

    /// Rewrites the anonymous id of every message
    struct Anonymize;

    impl Interceptor for Anonymize {
        fn intercept(&self, chain: Chain<'_>) -> Option<Pending<Message>> {
            let message = chain
                .message()
                .to_builder()
                .anonymous_id("rewritten")
                .and_then(|b| b.build())
                .ok()?;
            chain.proceed(message)
        }
    }

    fn recording_pipeline(
        interceptors: Vec<Arc<dyn Interceptor>>,
    ) -> (Pipeline, Arc<Mutex<Vec<Message>>>) {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = delivered.clone();
        let pipeline = Pipeline::new(interceptors, move |message: Message| {
            sink.lock().unwrap().push(message.clone());
            Pending::ready(Ok(message))
        });
        (pipeline, delivered)
    }

    fn track() -> Message {
        TrackBuilder::new()
            .event("foo")
            .unwrap()
            .user_id("prateek")
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_interceptors_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (pipeline, delivered) = recording_pipeline(vec![
            Arc::new(Tag {
                name: "first",
                log: log.clone(),
            }),
            Arc::new(Tag {
                name: "second",
                log: log.clone(),
            }),
        ]);

        let message = track();
        let result = pipeline.enqueue(message.clone()).unwrap().wait().unwrap();

        assert_eq!(result, message);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(*delivered.lock().unwrap(), vec![message]);
    }

    #[test]
    fn test_dropped_message_never_reaches_terminal() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (pipeline, delivered) = recording_pipeline(vec![
            Arc::new(DropAll),
            Arc::new(Tag {
                name: "after",
                log: log.clone(),
            }),
        ]);

        assert!(pipeline.enqueue(track()).is_none());
        assert!(log.lock().unwrap().is_empty());
        assert!(delivered.lock().unwrap().is_empty());
    }

    #[test]
    fn test_rewritten_message_is_delivered() {
        let (pipeline, delivered) = recording_pipeline(vec![Arc::new(Anonymize)]);
        let original = track();

        pipeline.enqueue(original.clone()).unwrap().wait().unwrap();

        let delivered = delivered.lock().unwrap();
        assert_eq!(delivered[0].anonymous_id(), Some("rewritten"));
        assert_eq!(delivered[0].message_id(), original.message_id());
        assert!(matches!(delivered[0].payload(), Payload::Track { event, .. } if event == "foo"));
    }

    #[test]
    fn test_empty_chain_goes_straight_to_terminal() {
        let (pipeline, delivered) = recording_pipeline(Vec::new());
        assert_eq!(pipeline.interceptor_count(), 0);
        assert!(pipeline.enqueue(track()).is_some());
        assert_eq!(delivered.lock().unwrap().len(), 1);
    }
}
