//! Background delivery of messages
//!
//! The [`Transporter`] owns a dedicated worker thread running a
//! single-threaded tokio runtime. Every queue mutation and every upload
//! executes on that worker, in the order commands arrive, so a flush never
//! races an enqueue.
//!
//! ```text
//! caller thread                     segment-transporter thread
//! ─────────────                     ──────────────────────────
//! enqueue(msg) ── encode ──► Command::Enqueue ──► queue.append ──► callback(Persist)
//! flush()      ────────────► Command::Flush   ──► peek ─► upload ─► remove_prefix ──► callback(Upload)
//! ```

pub mod uploader;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};

use crate::codec::{self, Batch, MAX_BATCH_COUNT};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::queue::DurableQueue;

pub use uploader::{BatchUploader, HttpUploader};

/// First pause of `flush_at` triggers after an automatic flush fails
const AUTO_FLUSH_BACKOFF_START: Duration = Duration::from_secs(1);

/// Longest pause of `flush_at` triggers between failed automatic flushes
const AUTO_FLUSH_BACKOFF_MAX: Duration = Duration::from_secs(300);

/// Which step of delivery a callback refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// The message was (or failed to be) written to the durable queue
    Persist,
    /// The message was (or failed to be) accepted by the collection endpoint
    Upload,
}

/// Observer for per-message delivery outcomes
///
/// Invoked on the transporter worker thread, except for messages rejected
/// before they reach the worker (oversized messages), which are reported on
/// the enqueuing thread. Implementations must not block.
pub trait Callback: Send + Sync {
    fn on_success(&self, stage: Stage, message: &Message);

    fn on_failure(&self, stage: Stage, message: &Message, error: &Error);
}

/// Automatic flush policy for the worker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportOptions {
    /// Flush as soon as the queue holds at least this many messages
    ///
    /// After a failed automatic flush this trigger pauses, starting at one
    /// second and doubling up to five minutes, until a flush succeeds.
    pub flush_at: Option<usize>,
    /// Flush on a fixed period
    pub flush_interval: Option<Duration>,
}

impl From<&ClientConfig> for TransportOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            flush_at: Some(config.flush_at),
            flush_interval: (config.flush_interval_secs > 0)
                .then(|| Duration::from_secs(config.flush_interval_secs)),
        }
    }
}

/// Handle to the result of an asynchronous transporter operation
///
/// Await it from async code, or call [`Pending::wait`] from a plain thread.
#[must_use = "a pending result does nothing unless awaited or waited on"]
pub struct Pending<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Pending<T> {
    pub(crate) fn channel() -> (oneshot::Sender<Result<T>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// A handle that is already resolved
    pub fn ready(result: Result<T>) -> Self {
        let (tx, pending) = Self::channel();
        let _ = tx.send(result);
        pending
    }

    /// Block the current thread until the result is available.
    ///
    /// Must not be called from within an async runtime; await the handle there.
    pub fn wait(self) -> Result<T> {
        self.rx.blocking_recv().unwrap_or(Err(Error::Closed))
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(Error::Closed)))
    }
}

impl<T> std::fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pending").finish_non_exhaustive()
    }
}

enum Command {
    Enqueue {
        message: Message,
        payload: Vec<u8>,
        reply: oneshot::Sender<Result<Message>>,
    },
    Flush {
        reply: oneshot::Sender<Result<Vec<Message>>>,
    },
    Size {
        reply: oneshot::Sender<Result<usize>>,
    },
}

/// Persists messages and uploads them in batches
///
/// Dropping the transporter finishes every command already submitted, then
/// stops and joins the worker thread.
pub struct Transporter {
    commands: Option<mpsc::UnboundedSender<Command>>,
    worker: Option<JoinHandle<()>>,
    callback: Option<Arc<dyn Callback>>,
}

impl Transporter {
    /// Start the worker thread.
    pub fn new(
        queue: Arc<dyn DurableQueue>,
        uploader: Arc<dyn BatchUploader>,
        callback: Option<Arc<dyn Callback>>,
        options: TransportOptions,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let (commands, receiver) = mpsc::unbounded_channel();
        let worker = Worker {
            queue,
            uploader,
            callback: callback.clone(),
            options,
            backoff: None,
        };

        let handle = std::thread::Builder::new()
            .name("segment-transporter".to_string())
            .spawn(move || runtime.block_on(worker.run(receiver)))?;

        tracing::debug!("Started transporter worker");

        Ok(Self {
            commands: Some(commands),
            worker: Some(handle),
            callback,
        })
    }

    /// Encode `message` and append it to the durable queue.
    ///
    /// Encoding happens on the calling thread, so an oversized message fails
    /// without ever reaching the worker.
    pub fn enqueue(&self, message: Message) -> Pending<Message> {
        let payload = match codec::encode(&message) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(
                    message_id = %message.message_id(),
                    error = %e,
                    "Rejected message before persisting"
                );
                if let Some(callback) = &self.callback {
                    callback.on_failure(Stage::Persist, &message, &e);
                }
                return Pending::ready(Err(e));
            }
        };

        let (reply, pending) = Pending::channel();
        self.send(Command::Enqueue {
            message,
            payload,
            reply,
        });
        pending
    }

    /// Upload the oldest queued messages as one batch.
    ///
    /// Resolves to the uploaded messages; an empty queue resolves to an
    /// empty list.
    pub fn flush(&self) -> Pending<Vec<Message>> {
        let (reply, pending) = Pending::channel();
        self.send(Command::Flush { reply });
        pending
    }

    /// Number of messages waiting in the durable queue
    pub fn size(&self) -> Pending<usize> {
        let (reply, pending) = Pending::channel();
        self.send(Command::Size { reply });
        pending
    }

    // A failed send drops the reply sender, which resolves the handle to
    // `Error::Closed`.
    fn send(&self, command: Command) {
        if let Some(commands) = &self.commands {
            if commands.send(command).is_err() {
                tracing::warn!("Transporter worker is gone, dropping command");
            }
        }
    }
}

impl Drop for Transporter {
    fn drop(&mut self) {
        self.commands.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Transporter worker panicked");
            }
        }
    }
}

struct Worker {
    queue: Arc<dyn DurableQueue>,
    uploader: Arc<dyn BatchUploader>,
    callback: Option<Arc<dyn Callback>>,
    options: TransportOptions,
    // Set while automatic flushes are failing; cleared by any successful flush.
    backoff: Option<Backoff>,
}

#[derive(Debug, Clone, Copy)]
struct Backoff {
    delay: Duration,
    until: Instant,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut ticker = self.options.flush_interval.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            let command = match ticker.as_mut() {
                Some(ticker) => tokio::select! {
                    command = commands.recv() => command,
                    _ = ticker.tick() => {
                        self.auto_flush("interval").await;
                        continue;
                    }
                },
                None => commands.recv().await,
            };

            let Some(command) = command else { break };
            self.handle(command).await;
        }

        tracing::debug!("Transporter worker stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Enqueue {
                message,
                payload,
                reply,
            } => {
                let persisted = self.persist(message, &payload);
                let stored = persisted.is_ok();
                let _ = reply.send(persisted);

                if stored && self.flush_at_reached() {
                    self.auto_flush("flush_at").await;
                }
            }
            Command::Flush { reply } => {
                let flushed = self.flush().await;
                if flushed.is_ok() {
                    self.resume_auto_flush();
                }
                let _ = reply.send(flushed);
            }
            Command::Size { reply } => {
                let _ = reply.send(self.queue.size());
            }
        }
    }

    fn persist(&self, message: Message, payload: &[u8]) -> Result<Message> {
        match self.queue.append(payload) {
            Ok(()) => {
                tracing::debug!(
                    message_id = %message.message_id(),
                    message_type = %message.message_type(),
                    bytes = payload.len(),
                    "Persisted message"
                );
                self.notify_success(Stage::Persist, &message);
                Ok(message)
            }
            Err(e) => {
                let error = persistence_error(e);
                tracing::warn!(
                    message_id = %message.message_id(),
                    error = %error,
                    "Failed to persist message"
                );
                self.notify_failure(Stage::Persist, &message, &error);
                Err(error)
            }
        }
    }

    async fn flush(&self) -> Result<Vec<Message>> {
        let entries = self.queue.peek(MAX_BATCH_COUNT)?;
        if entries.is_empty() {
            tracing::debug!("Flush skipped, queue is empty");
            return Ok(Vec::new());
        }

        let mut messages = Vec::with_capacity(entries.len());
        let mut undecodable = None;
        for entry in &entries {
            match codec::decode(entry) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    undecodable.get_or_insert(e);
                }
            }
        }
        if let Some(e) = undecodable {
            tracing::error!(
                error = %e,
                decoded = messages.len(),
                "Queue holds an undecodable entry"
            );
            for message in &messages {
                self.notify_failure(Stage::Upload, message, &e);
            }
            return Err(e);
        }
        let count = messages.len();

        let batch = Batch::new(messages)?;
        let uploaded = match batch.to_json() {
            Ok(body) => self.uploader.upload(body).await,
            Err(e) => Err(e),
        };
        let messages = batch.into_messages();

        match uploaded {
            Ok(()) => {
                tracing::debug!(count, "Uploaded batch");
                for message in &messages {
                    self.notify_success(Stage::Upload, message);
                }
                // Already delivered; a failed commit means these are sent again.
                self.queue.remove_prefix(count).map_err(|e| {
                    tracing::warn!(count, error = %e, "Failed to remove uploaded messages");
                    persistence_error(e)
                })?;
                Ok(messages)
            }
            Err(e) => {
                tracing::warn!(count, error = %e, "Failed to upload batch");
                for message in &messages {
                    self.notify_failure(Stage::Upload, message, &e);
                }
                Err(e)
            }
        }
    }

    fn flush_at_reached(&self) -> bool {
        let Some(flush_at) = self.options.flush_at else {
            return false;
        };
        if let Some(backoff) = self.backoff {
            if Instant::now() < backoff.until {
                return false;
            }
        }
        self.queue.size().map_or(false, |size| size >= flush_at)
    }

    async fn auto_flush(&mut self, trigger: &'static str) {
        match self.queue.size() {
            Ok(0) => return,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(trigger, error = %e, "Failed to read queue size");
                return;
            }
        }

        match self.flush().await {
            Ok(sent) => {
                tracing::debug!(trigger, sent = sent.len(), "Automatic flush");
                self.resume_auto_flush();
            }
            Err(e) => {
                let delay = self.backoff.map_or(AUTO_FLUSH_BACKOFF_START, |backoff| {
                    (backoff.delay * 2).min(AUTO_FLUSH_BACKOFF_MAX)
                });
                self.backoff = Some(Backoff {
                    delay,
                    until: Instant::now() + delay,
                });
                tracing::warn!(
                    trigger,
                    error = %e,
                    retry_in = ?delay,
                    "Automatic flush failed, pausing flush_at"
                );
            }
        }
    }

    fn resume_auto_flush(&mut self) {
        if self.backoff.take().is_some() {
            tracing::debug!("Automatic flushing resumed");
        }
    }

    fn notify_success(&self, stage: Stage, message: &Message) {
        if let Some(callback) = &self.callback {
            callback.on_success(stage, message);
        }
    }

    fn notify_failure(&self, stage: Stage, message: &Message, error: &Error) {
        if let Some(callback) = &self.callback {
            callback.on_failure(stage, message, error);
        }
    }
}

// Queue errors already reported as persistence failures keep their message.
fn persistence_error(error: Error) -> Error {
    match error {
        Error::Persistence(_) => error,
        other => Error::Persistence(other.to_string()),
    }
}
