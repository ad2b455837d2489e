//! Hand-off of the configuration document between the management server and
//! the control thread.
//!
//! # Protocol
//! ```text
//! client getptree  → request_latest()  pushed doc unconsumed ? returns it
//!                                      : arms the request slot, waits
//! control thread   → has_pending_request() ? publish(doc) → waiter gets doc
//!
//! client setptree  → set_document(doc)  replaces doc, marks it pushed
//! control thread   → consume_pushed()   takes the pushed doc once
//! ```
//!
//! # Design Decisions
//! - One document and one request slot behind a single mutex
//! - The waiter is fulfilled through a oneshot channel, so there is no
//!   wake-up predicate to re-check and no wake-up can be lost
//! - A newer request supersedes an older one still waiting
//! - `publish` only takes effect while the server loop is running

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::oneshot;

use crate::control::document::ConfigDocument;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The request was superseded or the server loop stopped.
    #[error("document request withdrawn before it was fulfilled")]
    Withdrawn,
}

#[derive(Debug, Default)]
enum Request {
    #[default]
    Idle,
    WantLatest(oneshot::Sender<ConfigDocument>),
}

#[derive(Debug, Default)]
struct ChannelState {
    current: ConfigDocument,
    request: Request,
    /// A client pushed a document the control thread has not consumed yet.
    pushed: bool,
}

impl ChannelState {
    fn fulfil(&mut self) {
        if let Request::WantLatest(tx) = std::mem::take(&mut self.request) {
            // The receiver may be gone (client disconnected); nothing to do then.
            let _ = tx.send(self.current.clone());
        }
    }
}

/// A document requested through [`ConfigChannel::request_latest`].
#[derive(Debug)]
pub struct PendingDocument {
    rx: oneshot::Receiver<ConfigDocument>,
}

impl PendingDocument {
    /// Wait until the request is fulfilled.
    pub async fn wait(self) -> Result<ConfigDocument, ChannelError> {
        self.rx.await.map_err(|_| ChannelError::Withdrawn)
    }

    /// Blocking variant for plain threads. Must not be called from async code.
    pub fn blocking_wait(self) -> Result<ConfigDocument, ChannelError> {
        self.rx.blocking_recv().map_err(|_| ChannelError::Withdrawn)
    }
}

/// Cross-thread exchange point for the live configuration document.
#[derive(Debug, Default)]
pub struct ConfigChannel {
    state: Mutex<ChannelState>,
    open: AtomicBool,
}

impl ConfigChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(document: ConfigDocument) -> Self {
        Self {
            state: Mutex::new(ChannelState {
                current: document,
                ..ChannelState::default()
            }),
            open: AtomicBool::new(false),
        }
    }

    /// Client push: replace the document and mark it for the control thread.
    ///
    /// Also fulfils a waiting request with the new document.
    pub fn set_document(&self, document: ConfigDocument) {
        let mut state = self.lock();
        state.current = document;
        state.pushed = true;
        state.fulfil();
    }

    /// Client pull: ask the control thread for a fresh document.
    ///
    /// While a client-pushed document is still unconsumed it is returned
    /// immediately; `pushed` stays set for the control thread.
    pub fn request_latest(&self) -> PendingDocument {
        let (tx, rx) = oneshot::channel();
        let mut state = self.lock();
        if state.pushed {
            let _ = tx.send(state.current.clone());
            return PendingDocument { rx };
        }
        if let Request::WantLatest(previous) =
            std::mem::replace(&mut state.request, Request::WantLatest(tx))
        {
            if !previous.is_closed() {
                tracing::debug!("Superseding pending document request");
            }
        }
        PendingDocument { rx }
    }

    /// Control thread push: replace the document and fulfil a waiting request.
    ///
    /// Ignored while the server loop is not running; returns whether the
    /// document was taken.
    pub fn publish(&self, document: ConfigDocument) -> bool {
        if !self.is_open() {
            return false;
        }
        let mut state = self.lock();
        state.current = document;
        state.fulfil();
        true
    }

    /// Control thread pull: take a client-pushed document, if any. Never blocks.
    pub fn consume_pushed(&self) -> Option<ConfigDocument> {
        let mut state = self.lock();
        if state.pushed {
            state.pushed = false;
            Some(state.current.clone())
        } else {
            None
        }
    }

    /// Whether a client is currently waiting in `request_latest`.
    pub fn has_pending_request(&self) -> bool {
        matches!(&self.lock().request, Request::WantLatest(tx) if !tx.is_closed())
    }

    /// Copy of the current document.
    pub fn current(&self) -> ConfigDocument {
        self.lock().current.clone()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub(crate) fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    /// Stop accepting publishes and withdraw any waiting request.
    pub(crate) fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.lock().request = Request::Idle;
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn doc(value: serde_json::Value) -> ConfigDocument {
        ConfigDocument::try_from(value).unwrap()
    }

    fn open_channel() -> Arc<ConfigChannel> {
        let channel = Arc::new(ConfigChannel::new());
        channel.open();
        channel
    }

    #[tokio::test]
    async fn request_blocks_until_publish() {
        let channel = open_channel();
        let waiter = tokio::spawn(channel.request_latest().wait());
        assert!(channel.has_pending_request());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        let publisher = Arc::clone(&channel);
        std::thread::spawn(move || {
            assert!(publisher.publish(doc(json!({"general": {"dabmode": 1}}))));
        })
        .join()
        .unwrap();

        let received = waiter.await.unwrap().unwrap();
        assert_eq!(received, doc(json!({"general": {"dabmode": 1}})));
        assert!(!channel.has_pending_request());
    }

    #[test]
    fn blocking_wait_from_plain_thread() {
        let channel = open_channel();
        let pending = channel.request_latest();

        let publisher = Arc::clone(&channel);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            publisher.publish(doc(json!({"x": 1})));
        });

        assert_eq!(pending.blocking_wait(), Ok(doc(json!({"x": 1}))));
        handle.join().unwrap();
    }

    #[test]
    fn publish_ignored_while_closed() {
        let channel = ConfigChannel::with_document(doc(json!({"old": true})));
        assert!(!channel.publish(doc(json!({"new": true}))));
        assert_eq!(channel.current(), doc(json!({"old": true})));
    }

    #[test]
    fn pushed_document_consumed_once() {
        let channel = ConfigChannel::new();
        assert_eq!(channel.consume_pushed(), None);

        channel.set_document(doc(json!({"services": {"srv-a": {"label": "A"}}})));
        assert_eq!(
            channel.consume_pushed(),
            Some(doc(json!({"services": {"srv-a": {"label": "A"}}})))
        );
        assert_eq!(channel.consume_pushed(), None);
    }

    #[tokio::test]
    async fn push_fulfils_waiting_request() {
        let channel = open_channel();
        let pending = channel.request_latest();

        channel.set_document(doc(json!({"pushed": 1})));
        assert_eq!(pending.wait().await, Ok(doc(json!({"pushed": 1}))));
    }

    #[tokio::test]
    async fn unconsumed_push_answers_request_without_publish() {
        let channel = ConfigChannel::new();
        channel.set_document(doc(json!({"pushed": 1})));

        let pending = channel.request_latest();
        assert!(!channel.has_pending_request());
        let received = tokio::time::timeout(Duration::from_millis(500), pending.wait())
            .await
            .unwrap();
        assert_eq!(received, Ok(doc(json!({"pushed": 1}))));

        // Still there for the control thread.
        assert_eq!(channel.consume_pushed(), Some(doc(json!({"pushed": 1}))));
    }

    #[tokio::test]
    async fn consumed_push_no_longer_answers_request() {
        let channel = open_channel();
        channel.set_document(doc(json!({"pushed": 1})));
        channel.consume_pushed();

        let pending = channel.request_latest();
        assert!(channel.has_pending_request());
        channel.publish(doc(json!({"live": 2})));
        assert_eq!(pending.wait().await, Ok(doc(json!({"live": 2}))));
    }

    #[tokio::test]
    async fn newer_request_supersedes_older() {
        let channel = open_channel();
        let first = channel.request_latest();
        let second = channel.request_latest();

        channel.publish(doc(json!({"n": 2})));
        assert_eq!(first.wait().await, Err(ChannelError::Withdrawn));
        assert_eq!(second.wait().await, Ok(doc(json!({"n": 2}))));
    }

    #[tokio::test]
    async fn close_withdraws_request() {
        let channel = open_channel();
        let pending = channel.request_latest();

        channel.close();
        assert_eq!(pending.wait().await, Err(ChannelError::Withdrawn));
        assert!(!channel.has_pending_request());
    }

    #[test]
    fn abandoned_request_is_not_pending() {
        let channel = open_channel();
        drop(channel.request_latest());
        assert!(!channel.has_pending_request());
        assert!(channel.publish(doc(json!({"still": "stored"}))));
        assert_eq!(channel.current(), doc(json!({"still": "stored"})));
    }
}
