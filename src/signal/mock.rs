//! Scripted in-memory [`super::SignalChannel`] double used by the test
//! suite to exercise end-to-end engine scenarios. For per-call
//! expectation-style mocking, enable the `mockable` feature instead,
//! which derives a `mockall`-generated `MockSignalChannel` from the
//! trait directly.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use super::{ClientMessage, ServerMessage, SignalChannel, SignalState};
use crate::error::{ParseError, TransportError};

/// A `SignalChannel` double that replays a scripted inbound message queue
/// and records every outbound message sent through it.
pub struct ScriptedSignalChannel {
    state: Mutex<SignalState>,
    sent: Mutex<Vec<ClientMessage>>,
    inbound_tx: mpsc::UnboundedSender<Result<ServerMessage, ParseError>>,
    inbound_rx: AsyncMutex<mpsc::UnboundedReceiver<Result<ServerMessage, ParseError>>>,
    fail_open: AtomicBool,
    open_attempts: AtomicUsize,
}

impl ScriptedSignalChannel {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(SignalState::Disconnected),
            sent: Mutex::new(Vec::new()),
            inbound_tx: tx,
            inbound_rx: AsyncMutex::new(rx),
            fail_open: AtomicBool::new(false),
            open_attempts: AtomicUsize::new(0),
        }
    }

    /// Number of times `open` has been called, successful or not. Lets a
    /// test confirm that a capped retry policy stopped trying rather than
    /// merely that it stayed disconnected.
    #[must_use]
    pub fn open_attempts(&self) -> usize {
        self.open_attempts.load(Ordering::Acquire)
    }

    /// Builds a channel whose `open` call always fails, for exercising
    /// reconnect-retry exhaustion.
    #[must_use]
    pub fn new_failing() -> Self {
        let channel = Self::new();
        channel.fail_open.store(true, Ordering::Release);
        channel
    }

    /// Flips whether subsequent `open` calls fail, for scripting a
    /// channel that connects once and then refuses every later resume or
    /// reconnect attempt.
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::Release);
    }

    /// Queues a server message as if it had arrived over the wire.
    pub fn push_inbound(&self, message: ServerMessage) {
        let _ = self.inbound_tx.send(Ok(message));
    }

    /// Queues a frame that fails to decode, as if a malformed message had
    /// arrived over the wire. The channel stays open afterward.
    pub fn push_parse_error(&self, error: impl Into<String>) {
        let _ = self.inbound_tx.send(Err(ParseError(error.into())));
    }

    /// Returns every client message sent so far, in order.
    #[must_use]
    pub fn sent_messages(&self) -> Vec<ClientMessage> {
        self.sent.lock().expect("mock mutex poisoned").clone()
    }
}

impl Default for ScriptedSignalChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalChannel for ScriptedSignalChannel {
    async fn open(&self, _url: &url::Url) -> Result<(), TransportError> {
        self.open_attempts.fetch_add(1, Ordering::AcqRel);
        if self.fail_open.load(Ordering::Acquire) {
            return Err(TransportError::ConnectFailed("mock configured to fail".into()));
        }
        *self.state.lock().expect("mock mutex poisoned") = SignalState::Connected;
        Ok(())
    }

    async fn close(&self) {
        *self.state.lock().expect("mock mutex poisoned") = SignalState::Disconnected;
    }

    fn state(&self) -> SignalState {
        *self.state.lock().expect("mock mutex poisoned")
    }

    async fn send(&self, message: ClientMessage) -> Result<(), TransportError> {
        if self.state() != SignalState::Connected {
            return Err(TransportError::NotConnected);
        }
        self.sent.lock().expect("mock mutex poisoned").push(message);
        Ok(())
    }

    async fn recv(&self) -> Option<Result<ServerMessage, ParseError>> {
        self.inbound_rx.lock().await.recv().await
    }
}
