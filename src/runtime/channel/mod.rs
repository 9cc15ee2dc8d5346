//! Dedicated channels: long-lived execution contexts outside the pool.
//!
//! A [`DedicatedChannel`] owns one OS thread for its whole life. The caller
//! and the channel body talk through two unbounded queues of envelopes:
//! inbound (caller to body) and outbound (body to caller). The pool's
//! synchronous ceiling does not apply, and nothing is counted against any
//! pool bound. The channel stays up until [`DedicatedChannel::terminate`]
//! is called or the handle is dropped.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::runtime::envelope::{Envelope, Payload};
use crate::runtime::error::{panic_message, ChannelError};
use crate::runtime::lifecycle::{LifecycleCell, LifecycleState};

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Unique channel identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u64);

impl ChannelId {
    fn next() -> Self {
        Self(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Channel({})", self.0)
    }
}

type Handler<Out> = Box<dyn FnMut(Envelope<Out>) + Send>;
type HandlerSlot<Out> = Arc<Mutex<Option<Handler<Out>>>>;

/// The body's side of a channel.
pub struct ChannelScope<In: Payload, Out: Payload> {
    id: ChannelId,
    name: Arc<str>,
    inbound: Receiver<Envelope<In>>,
    outbound: Sender<Envelope<Out>>,
    handler: HandlerSlot<Out>,
    lifecycle: Arc<LifecycleCell>,
}

impl<In: Payload, Out: Payload> ChannelScope<In, Out> {
    #[inline]
    pub fn id(&self) -> ChannelId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.get()
    }

    /// Blocking iterator over inbound messages, oldest first.
    ///
    /// Each call starts from the current head of the queue. The iterator
    /// ends once the channel is terminated and every queued message has
    /// been yielded.
    pub fn receive(&self) -> Incoming<'_, In, Out> {
        Incoming { scope: self }
    }

    /// Send a message back to the caller. Goes to the caller's handler if
    /// one is installed, otherwise to the outbound queue.
    pub fn post(
        &self,
        message: Envelope<Out>,
    ) -> Result<(), ChannelError> {
        let mut handler = self.handler.lock();
        if let Some(handler) = handler.as_mut() {
            handler(message);
            return Ok(());
        }
        self.outbound
            .send(message)
            .map_err(|_| ChannelError::Terminated { channel: self.id })
    }
}

impl<In: Payload, Out: Payload> fmt::Debug for ChannelScope<In, Out> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ChannelScope")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Iterator returned by [`ChannelScope::receive`].
pub struct Incoming<'a, In: Payload, Out: Payload> {
    scope: &'a ChannelScope<In, Out>,
}

impl<In: Payload, Out: Payload> Iterator for Incoming<'_, In, Out> {
    type Item = Envelope<In>;

    fn next(&mut self) -> Option<Self::Item> {
        let lifecycle = &self.scope.lifecycle;
        lifecycle.advance(LifecycleState::Idle);
        match self.scope.inbound.recv() {
            Ok(message) => {
                lifecycle.advance(LifecycleState::Busy);
                Some(message)
            },
            Err(_) => None,
        }
    }
}

/// Caller's handle to a dedicated channel.
///
/// `In` is what the caller sends, `Out` is what the body posts back.
pub struct DedicatedChannel<In: Payload, Out: Payload> {
    id: ChannelId,
    name: Arc<str>,
    inbound: Option<Sender<Envelope<In>>>,
    outbound: Receiver<Envelope<Out>>,
    handler: HandlerSlot<Out>,
    lifecycle: Arc<LifecycleCell>,
    thread: Option<thread::JoinHandle<Result<(), String>>>,
}

impl<In: Payload, Out: Payload> DedicatedChannel<In, Out> {
    /// Start a channel running `body` on its own thread.
    pub fn create<F>(
        name: impl Into<String>,
        body: F,
    ) -> Result<Self, ChannelError>
    where
        F: FnOnce(ChannelScope<In, Out>) + Send + 'static,
    {
        let id = ChannelId::next();
        let name: Arc<str> = Arc::from(name.into());
        let (inbound, inbound_rx) = channel::unbounded();
        let (outbound_tx, outbound) = channel::unbounded();
        let handler: HandlerSlot<Out> = Arc::new(Mutex::new(None));
        let lifecycle = Arc::new(LifecycleCell::new());

        let scope = ChannelScope {
            id,
            name: name.clone(),
            inbound: inbound_rx,
            outbound: outbound_tx,
            handler: handler.clone(),
            lifecycle: lifecycle.clone(),
        };
        let thread = thread::Builder::new()
            .name(format!("channel-{}", name))
            .spawn(move || run(scope, body))?;

        debug!(channel = %id, name = %name, "channel created");
        Ok(Self {
            id,
            name,
            inbound: Some(inbound),
            outbound,
            handler,
            lifecycle,
            thread: Some(thread),
        })
    }

    #[inline]
    pub fn id(&self) -> ChannelId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.get()
    }

    /// Whether `terminate` has been called.
    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.inbound.is_none()
    }

    /// Queue a message for the body. Never blocks.
    pub fn send(
        &self,
        message: Envelope<In>,
    ) -> Result<(), ChannelError> {
        let inbound = self
            .inbound
            .as_ref()
            .ok_or(ChannelError::Terminated { channel: self.id })?;
        inbound
            .send(message)
            .map_err(|_| ChannelError::Terminated { channel: self.id })
    }

    /// Blocking iterator over outbound messages. Ends when the body has
    /// returned and the queue is empty.
    pub fn receive(&self) -> impl Iterator<Item = Envelope<Out>> + '_ {
        self.outbound.iter()
    }

    /// Next outbound message, if one is queued.
    pub fn try_receive(&self) -> Option<Envelope<Out>> {
        self.outbound.try_recv().ok()
    }

    /// Wait up to `timeout` for the next outbound message.
    pub fn receive_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Envelope<Out>, ChannelError> {
        self.outbound
            .recv_timeout(timeout)
            .map_err(|err| match err {
                RecvTimeoutError::Timeout => ChannelError::Timeout,
                RecvTimeoutError::Disconnected => ChannelError::Terminated { channel: self.id },
            })
    }

    /// Deliver outbound messages to `handler` instead of queueing them.
    ///
    /// Messages already queued are handed over first, in order. The handler
    /// runs on the channel's thread for anything posted afterwards.
    pub fn on_message<H>(
        &self,
        handler: H,
    ) where
        H: FnMut(Envelope<Out>) + Send + 'static,
    {
        let mut slot = self.handler.lock();
        let mut handler: Handler<Out> = Box::new(handler);
        while let Ok(message) = self.outbound.try_recv() {
            handler(message);
        }
        *slot = Some(handler);
    }

    /// Stop the channel.
    ///
    /// New sends fail from here on. The body still sees every message that
    /// was queued before this call, then its `receive` loop ends. Blocks
    /// until the body returns. Calling it again is a no-op.
    pub fn terminate(&mut self) -> Result<(), ChannelError> {
        self.inbound.take();
        self.lifecycle.advance(LifecycleState::Terminating);
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        debug!(channel = %self.id, "channel terminating");
        let outcome = match thread.join() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(ChannelError::Panicked {
                channel: self.id,
                message,
            }),
            Err(payload) => Err(ChannelError::Panicked {
                channel: self.id,
                message: panic_message(payload),
            }),
        };
        self.lifecycle.advance(LifecycleState::Terminated);
        debug!(channel = %self.id, ok = outcome.is_ok(), "channel terminated");
        outcome
    }
}

fn run<In, Out, F>(
    scope: ChannelScope<In, Out>,
    body: F,
) -> Result<(), String>
where
    In: Payload,
    Out: Payload,
    F: FnOnce(ChannelScope<In, Out>),
{
    let id = scope.id;
    let lifecycle = scope.lifecycle.clone();
    lifecycle.advance(LifecycleState::Running);

    let result = panic::catch_unwind(AssertUnwindSafe(move || body(scope)));

    lifecycle.advance(LifecycleState::Terminating);
    lifecycle.advance(LifecycleState::Terminated);
    match result {
        Ok(()) => Ok(()),
        Err(payload) => {
            let message = panic_message(payload);
            error!(channel = %id, %message, "channel body panicked");
            Err(message)
        },
    }
}

impl<In: Payload, Out: Payload> fmt::Debug for DedicatedChannel<In, Out> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("DedicatedChannel")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl<In: Payload, Out: Payload> Drop for DedicatedChannel<In, Out> {
    fn drop(&mut self) {
        if self.thread.is_none() {
            return;
        }
        warn!(channel = %self.id, name = %self.name, "channel dropped without terminate");
        if let Err(err) = self.terminate() {
            error!(channel = %self.id, error = %err, "channel failed while terminating");
        }
    }
}

#[cfg(test)]
mod tests;
