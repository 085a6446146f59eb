//! Event-correlated completion.
//!
//! The runtime produces suggestions only from inside an introspection event
//! (for example a tab-complete event fired for the console sender). A call to
//! [`EventCompletionProvider::complete`] registers a pending slot, asks the
//! runtime to fire that event, and waits; the host's event listener hands the
//! result back through [`EventCompletionProvider::deliver`].
//!
//! At most one request is outstanding. Starting a new one replaces the old
//! registration, and the replaced caller resolves with
//! [`BridgeError::CompletionCancelled`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::CompletionProvider;
use crate::error::{BridgeError, Result};
use crate::handler::BoxFuture;
use crate::protocol::payloads::{Completions, Suggestion};

/// Default bound on waiting for the introspection event.
pub const DEFAULT_EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Asks the runtime to fire the introspection event for `buffer`.
pub trait IntrospectionTrigger: Send + Sync {
    fn trigger(&self, buffer: &str) -> Result<()>;
}

impl<F> IntrospectionTrigger for F
where
    F: Fn(&str) -> Result<()> + Send + Sync,
{
    fn trigger(&self, buffer: &str) -> Result<()> {
        self(buffer)
    }
}

struct Pending {
    id: u64,
    buffer: String,
    tx: oneshot::Sender<Vec<Suggestion>>,
}

#[derive(Default)]
struct Slot {
    pending: Option<Pending>,
    next_id: u64,
}

type SharedSlot = Arc<Mutex<Slot>>;

/// Completion provider fed by out-of-band events.
pub struct EventCompletionProvider {
    trigger: Arc<dyn IntrospectionTrigger>,
    slot: SharedSlot,
    timeout: Duration,
}

impl EventCompletionProvider {
    pub fn new(trigger: Arc<dyn IntrospectionTrigger>) -> Self {
        Self {
            trigger,
            slot: Arc::new(Mutex::new(Slot::default())),
            timeout: DEFAULT_EVENT_TIMEOUT,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Register a pending request and fire the trigger.
    ///
    /// Any earlier outstanding request is replaced.
    pub fn begin(&self, buffer: &str) -> Result<CompletionTicket> {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut slot = self.slot.lock();
            let id = slot.next_id;
            slot.next_id += 1;
            if let Some(old) = slot.pending.replace(Pending {
                id,
                buffer: buffer.to_string(),
                tx,
            }) {
                tracing::debug!(replaced = old.id, buffer = %old.buffer, "pending completion replaced");
            }
            id
        };

        let handle = CancelHandle {
            id,
            slot: self.slot.clone(),
        };
        if let Err(e) = self.trigger.trigger(buffer) {
            handle.cancel();
            return Err(e);
        }

        Ok(CompletionTicket { rx, handle })
    }

    /// Hand suggestions from the introspection event to the waiting caller.
    ///
    /// Returns `false` if nothing was waiting (the event is dropped).
    pub fn deliver(&self, suggestions: Vec<Suggestion>) -> bool {
        let pending = self.slot.lock().pending.take();
        match pending {
            Some(p) => p.tx.send(suggestions).is_ok(),
            None => {
                tracing::debug!("completion event with no pending request");
                false
            }
        }
    }

    /// Buffer of the outstanding request, if any.
    pub fn pending_buffer(&self) -> Option<String> {
        self.slot.lock().pending.as_ref().map(|p| p.buffer.clone())
    }
}

impl CompletionProvider for EventCompletionProvider {
    fn complete<'a>(&'a self, buffer: &'a str) -> BoxFuture<'a, Result<Completions>> {
        Box::pin(async move { self.begin(buffer)?.wait(self.timeout).await })
    }

    fn is_async(&self) -> bool {
        true
    }
}

/// Cancels one pending request. Cloneable and idempotent.
#[derive(Clone)]
pub struct CancelHandle {
    id: u64,
    slot: SharedSlot,
}

impl CancelHandle {
    /// Withdraw the request. A no-op once it resolved, was replaced, or was
    /// already cancelled.
    pub fn cancel(&self) {
        let mut slot = self.slot.lock();
        if slot.pending.as_ref().is_some_and(|p| p.id == self.id) {
            slot.pending = None;
        }
    }
}

/// A registered completion request.
pub struct CompletionTicket {
    rx: oneshot::Receiver<Vec<Suggestion>>,
    handle: CancelHandle,
}

impl CompletionTicket {
    pub fn cancel_handle(&self) -> CancelHandle {
        self.handle.clone()
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Wait for the event, at most `timeout`.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::HandlerTimeout`] if the event never fired
    /// - [`BridgeError::CompletionCancelled`] if replaced or cancelled
    pub async fn wait(self, timeout: Duration) -> Result<Completions> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(suggestions)) => Ok(Completions {
                completions: suggestions,
                is_async: true,
            }),
            Ok(Err(_)) => Err(BridgeError::CompletionCancelled),
            Err(_) => {
                self.handle.cancel();
                Err(BridgeError::HandlerTimeout {
                    id: format!("completion-{}", self.handle.id),
                    after: timeout,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn provider() -> (EventCompletionProvider, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let trigger = move |_: &str| -> Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };
        (EventCompletionProvider::new(Arc::new(trigger)), fired)
    }

    #[tokio::test]
    async fn test_delivered_event_resolves_request() {
        let (provider, fired) = provider();
        let provider = Arc::new(provider);

        let waiter = {
            let p = provider.clone();
            tokio::spawn(async move { p.complete("give @").await })
        };
        tokio::task::yield_now().await;
        while provider.pending_buffer().is_none() {
            tokio::task::yield_now().await;
        }

        assert!(provider.deliver(vec![
            Suggestion::with_tooltip("@p", "Nearest player"),
            Suggestion::new("@a"),
        ]));

        let result = waiter.await.unwrap().unwrap();
        assert!(result.is_async);
        assert_eq!(result.completions[0].tooltip.as_deref(), Some("Nearest player"));
        assert_eq!(result.completions[1].tooltip, None);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_request_replaces_first() {
        let (provider, _) = provider();

        let first = provider.begin("ti").unwrap();
        let second = provider.begin("tim").unwrap();
        assert_eq!(provider.pending_buffer().as_deref(), Some("tim"));

        assert!(provider.deliver(vec![Suggestion::new("time")]));

        let first = first.wait(Duration::from_secs(1)).await;
        assert!(matches!(first, Err(BridgeError::CompletionCancelled)));
        let second = second.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(second.texts(), vec!["time"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_event_times_out() {
        let (provider, _) = provider();
        let provider = provider.timeout(Duration::from_secs(5));

        let result = provider.complete("weather ").await;
        assert!(matches!(result, Err(BridgeError::HandlerTimeout { .. })));
        assert!(provider.pending_buffer().is_none());
        assert!(!provider.deliver(vec![Suggestion::new("late")]));
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let (provider, _) = provider();

        let ticket = provider.begin("say").unwrap();
        let handle = ticket.cancel_handle();
        handle.cancel();
        handle.cancel();
        ticket.cancel();
        assert!(provider.pending_buffer().is_none());

        let result = ticket.wait(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(BridgeError::CompletionCancelled)));
    }

    #[tokio::test]
    async fn test_cancel_after_resolution_is_noop() {
        let (provider, _) = provider();

        let ticket = provider.begin("a").unwrap();
        let handle = ticket.cancel_handle();
        provider.deliver(vec![Suggestion::new("ab")]);

        let next = provider.begin("b").unwrap();
        handle.cancel();
        assert_eq!(provider.pending_buffer().as_deref(), Some("b"));

        assert_eq!(ticket.wait(Duration::from_secs(1)).await.unwrap().texts(), vec!["ab"]);
        next.cancel();
    }

    #[test]
    fn test_trigger_failure_clears_slot() {
        let trigger = |_: &str| -> Result<()> { Err(BridgeError::HandlerFailed("no console".into())) };
        let provider = EventCompletionProvider::new(Arc::new(trigger));

        assert!(provider.begin("x").is_err());
        assert!(provider.pending_buffer().is_none());
    }
}
