//! Typed broadcast signals
//!
//! Slots connected with [`Signal::connect`] run synchronously inside
//! [`Signal::emit`], in connection order. A slot that returns an error or
//! panics is logged and skipped; the remaining slots still run.
//! [`Signal::subscribe`] hands out a `tokio::sync::broadcast` receiver for
//! observers that would rather await events.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::warn;

/// Default buffer for async subscribers
pub const DEFAULT_SIGNAL_CAPACITY: usize = 256;

/// Slot handler type
pub type SlotHandler<T> = Arc<dyn Fn(&T) -> anyhow::Result<()> + Send + Sync>;

/// Handle returned by [`Signal::connect`], used to disconnect the slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u64);

struct SignalInner<T> {
    name: String,
    slots: Mutex<Vec<(SlotId, SlotHandler<T>)>>,
    next_slot: AtomicU64,
    sender: broadcast::Sender<T>,
}

/// A named notification channel carrying values of type `T`
pub struct Signal<T> {
    inner: Arc<SignalInner<T>>,
}

impl<T: Clone + Send + 'static> Signal<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_capacity(name, DEFAULT_SIGNAL_CAPACITY)
    }

    pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(SignalInner {
                name: name.into(),
                slots: Mutex::new(Vec::new()),
                next_slot: AtomicU64::new(1),
                sender,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Connect a synchronous slot
    pub fn connect<F>(&self, handler: F) -> SlotId
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SlotId(self.inner.next_slot.fetch_add(1, Ordering::Relaxed));
        self.slots().push((id, Arc::new(handler)));
        id
    }

    /// Disconnect a slot. Returns false if it was not connected.
    pub fn disconnect(&self, id: SlotId) -> bool {
        let mut slots = self.slots();
        let before = slots.len();
        slots.retain(|(slot, _)| *slot != id);
        slots.len() != before
    }

    /// Subscribe for asynchronous delivery
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.inner.sender.subscribe()
    }

    pub fn slot_count(&self) -> usize {
        self.slots().len()
    }

    /// Deliver `args` to every slot, then to async subscribers
    pub fn emit(&self, args: T) {
        // Snapshot so slots may connect or disconnect while we deliver.
        let slots: Vec<(SlotId, SlotHandler<T>)> = self.slots().clone();

        for (id, handler) in slots {
            match catch_unwind(AssertUnwindSafe(|| handler(&args))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(signal = %self.inner.name, slot = ?id, "Signal handler error: {:#}", e);
                }
                Err(_) => {
                    warn!(signal = %self.inner.name, slot = ?id, "Signal handler panicked");
                }
            }
        }

        // No receivers is not an error.
        let _ = self.inner.sender.send(args);
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, Vec<(SlotId, SlotHandler<T>)>> {
        self.inner
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("name", &self.inner.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_slots_run_in_connection_order() {
        let signal: Signal<u32> = Signal::new("order");
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            signal.connect(move |value| {
                seen.lock().unwrap().push(format!("{tag}:{value}"));
                Ok(())
            });
        }

        signal.emit(1);
        signal.emit(2);

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec!["first:1", "second:1", "third:1", "first:2", "second:2", "third:2"]
        );
    }

    #[test]
    fn test_failing_slots_do_not_block_others() {
        let signal: Signal<&'static str> = Signal::new("isolation");
        let delivered = Arc::new(AtomicUsize::new(0));

        signal.connect(|_| Err(anyhow::anyhow!("listener exploded")));
        signal.connect(|_| panic!("listener panicked"));
        let counter = Arc::clone(&delivered);
        signal.connect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        signal.emit("go");
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disconnect_only_removes_one_slot() {
        let signal: Signal<()> = Signal::new("disconnect");
        let hits = Arc::new(AtomicUsize::new(0));

        let a = {
            let hits = Arc::clone(&hits);
            signal.connect(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };
        {
            let hits = Arc::clone(&hits);
            signal.connect(move |_| {
                hits.fetch_add(10, Ordering::SeqCst);
                Ok(())
            });
        }

        assert!(signal.disconnect(a));
        assert!(!signal.disconnect(a));
        signal.emit(());
        assert_eq!(hits.load(Ordering::SeqCst), 10);
        assert_eq!(signal.slot_count(), 1);
    }

    #[tokio::test]
    async fn test_async_subscribers_receive_in_order() {
        let signal: Signal<u8> = Signal::new("async");
        let mut rx = signal.subscribe();

        signal.emit(7);
        signal.emit(9);

        assert_eq!(rx.recv().await.unwrap(), 7);
        assert_eq!(rx.recv().await.unwrap(), 9);
    }
}
