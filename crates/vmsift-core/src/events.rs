//! Corrupt-data event types and the per-session listener registry.
//!
//! Walkers do not hand recoverable corruption back to their callers; they
//! report it here and keep going. Higher layers (report writers, interactive
//! front ends, tests) register listeners to see what was skipped and why.
//!
//! Every step a walker takes runs inside a [`WalkerScope`], so an event raised
//! by a nested walk is attributed to the innermost walker that was stepping
//! when it happened. Scopes pop themselves on drop, including when a step
//! returns early with an error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};

use crate::error::SiftError;

/// Corruption reported by a walker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptDataEvent
{
    /// Walker that was stepping when the event was raised (if any)
    pub walker: Option<&'static str>,
    /// What went wrong
    pub error: SiftError,
    /// Whether the walker gave up on the rest of its traversal
    pub fatal: bool,
}

impl CorruptDataEvent
{
    /// Human-readable description of the event.
    #[must_use]
    pub fn describe(&self) -> String
    {
        let severity = if self.fatal { "fatal" } else { "recoverable" };
        match self.walker {
            Some(walker) => format!("{walker}: {severity}: {}", self.error),
            None => format!("{severity}: {}", self.error),
        }
    }
}

/// Receiver of corrupt-data events
///
/// Listeners are called synchronously on the walking thread. They must not
/// drive the session that raised the event.
pub trait CorruptDataListener: Send + Sync
{
    /// Called once per raised event.
    fn corrupt_data(&self, event: &CorruptDataEvent);
}

impl<F> CorruptDataListener for F
where
    F: Fn(&CorruptDataEvent) + Send + Sync,
{
    fn corrupt_data(&self, event: &CorruptDataEvent)
    {
        self(event);
    }
}

/// Sender side of a corrupt-data event channel.
pub type CorruptDataSender = mpsc::Sender<CorruptDataEvent>;
/// Receiver side of a corrupt-data event channel.
pub type CorruptDataReceiver = mpsc::Receiver<CorruptDataEvent>;

/// Listener forwarding every event into an mpsc channel
///
/// A disconnected receiver is ignored; the walk carries on.
pub struct ChannelListener
{
    sender: Mutex<CorruptDataSender>,
}

impl ChannelListener
{
    /// Wrap an existing sender.
    pub fn new(sender: CorruptDataSender) -> Self
    {
        Self {
            sender: Mutex::new(sender),
        }
    }
}

impl CorruptDataListener for ChannelListener
{
    fn corrupt_data(&self, event: &CorruptDataEvent)
    {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = sender.send(event.clone());
    }
}

/// Create a channel listener plus the receiver that drains it.
#[must_use]
pub fn event_channel() -> (ChannelListener, CorruptDataReceiver)
{
    let (sender, receiver) = mpsc::channel();
    (ChannelListener::new(sender), receiver)
}

/// Listener that keeps every event it sees
#[derive(Default)]
pub struct CollectingListener
{
    events: Mutex<Vec<CorruptDataEvent>>,
}

impl CollectingListener
{
    /// Create an empty collector.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Copy of the events collected so far.
    pub fn events(&self) -> Vec<CorruptDataEvent>
    {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of events collected so far.
    pub fn len(&self) -> usize
    {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no event has been collected.
    pub fn is_empty(&self) -> bool
    {
        self.len() == 0
    }

    /// Number of fatal events collected so far.
    pub fn fatal_count(&self) -> usize
    {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| event.fatal)
            .count()
    }
}

impl CorruptDataListener for CollectingListener
{
    fn corrupt_data(&self, event: &CorruptDataEvent)
    {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event.clone());
    }
}

/// Identifier returned by [`EventRegistry::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Listener stack plus walker attribution stack for one session
#[derive(Default)]
pub struct EventRegistry
{
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn CorruptDataListener>)>>,
    walkers: Mutex<Vec<&'static str>>,
}

impl EventRegistry
{
    /// Create a registry with no listeners.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Push a listener; it stays until [`unregister`](Self::unregister) is called.
    pub fn register(&self, listener: Arc<dyn CorruptDataListener>) -> ListenerId
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unregister(&self, id: ListenerId) -> bool
    {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        match listeners.iter().rposition(|(entry, _)| *entry == id) {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }

    /// Register a listener for the lifetime of the returned guard.
    ///
    /// ## Example
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use vmsift_core::error::SiftError;
    /// use vmsift_core::events::{CollectingListener, EventRegistry};
    /// use vmsift_core::types::Address;
    ///
    /// let registry = EventRegistry::new();
    /// let collector = Arc::new(CollectingListener::new());
    /// {
    ///     let _scope = registry.scoped(collector.clone());
    ///     registry.raise(SiftError::corrupt(Address::from(0x10), "bad"), false);
    /// }
    /// registry.raise(SiftError::corrupt(Address::from(0x20), "unheard"), false);
    /// assert_eq!(collector.len(), 1);
    /// ```
    pub fn scoped(&self, listener: Arc<dyn CorruptDataListener>) -> ListenerScope<'_>
    {
        let id = self.register(listener);
        ListenerScope { registry: self, id }
    }

    /// Number of listeners currently registered.
    pub fn listener_count(&self) -> usize
    {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Attribute events to `walker` until the returned guard drops.
    pub fn enter(&self, walker: &'static str) -> WalkerScope<'_>
    {
        self.walkers.lock().unwrap_or_else(PoisonError::into_inner).push(walker);
        WalkerScope { registry: self }
    }

    /// Innermost walker currently stepping.
    pub fn current_walker(&self) -> Option<&'static str>
    {
        self.walkers.lock().unwrap_or_else(PoisonError::into_inner).last().copied()
    }

    /// Notify every registered listener.
    ///
    /// Listeners are called without any registry lock held, so a listener
    /// may itself register or unregister.
    pub fn raise(&self, error: SiftError, fatal: bool)
    {
        let event = CorruptDataEvent {
            walker: self.current_walker(),
            error,
            fatal,
        };
        tracing::warn!(walker = event.walker, fatal, "{}", event.error);

        let listeners: Vec<Arc<dyn CorruptDataListener>> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener.corrupt_data(&event);
        }
    }
}

impl std::fmt::Debug for EventRegistry
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("EventRegistry")
            .field("listeners", &self.listener_count())
            .field("walker", &self.current_walker())
            .finish()
    }
}

/// RAII guard returned by [`EventRegistry::scoped`]
#[must_use = "the listener is unregistered when the scope drops"]
pub struct ListenerScope<'a>
{
    registry: &'a EventRegistry,
    id: ListenerId,
}

impl Drop for ListenerScope<'_>
{
    fn drop(&mut self)
    {
        self.registry.unregister(self.id);
    }
}

/// RAII guard returned by [`EventRegistry::enter`]
#[must_use = "attribution ends when the scope drops"]
pub struct WalkerScope<'a>
{
    registry: &'a EventRegistry,
}

impl Drop for WalkerScope<'_>
{
    fn drop(&mut self)
    {
        self.registry
            .walkers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::types::Address;

    #[test]
    fn test_events_are_attributed_to_innermost_walker()
    {
        let registry = EventRegistry::new();
        let collector = Arc::new(CollectingListener::new());
        let _listen = registry.scoped(collector.clone());

        {
            let _outer = registry.enter("SegmentWalker");
            {
                let _inner = registry.enter("ClassRecordWalker");
                registry.raise(SiftError::corrupt(Address::from(0x10), "size 0"), false);
            }
            registry.raise(SiftError::corrupt(Address::from(0x20), "bad link"), true);
        }
        registry.raise(SiftError::corrupt(Address::from(0x30), "loose"), false);

        let events = collector.events();
        assert_eq!(events[0].walker, Some("ClassRecordWalker"));
        assert_eq!(events[1].walker, Some("SegmentWalker"));
        assert!(events[1].fatal);
        assert_eq!(events[2].walker, None);
        assert_eq!(collector.fatal_count(), 1);
    }

    #[test]
    fn test_scope_pops_on_early_return()
    {
        fn step(registry: &EventRegistry) -> Result<(), SiftError>
        {
            let _scope = registry.enter("ArrayWalker");
            Err(SiftError::NoMoreElements)
        }

        let registry = EventRegistry::new();
        assert!(step(&registry).is_err());
        assert_eq!(registry.current_walker(), None);
    }

    #[test]
    fn test_channel_and_closure_listeners()
    {
        let registry = EventRegistry::new();
        let (listener, receiver) = event_channel();
        let seen = Arc::new(AtomicU64::new(0));
        let counter = seen.clone();

        let channel_id = registry.register(Arc::new(listener));
        let _closure = registry.scoped(Arc::new(move |_: &CorruptDataEvent| {
            counter.fetch_add(1, Ordering::Relaxed);
        }));

        registry.raise(SiftError::corrupt(Address::from(0x40), "bad tag"), false);
        assert!(registry.unregister(channel_id));
        assert!(!registry.unregister(channel_id));
        registry.raise(SiftError::corrupt(Address::from(0x50), "bad tag"), false);

        let received: Vec<_> = receiver.try_iter().collect();
        assert_eq!(received.len(), 1);
        assert!(received[0].describe().starts_with("recoverable"));
        assert_eq!(seen.load(Ordering::Relaxed), 2);
    }
}
