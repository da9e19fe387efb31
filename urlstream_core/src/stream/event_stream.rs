use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::mpsc;

use crate::stream::observer::{Sink, StreamObserver};
use crate::stream::subscription::{ChannelObserver, Subscription};
use crate::types::types::TransportError;

/// Terminal outcome of a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion<E> {
    Finished,
    Failed(E),
}

/// One item observed by a `Subscription`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent<T, E> {
    Value(T),
    Finished,
    Failed(E),
}

impl<T, E> StreamEvent<T, E> {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Value(_))
    }
}

impl<T, E> From<Completion<E>> for StreamEvent<T, E> {
    fn from(completion: Completion<E>) -> Self {
        match completion {
            Completion::Finished => StreamEvent::Finished,
            Completion::Failed(err) => StreamEvent::Failed(err),
        }
    }
}

type ObserverBox<T, E> = Box<dyn StreamObserver<T, E>>;

struct StreamInner<T, E> {
    latest: Option<T>,
    terminal: Option<Completion<E>>,
    observers: Vec<(u64, ObserverBox<T, E>)>,
    next_observer_id: u64,
}

/// Single-producer, multi-subscriber broadcast of typed values ending in at
/// most one terminal event.
///
/// Once closed, every further `push`, `close` or `complete_with` is a no-op
/// that returns `false`. Values are delivered to all observers under one lock,
/// so every subscriber sees the same order.
pub struct EventStream<T, E = TransportError> {
    inner: Arc<Mutex<StreamInner<T, E>>>,
}

impl<T, E> Clone for EventStream<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> Default for EventStream<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> EventStream<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StreamInner {
                latest: None,
                terminal: None,
                observers: Vec::new(),
                next_observer_id: 0,
            })),
        }
    }

    /// Delivers `value` to every observer. Returns `false` after termination.
    pub fn push(&self, value: T) -> bool {
        let mut inner = lock(&self.inner);
        if inner.terminal.is_some() {
            log::debug!("[EventStream] dropping value pushed after termination");
            return false;
        }
        Self::deliver(&mut inner, value);
        true
    }

    /// Delivers the terminal marker and disables the stream.
    pub fn close(&self, completion: Completion<E>) -> bool {
        let mut inner = lock(&self.inner);
        if inner.terminal.is_some() {
            log::debug!("[EventStream] ignoring second terminal event");
            return false;
        }
        Self::terminate(&mut inner, completion);
        true
    }

    /// Pushes a final value and finishes the stream in one step, so no other
    /// producer call can land between the two.
    pub fn complete_with(&self, value: T) -> bool {
        let mut inner = lock(&self.inner);
        if inner.terminal.is_some() {
            log::debug!("[EventStream] ignoring final value pushed after termination");
            return false;
        }
        Self::deliver(&mut inner, value);
        Self::terminate(&mut inner, Completion::Finished);
        true
    }

    pub fn is_terminated(&self) -> bool {
        lock(&self.inner).terminal.is_some()
    }

    /// The terminal outcome, once the stream has closed.
    pub fn completion(&self) -> Option<Completion<E>> {
        lock(&self.inner).terminal.clone()
    }

    /// Most recently pushed value.
    pub fn latest(&self) -> Option<T> {
        lock(&self.inner).latest.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        let mut inner = lock(&self.inner);
        inner.observers.retain(|(_, observer)| !observer.is_closed());
        inner.observers.len()
    }

    /// Channel-backed subscription. See `Subscription`.
    pub fn subscribe(&self) -> Subscription<T, E> {
        let (tx, rx) = mpsc::unbounded_channel();
        // The handle is dropped without detaching; a closed receiver prunes
        // the observer on the next delivery.
        self.attach(Box::new(ChannelObserver::new(tx))).forget();
        Subscription::new(rx)
    }

    /// Callback-based subscription. Detaches when the handle is dropped.
    pub fn sink<V, C>(&self, on_value: V, on_terminal: C) -> ObserverHandle<T, E>
    where
        V: FnMut(&T) + Send + 'static,
        C: FnOnce(&Completion<E>) + Send + 'static,
    {
        self.attach(Box::new(Sink::new(on_value, on_terminal)))
    }

    pub fn add_observer(&self, observer: ObserverBox<T, E>) -> ObserverHandle<T, E> {
        self.attach(observer)
    }

    fn attach(&self, mut observer: ObserverBox<T, E>) -> ObserverHandle<T, E> {
        let mut inner = lock(&self.inner);

        if let Some(latest) = inner.latest.as_ref() {
            observer.on_value(latest);
        }
        if let Some(terminal) = inner.terminal.as_ref() {
            observer.on_terminal(terminal);
            return ObserverHandle::detached();
        }

        let id = inner.next_observer_id;
        inner.next_observer_id += 1;
        inner.observers.push((id, observer));

        ObserverHandle {
            id,
            stream: Arc::downgrade(&self.inner),
        }
    }

    fn deliver(inner: &mut StreamInner<T, E>, value: T) {
        inner.observers.retain(|(_, observer)| !observer.is_closed());
        for (_, observer) in inner.observers.iter_mut() {
            observer.on_value(&value);
        }
        inner.latest = Some(value);
    }

    fn terminate(inner: &mut StreamInner<T, E>, completion: Completion<E>) {
        let observers = std::mem::take(&mut inner.observers);
        for (_, mut observer) in observers {
            if !observer.is_closed() {
                observer.on_terminal(&completion);
            }
        }
        inner.terminal = Some(completion);
    }
}

/// Keeps a callback observer attached. Dropping it (or calling `cancel`)
/// detaches the observer; nothing is delivered after that.
///
/// Must not be dropped from inside one of the same stream's callbacks.
#[must_use = "the observer detaches when the handle is dropped"]
pub struct ObserverHandle<T, E> {
    id: u64,
    stream: Weak<Mutex<StreamInner<T, E>>>,
}

impl<T, E> ObserverHandle<T, E> {
    fn detached() -> Self {
        Self {
            id: u64::MAX,
            stream: Weak::new(),
        }
    }

    pub fn cancel(self) {
        drop(self);
    }

    /// Leaves the observer attached for the rest of the stream's life.
    pub fn forget(mut self) {
        self.stream = Weak::new();
    }
}

impl<T, E> Drop for ObserverHandle<T, E> {
    fn drop(&mut self) {
        if let Some(inner) = self.stream.upgrade() {
            let id = self.id;
            lock(&inner).observers.retain(|(observer_id, _)| *observer_id != id);
        }
    }
}

/// Recovers the guard from a poisoned lock; observers are user code and a
/// panicking one must not wedge the producer.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
