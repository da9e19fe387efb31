use crate::stream::event_stream::Completion;

/// Anything that wants to observe an `EventStream`.
///
/// Lifecycle:
/// - `on_value` is called for every value pushed while the observer is attached,
///   starting with the stream's most recent value at the time of attachment.
/// - `on_terminal` is called at most once, after which the observer is dropped.
///
/// Callbacks run synchronously while the stream's lock is held. An observer must
/// not push to, close, or subscribe to the same stream from inside a callback.
pub trait StreamObserver<T, E>: Send + 'static {
    fn on_value(&mut self, value: &T);

    fn on_terminal(&mut self, completion: &Completion<E>);

    /// Observers reporting `true` are detached before the next delivery.
    fn is_closed(&self) -> bool {
        false
    }
}

/// Closure-pair observer returned by `EventStream::sink`.
pub struct Sink<V, C> {
    on_value: V,
    on_terminal: Option<C>,
}

impl<V, C> Sink<V, C> {
    pub fn new(on_value: V, on_terminal: C) -> Self {
        Self {
            on_value,
            on_terminal: Some(on_terminal),
        }
    }
}

impl<T, E, V, C> StreamObserver<T, E> for Sink<V, C>
where
    V: FnMut(&T) + Send + 'static,
    C: FnOnce(&Completion<E>) + Send + 'static,
{
    fn on_value(&mut self, value: &T) {
        (self.on_value)(value);
    }

    fn on_terminal(&mut self, completion: &Completion<E>) {
        if let Some(on_terminal) = self.on_terminal.take() {
            on_terminal(completion);
        }
    }
}
