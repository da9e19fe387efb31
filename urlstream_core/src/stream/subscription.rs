use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::stream::event_stream::{Completion, StreamEvent};
use crate::stream::observer::StreamObserver;

/// Receives every value pushed to an `EventStream` from the moment of
/// subscription, then the terminal event, then `None`.
pub struct Subscription<T, E> {
    rx: mpsc::UnboundedReceiver<StreamEvent<T, E>>,
}

impl<T, E> Subscription<T, E> {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<StreamEvent<T, E>>) -> Self {
        Self { rx }
    }

    pub async fn next_event(&mut self) -> Option<StreamEvent<T, E>> {
        self.rx.recv().await
    }

    /// Non-blocking variant of `next_event`.
    pub fn try_next_event(&mut self) -> Option<StreamEvent<T, E>> {
        self.rx.try_recv().ok()
    }
}

impl<T, E> Unpin for Subscription<T, E> {}

impl<T, E> Stream for Subscription<T, E> {
    type Item = StreamEvent<T, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Forwards stream deliveries into a subscription's channel.
pub(crate) struct ChannelObserver<T, E> {
    tx: Option<mpsc::UnboundedSender<StreamEvent<T, E>>>,
}

impl<T, E> ChannelObserver<T, E> {
    pub(crate) fn new(tx: mpsc::UnboundedSender<StreamEvent<T, E>>) -> Self {
        Self { tx: Some(tx) }
    }
}

impl<T, E> StreamObserver<T, E> for ChannelObserver<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn on_value(&mut self, value: &T) {
        if let Some(tx) = &self.tx {
            // send() only fails once the subscription is dropped.
            let _ = tx.send(StreamEvent::Value(value.clone()));
        }
    }

    fn on_terminal(&mut self, completion: &Completion<E>) {
        // Taking the sender closes the channel after the terminal event.
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(completion.clone().into());
        }
    }

    fn is_closed(&self) -> bool {
        self.tx.as_ref().map_or(true, |tx| tx.is_closed())
    }
}
