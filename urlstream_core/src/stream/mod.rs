pub mod event_stream;
pub mod observer;
pub mod subscription;

pub use event_stream::{Completion, EventStream, ObserverHandle, StreamEvent};
pub use observer::{Sink, StreamObserver};
pub use subscription::Subscription;
