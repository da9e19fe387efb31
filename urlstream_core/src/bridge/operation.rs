use crate::stream::EventStream;
use crate::types::types::{OperationId, OperationIdentity, TransportError};

/// Caller-facing side of a bridge.
pub trait Operation {
    type State: Clone + Send + 'static;

    /// Stable id of the underlying transport operation, for diagnostics.
    fn identifier(&self) -> OperationId;

    fn identity(&self) -> OperationIdentity;

    fn stream(&self) -> &EventStream<Self::State, TransportError>;

    /// Starts the transport operation. Call at most once.
    fn resume(&self);
}
