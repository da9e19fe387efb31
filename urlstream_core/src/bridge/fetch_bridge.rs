use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use reqwest::Url;

use crate::bridge::operation::Operation;
use crate::stream::{Completion, EventStream};
use crate::transport::{Transport, TransportDelegate};
use crate::types::types::{
    CompletionError, FetchState, OperationId, OperationIdentity, SessionId, TransportError,
};

/// Callback target of a `FetchBridge`. Holds the accumulation buffer and the
/// producing end of the stream.
struct FetchHandler {
    identity: OperationIdentity,
    buffer: Mutex<BytesMut>,
    stream: EventStream<FetchState>,
}

impl FetchHandler {
    /// Whether a callback belongs to this operation. Callbacks for other
    /// operations on the same session are expected and dropped.
    fn accepts(&self, session: SessionId, operation: OperationId) -> bool {
        let accepted = self.identity.matches(session, operation);
        if !accepted {
            log::debug!(
                "[FetchBridge] op={}: ignoring callback for {}/{}",
                self.identity, session, operation
            );
        }
        accepted
    }

    fn take_buffer(&self) -> Bytes {
        let mut buffer = self
            .buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        buffer.split().freeze()
    }
}

impl TransportDelegate for FetchHandler {
    fn on_chunk_received(&self, session: SessionId, operation: OperationId, chunk: &Bytes) {
        if !self.accepts(session, operation) {
            return;
        }
        if self.stream.is_terminated() {
            log::debug!(
                "[FetchBridge] op={}: dropping {} bytes received after termination",
                self.identity, chunk.len()
            );
            return;
        }

        // Only the terminal state carries data; no per-chunk push.
        self.buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend_from_slice(chunk);
    }

    fn on_completed(&self, session: SessionId, operation: OperationId, error: Option<&CompletionError>) {
        if !self.accepts(session, operation) {
            return;
        }

        match error.and_then(CompletionError::as_transport) {
            Some(err) => {
                log::info!("[FetchBridge] op={}: failed: {}", self.identity, err);
                // Partial payloads are never exposed.
                drop(self.take_buffer());
                self.stream.close(Completion::Failed(err.clone()));
            }
            None => {
                if let Some(CompletionError::Server { status }) = error {
                    log::debug!(
                        "[FetchBridge] op={}: server responded with status {}, delivering body",
                        self.identity, status
                    );
                }
                let data = self.take_buffer();
                log::info!("[FetchBridge] op={}: received {} bytes", self.identity, data.len());
                self.stream.complete_with(FetchState::DataReceived(data));
            }
        }
    }
}

/// Wraps one in-memory fetch operation and exposes its lifecycle as an
/// `EventStream<FetchState>`:
///
/// `Uninitiated, WaitingForResponse, DataReceived(bytes), <finished>` on success,
/// `Uninitiated, WaitingForResponse, <failed(error)>` on a client-side failure.
///
/// Server error statuses are not failures; their body is delivered as data.
pub struct FetchBridge {
    transport: Arc<dyn Transport>,
    url: Url,
    handler: Arc<FetchHandler>,
}

impl FetchBridge {
    pub fn new(transport: Arc<dyn Transport>, url: Url) -> Self {
        let operation = transport.create_fetch_operation(url.clone());
        let identity = OperationIdentity::new(transport.session_id(), operation);

        let stream = EventStream::new();
        stream.push(FetchState::Uninitiated);

        Self {
            transport,
            url,
            handler: Arc::new(FetchHandler {
                identity,
                buffer: Mutex::new(BytesMut::new()),
                stream,
            }),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The handler the transport calls back into.
    pub fn callback_target(&self) -> Arc<dyn TransportDelegate> {
        self.handler.clone()
    }
}

impl Operation for FetchBridge {
    type State = FetchState;

    fn identifier(&self) -> OperationId {
        self.handler.identity.operation
    }

    fn identity(&self) -> OperationIdentity {
        self.handler.identity
    }

    fn stream(&self) -> &EventStream<FetchState, TransportError> {
        &self.handler.stream
    }

    fn resume(&self) {
        let identity = self.handler.identity;
        log::debug!("[FetchBridge] op={}: resuming {}", identity, self.url);

        self.transport
            .set_delegate(identity.operation, self.callback_target());
        // Pushed before the transport starts so no callback can overtake it.
        self.handler.stream.push(FetchState::WaitingForResponse);
        self.transport.resume(identity.operation);
    }
}

impl Drop for FetchBridge {
    fn drop(&mut self) {
        // No-op for an operation that was resumed.
        self.transport.discard(self.handler.identity.operation);
    }
}
