use std::path::Path;
use std::sync::Arc;

use reqwest::Url;

use crate::bridge::operation::Operation;
use crate::stream::{Completion, EventStream};
use crate::transport::{Transport, TransportDelegate};
use crate::types::types::{
    CompletionError, DownloadState, OperationId, OperationIdentity, Progress, SessionId,
    TransportError,
};

struct DownloadHandler {
    identity: OperationIdentity,
    stream: EventStream<DownloadState>,
}

impl DownloadHandler {
    /// Whether a callback belongs to this operation. Callbacks for other
    /// operations on the same session are expected and dropped.
    fn accepts(&self, session: SessionId, operation: OperationId) -> bool {
        let accepted = self.identity.matches(session, operation);
        if !accepted {
            log::debug!(
                "[DownloadBridge] op={}: ignoring callback for {}/{}",
                self.identity, session, operation
            );
        }
        accepted
    }
}

impl TransportDelegate for DownloadHandler {
    fn on_download_progress(
        &self,
        session: SessionId,
        operation: OperationId,
        _bytes_written: i64,
        total_bytes_written: i64,
        total_bytes_expected: i64,
    ) {
        if !self.accepts(session, operation) {
            return;
        }

        let progress = Progress::new(total_bytes_written, total_bytes_expected);
        log::debug!(
            "[DownloadBridge] op={}: {}/{} bytes",
            self.identity, progress.completed_units, progress.total_units
        );
        self.stream.push(DownloadState::Downloading(progress));
    }

    fn on_download_finished(&self, session: SessionId, operation: OperationId, location: &Path) {
        if !self.accepts(session, operation) {
            return;
        }

        log::info!(
            "[DownloadBridge] op={}: finished at {}",
            self.identity,
            location.display()
        );
        self.stream
            .complete_with(DownloadState::Completed(location.to_path_buf()));
    }

    fn on_completed(&self, session: SessionId, operation: OperationId, error: Option<&CompletionError>) {
        if !self.accepts(session, operation) {
            return;
        }

        // Some transports report an error after the file was already handed
        // over; the first terminal event stands.
        if self.stream.is_terminated() {
            if let Some(err) = error {
                log::debug!(
                    "[DownloadBridge] op={}: ignoring completion error after termination: {}",
                    self.identity, err
                );
            }
            return;
        }

        let failure = match error.and_then(CompletionError::as_transport) {
            Some(err) => err.clone(),
            None => TransportError::MissingLocation,
        };
        log::info!("[DownloadBridge] op={}: failed: {}", self.identity, failure);
        self.stream.close(Completion::Failed(failure));
    }
}

/// Wraps one to-disk download operation and exposes its lifecycle as an
/// `EventStream<DownloadState>`.
///
/// On success: `Uninitiated, WaitingForResponse, Downloading(progress)*,
/// Completed(location), <finished>`. On failure the stream ends with
/// `<failed(error)>` and never carries `Completed`.
pub struct DownloadBridge {
    transport: Arc<dyn Transport>,
    url: Url,
    handler: Arc<DownloadHandler>,
}

impl DownloadBridge {
    pub fn new(transport: Arc<dyn Transport>, url: Url) -> Self {
        let operation = transport.create_download_operation(url.clone());
        let identity = OperationIdentity::new(transport.session_id(), operation);

        let stream = EventStream::new();
        stream.push(DownloadState::Uninitiated);

        Self {
            transport,
            url,
            handler: Arc::new(DownloadHandler { identity, stream }),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn callback_target(&self) -> Arc<dyn TransportDelegate> {
        self.handler.clone()
    }
}

impl Operation for DownloadBridge {
    type State = DownloadState;

    fn identifier(&self) -> OperationId {
        self.handler.identity.operation
    }

    fn identity(&self) -> OperationIdentity {
        self.handler.identity
    }

    fn stream(&self) -> &EventStream<DownloadState, TransportError> {
        &self.handler.stream
    }

    fn resume(&self) {
        let identity = self.handler.identity;
        log::debug!("[DownloadBridge] op={}: resuming {}", identity, self.url);

        self.transport
            .set_delegate(identity.operation, self.callback_target());
        self.handler.stream.push(DownloadState::WaitingForResponse);
        self.transport.resume(identity.operation);
    }
}

impl Drop for DownloadBridge {
    fn drop(&mut self) {
        // No-op for an operation that was resumed.
        self.transport.discard(self.handler.identity.operation);
    }
}
