use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use reqwest::Url;

use crate::types::types::{CompletionError, OperationId, SessionId};

/// Callback surface of a transport.
///
/// Every method carries the `(session, operation)` pair the callback belongs to.
/// Implementors only override the callbacks they care about. For a single
/// operation, callbacks are delivered sequentially; across operations they may
/// arrive concurrently on any thread.
///
/// Handlers must always return; they run on the transport's dispatch path.
pub trait TransportDelegate: Send + Sync {
    /// A piece of the response body, containing only bytes received since the
    /// previous call.
    fn on_chunk_received(&self, _session: SessionId, _operation: OperationId, _chunk: &Bytes) {}

    /// Download progress. `total_bytes_expected` is `Progress::UNKNOWN_TOTAL`
    /// when the server did not announce a length.
    fn on_download_progress(
        &self,
        _session: SessionId,
        _operation: OperationId,
        _bytes_written: i64,
        _total_bytes_written: i64,
        _total_bytes_expected: i64,
    ) {
    }

    /// The download body is complete and stored at `location`.
    fn on_download_finished(&self, _session: SessionId, _operation: OperationId, _location: &Path) {}

    /// Last callback for an operation.
    fn on_completed(
        &self,
        _session: SessionId,
        _operation: OperationId,
        _error: Option<&CompletionError>,
    ) {
    }
}

/// A session hosting any number of concurrent operations.
pub trait Transport: Send + Sync {
    fn session_id(&self) -> SessionId;

    /// Creates a suspended in-memory fetch operation.
    fn create_fetch_operation(&self, url: Url) -> OperationId;

    /// Creates a suspended to-disk download operation.
    fn create_download_operation(&self, url: Url) -> OperationId;

    /// Sets the callback target for one operation. Must precede `resume`.
    fn set_delegate(&self, operation: OperationId, delegate: Arc<dyn TransportDelegate>);

    /// Starts the operation. Returns immediately; progress is reported through
    /// the delegate. Resuming twice is a caller error.
    fn resume(&self, operation: OperationId);

    /// Forgets an operation that was created but never resumed. Operations
    /// already running are unaffected.
    fn discard(&self, _operation: OperationId) {}

    /// Cancels every in-flight operation; each completes with
    /// `TransportError::Cancelled`. Operations resumed afterwards complete the
    /// same way.
    fn invalidate_and_cancel(&self) {}
}
