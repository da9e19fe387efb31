use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use base64::Engine;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{Client, StatusCode, Url};
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::transport::config::SessionConfig;
use crate::transport::transport::{Transport, TransportDelegate};
use crate::types::types::{
    AuthenticationInfo, CompletionError, OperationId, Progress, SessionId, TransportError,
};

/// Write buffer for download files (256 KB).
const WRITE_BUFFER_CAPACITY: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperationKind {
    Fetch,
    Download,
}

struct PendingOperation {
    kind: OperationKind,
    url: Url,
    delegate: Option<Arc<dyn TransportDelegate>>,
}

/// Target for operations resumed without a delegate.
struct DiscardingDelegate;

impl TransportDelegate for DiscardingDelegate {}

/// Session state shared with the per-operation tasks.
struct SessionShared {
    client: Client,
    headers: HashMap<String, Vec<String>>,
    auth_header: Option<String>,
    download_dir: PathBuf,
}

impl SessionShared {
    /// Builds a GET request carrying the session's headers, and basic auth if
    /// configured.
    fn request(&self, url: &Url) -> reqwest::RequestBuilder {
        let mut builder = self.client.get(url.clone());
        for (key, values) in &self.headers {
            for value in values {
                builder = builder.header(key.as_str(), value.as_str());
            }
        }
        if let Some(auth_value) = &self.auth_header {
            builder = builder.header("Authorization", auth_value.as_str());
        }
        builder
    }
}

/// Everything a running operation needs to report back.
struct OperationContext {
    session: SessionId,
    operation: OperationId,
    url: Url,
    delegate: Arc<dyn TransportDelegate>,
}

fn cancelled() -> CompletionError {
    CompletionError::Transport(TransportError::Cancelled)
}

/// Pre-computes the Basic auth header value, if authentication is configured.
fn precompute_auth(authentication: Option<&AuthenticationInfo>) -> Option<String> {
    authentication.map(|auth| {
        let credentials = format!("{}:{}", auth.username, auth.password);
        let encoded = base64::engine::general_purpose::STANDARD.encode(&credentials);
        format!("Basic {}", encoded)
    })
}

/// A `Transport` backed by one `reqwest::Client`.
///
/// Each resumed operation runs in its own tokio task on the runtime the
/// session was created on, so all callbacks for one operation are sequential
/// while different operations proceed concurrently. Dropping the session
/// cancels whatever is still in flight.
///
/// Once invalidated, the session no longer starts work: every operation,
/// whether in flight, waiting with a delegate, or resumed later, completes
/// with `TransportError::Cancelled`.
pub struct ReqwestSession {
    id: SessionId,
    shared: Arc<SessionShared>,
    runtime: Handle,
    next_operation: AtomicU64,
    operations: Mutex<HashMap<OperationId, PendingOperation>>,
    invalidated: AtomicBool,
    cancel_token: CancellationToken,
}

impl ReqwestSession {
    /// Must be called from within a tokio runtime.
    pub fn new(config: &SessionConfig) -> Result<Self, TransportError> {
        let runtime = Handle::try_current().map_err(|_| TransportError::RuntimeUnavailable)?;

        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .tcp_nodelay(true);
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder
            .build()
            .map_err(|e| TransportError::ClientBuild(e.to_string()))?;

        let id = SessionId::new();
        log::debug!("[ReqwestSession] session={}: created", id);

        Ok(Self {
            id,
            shared: Arc::new(SessionShared {
                client,
                headers: config.headers.clone(),
                auth_header: precompute_auth(config.authentication.as_ref()),
                download_dir: config.download_dir.clone(),
            }),
            runtime,
            next_operation: AtomicU64::new(1),
            operations: Mutex::new(HashMap::new()),
            invalidated: AtomicBool::new(false),
            cancel_token: CancellationToken::new(),
        })
    }

    /// Number of created operations not yet resumed.
    pub fn pending_operations(&self) -> usize {
        self.lock_operations().len()
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::SeqCst)
    }

    fn lock_operations(&self) -> MutexGuard<'_, HashMap<OperationId, PendingOperation>> {
        self.operations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn create_operation(&self, kind: OperationKind, url: Url) -> OperationId {
        let operation = OperationId::new(self.next_operation.fetch_add(1, Ordering::Relaxed));
        log::debug!(
            "[ReqwestSession] session={}: created {:?} operation={} url={}",
            self.id, kind, operation, url
        );
        self.lock_operations().insert(
            operation,
            PendingOperation {
                kind,
                url,
                delegate: None,
            },
        );
        operation
    }
}

impl Transport for ReqwestSession {
    fn session_id(&self) -> SessionId {
        self.id
    }

    fn create_fetch_operation(&self, url: Url) -> OperationId {
        self.create_operation(OperationKind::Fetch, url)
    }

    fn create_download_operation(&self, url: Url) -> OperationId {
        self.create_operation(OperationKind::Download, url)
    }

    fn set_delegate(&self, operation: OperationId, delegate: Arc<dyn TransportDelegate>) {
        match self.lock_operations().get_mut(&operation) {
            Some(pending) => pending.delegate = Some(delegate),
            None => log::warn!(
                "[ReqwestSession] session={}: set_delegate for unknown or running operation={}",
                self.id, operation
            ),
        }
    }

    fn resume(&self, operation: OperationId) {
        let Some(pending) = self.lock_operations().remove(&operation) else {
            log::warn!(
                "[ReqwestSession] session={}: resume of unknown or already resumed operation={}",
                self.id, operation
            );
            return;
        };

        if self.is_invalidated() {
            log::info!(
                "[ReqwestSession] session={}: operation={} resumed after invalidation, cancelling",
                self.id, operation
            );
            if let Some(delegate) = pending.delegate {
                delegate.on_completed(self.id, operation, Some(&cancelled()));
            }
            return;
        }

        let delegate = pending
            .delegate
            .unwrap_or_else(|| Arc::new(DiscardingDelegate));
        let ctx = OperationContext {
            session: self.id,
            operation,
            url: pending.url,
            delegate,
        };
        let shared = Arc::clone(&self.shared);
        let token = self.cancel_token.child_token();

        log::info!(
            "[ReqwestSession] session={}: resuming {:?} operation={} url={}",
            self.id, pending.kind, operation, ctx.url
        );

        match pending.kind {
            OperationKind::Fetch => {
                self.runtime.spawn(async move {
                    let error = match run_fetch(&shared, &ctx, &token).await {
                        Ok(status) => server_error(status),
                        Err(err) => Some(CompletionError::Transport(err)),
                    };
                    finish(&ctx, error);
                });
            }
            OperationKind::Download => {
                self.runtime.spawn(async move {
                    let error = match run_download(&shared, &ctx, &token).await {
                        Ok((location, status)) => {
                            ctx.delegate
                                .on_download_finished(ctx.session, ctx.operation, &location);
                            server_error(status)
                        }
                        Err(err) => Some(CompletionError::Transport(err)),
                    };
                    finish(&ctx, error);
                });
            }
        }
    }

    fn discard(&self, operation: OperationId) {
        if self.lock_operations().remove(&operation).is_some() {
            log::debug!(
                "[ReqwestSession] session={}: discarded unresumed operation={}",
                self.id, operation
            );
        }
    }

    fn invalidate_and_cancel(&self) {
        log::info!("[ReqwestSession] session={}: invalidated", self.id);
        self.invalidated.store(true, Ordering::SeqCst);

        // Entries without a delegate stay until their owner resumes or
        // discards them; `resume` cancels them then.
        let waiting: Vec<(OperationId, Arc<dyn TransportDelegate>)> = {
            let mut operations = self.lock_operations();
            let ids: Vec<OperationId> = operations
                .iter()
                .filter(|(_, pending)| pending.delegate.is_some())
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| {
                    let pending = operations.remove(&id)?;
                    pending.delegate.map(|delegate| (id, delegate))
                })
                .collect()
        };
        for (operation, delegate) in waiting {
            log::debug!(
                "[ReqwestSession] session={}: cancelling unresumed operation={}",
                self.id, operation
            );
            delegate.on_completed(self.id, operation, Some(&cancelled()));
        }

        self.cancel_token.cancel();
    }
}

impl Drop for ReqwestSession {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// 4xx/5xx responses complete with a server error; everything else is clean.
fn server_error(status: StatusCode) -> Option<CompletionError> {
    if status.is_client_error() || status.is_server_error() {
        Some(CompletionError::Server {
            status: status.as_u16(),
        })
    } else {
        None
    }
}

fn finish(ctx: &OperationContext, error: Option<CompletionError>) {
    match &error {
        None => log::info!("[ReqwestSession] operation={}: completed", ctx.operation),
        Some(err) => log::info!("[ReqwestSession] operation={}: completed with {}", ctx.operation, err),
    }
    ctx.delegate
        .on_completed(ctx.session, ctx.operation, error.as_ref());
}

async fn send(
    shared: &SessionShared,
    url: &Url,
    token: &CancellationToken,
) -> Result<reqwest::Response, TransportError> {
    let request = shared.request(url);
    tokio::select! {
        _ = token.cancelled() => Err(TransportError::Cancelled),
        response = request.send() => response.map_err(TransportError::from),
    }
}

async fn next_chunk<S>(body: &mut S, token: &CancellationToken) -> Result<Option<Bytes>, TransportError>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
{
    tokio::select! {
        _ = token.cancelled() => Err(TransportError::Cancelled),
        chunk = body.next() => chunk.transpose().map_err(TransportError::from),
    }
}

/// Streams the response body into `on_chunk_received`.
async fn run_fetch(
    shared: &SessionShared,
    ctx: &OperationContext,
    token: &CancellationToken,
) -> Result<StatusCode, TransportError> {
    let response = send(shared, &ctx.url, token).await?;
    let status = response.status();
    log::debug!(
        "[run_fetch] operation={}: response status={}, content_length={:?}",
        ctx.operation, status, response.content_length()
    );

    let mut body = pin!(response.bytes_stream());
    while let Some(chunk) = next_chunk(&mut body, token).await? {
        ctx.delegate
            .on_chunk_received(ctx.session, ctx.operation, &chunk);
    }
    Ok(status)
}

/// Streams the response body into a fresh file under the download directory.
async fn run_download(
    shared: &SessionShared,
    ctx: &OperationContext,
    token: &CancellationToken,
) -> Result<(PathBuf, StatusCode), TransportError> {
    let response = send(shared, &ctx.url, token).await?;
    let status = response.status();
    let expected = response
        .content_length()
        .and_then(|len| i64::try_from(len).ok())
        .unwrap_or(Progress::UNKNOWN_TOTAL);
    log::debug!(
        "[run_download] operation={}: response status={}, expected={}",
        ctx.operation, status, expected
    );

    tokio::fs::create_dir_all(&shared.download_dir).await?;
    let location = shared
        .download_dir
        .join(format!("urlstream-{}.download", Uuid::new_v4()));

    match write_body(response, &location, expected, ctx, token).await {
        Ok(()) => Ok((location, status)),
        Err(err) => {
            remove_partial(&location).await;
            Err(err)
        }
    }
}

async fn write_body(
    response: reqwest::Response,
    location: &Path,
    expected: i64,
    ctx: &OperationContext,
    token: &CancellationToken,
) -> Result<(), TransportError> {
    let file = tokio::fs::File::create(location).await?;
    let mut writer = tokio::io::BufWriter::with_capacity(WRITE_BUFFER_CAPACITY, file);

    let mut total_written: i64 = 0;
    let mut body = pin!(response.bytes_stream());
    while let Some(chunk) = next_chunk(&mut body, token).await? {
        writer.write_all(&chunk).await?;
        let written = chunk.len() as i64;
        total_written += written;
        ctx.delegate.on_download_progress(
            ctx.session,
            ctx.operation,
            written,
            total_written,
            expected,
        );
    }

    writer.flush().await?;
    Ok(())
}

async fn remove_partial(location: &Path) {
    if let Err(err) = tokio::fs::remove_file(location).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            log::error!(
                "[run_download] failed to remove partial file {}: {}",
                location.display(),
                err
            );
        }
    }
}
