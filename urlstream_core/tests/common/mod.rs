#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

use urlstream_core::stream::{StreamEvent, Subscription};
use urlstream_core::transport::{Transport, TransportDelegate};
use urlstream_core::types::types::{CompletionError, OperationId, SessionId};
use urlstream_core::Url;

/// Upper bound for any single event in network-backed tests.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Generates deterministic test data.
pub fn generate_test_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

pub fn url(raw: &str) -> Url {
    Url::parse(raw).unwrap()
}

/// Collects events until the terminal one, failing the test if any event
/// takes longer than `EVENT_TIMEOUT`. Afterwards asserts nothing else
/// arrives within a short window.
pub async fn collect_until_terminal<T, E>(sub: &mut Subscription<T, E>) -> Vec<StreamEvent<T, E>>
where
    T: std::fmt::Debug,
    E: std::fmt::Debug,
{
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(EVENT_TIMEOUT, sub.next_event())
            .await
            .expect("stream should produce an event within the timeout")
            .expect("stream ended without a terminal event");
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            break;
        }
    }

    let after = tokio::time::timeout(Duration::from_millis(200), sub.next_event()).await;
    match after {
        Ok(None) | Err(_) => {}
        Ok(Some(extra)) => panic!("received {:?} after the terminal event", extra),
    }
    events
}

/// Everything currently buffered in a subscription, without waiting.
pub fn drain<T, E>(sub: &mut Subscription<T, E>) -> Vec<StreamEvent<T, E>> {
    let mut events = Vec::new();
    while let Some(event) = sub.try_next_event() {
        events.push(event);
    }
    events
}

/// In-memory transport driven by the test. Nothing happens on `resume`
/// except bookkeeping; the test fires callbacks explicitly.
///
/// Callbacks can be delivered to a single operation's delegate or broadcast to
/// every registered delegate, the way a session-wide delegate would see them.
pub struct ScriptedTransport {
    id: SessionId,
    next_operation: AtomicU64,
    delegates: Mutex<HashMap<OperationId, Arc<dyn TransportDelegate>>>,
    resumed: Mutex<Vec<OperationId>>,
    created: Mutex<Vec<(OperationId, Url)>>,
    discarded: Mutex<Vec<OperationId>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: SessionId::new(),
            next_operation: AtomicU64::new(1),
            delegates: Mutex::new(HashMap::new()),
            resumed: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            discarded: Mutex::new(Vec::new()),
        })
    }

    pub fn resumed(&self) -> Vec<OperationId> {
        self.resumed.lock().unwrap().clone()
    }

    pub fn created(&self) -> Vec<(OperationId, Url)> {
        self.created.lock().unwrap().clone()
    }

    pub fn discarded(&self) -> Vec<OperationId> {
        self.discarded.lock().unwrap().clone()
    }

    fn all_delegates(&self) -> Vec<Arc<dyn TransportDelegate>> {
        self.delegates.lock().unwrap().values().cloned().collect()
    }

    pub fn broadcast_chunk(&self, operation: OperationId, chunk: &[u8]) {
        let chunk = Bytes::copy_from_slice(chunk);
        for delegate in self.all_delegates() {
            delegate.on_chunk_received(self.id, operation, &chunk);
        }
    }

    pub fn broadcast_progress(&self, operation: OperationId, written: i64, total_written: i64, expected: i64) {
        for delegate in self.all_delegates() {
            delegate.on_download_progress(self.id, operation, written, total_written, expected);
        }
    }

    pub fn broadcast_finished(&self, operation: OperationId, location: &Path) {
        for delegate in self.all_delegates() {
            delegate.on_download_finished(self.id, operation, location);
        }
    }

    pub fn broadcast_completed(&self, operation: OperationId, error: Option<CompletionError>) {
        for delegate in self.all_delegates() {
            delegate.on_completed(self.id, operation, error.as_ref());
        }
    }
}

impl Transport for ScriptedTransport {
    fn session_id(&self) -> SessionId {
        self.id
    }

    fn create_fetch_operation(&self, url: Url) -> OperationId {
        let operation = OperationId::new(self.next_operation.fetch_add(1, Ordering::Relaxed));
        self.created.lock().unwrap().push((operation, url));
        operation
    }

    fn create_download_operation(&self, url: Url) -> OperationId {
        self.create_fetch_operation(url)
    }

    fn set_delegate(&self, operation: OperationId, delegate: Arc<dyn TransportDelegate>) {
        self.delegates.lock().unwrap().insert(operation, delegate);
    }

    fn resume(&self, operation: OperationId) {
        self.resumed.lock().unwrap().push(operation);
    }

    fn discard(&self, operation: OperationId) {
        self.discarded.lock().unwrap().push(operation);
    }
}
