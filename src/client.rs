//! Client Handle
//!
//! Consumer-side proxy for one broker connection. Each request gets a fresh
//! id and a pending entry; a background reader matches `out`/`error`/cache
//! replies back to their entries by id and surfaces `ready` and broadcast
//! errors to subscribers. When the connection closes every pending request
//! rejects with [`ClientError::Disconnected`].

use crate::broker::Connection;
use crate::callback::ImportCallbackFragment;
use crate::error::{ClientError, ErrorKind};
use crate::input::CompilerInput;
use crate::protocol::{self, BrokerEvent, ClientMessage, RequestId, Version};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

const NOTIFICATION_CAPACITY: usize = 64;

/// Connection-level events delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Ready(Version),
    /// Broadcast failure, usually an engine that could not be loaded
    Failed {
        version: Option<Version>,
        kind: ErrorKind,
        detail: String,
    },
    Disconnected,
}

/// Release list served by the broker's manifest
#[derive(Debug, Clone, PartialEq)]
pub struct Releases {
    pub releases: BTreeMap<String, String>,
    pub latest_release: Option<String>,
}

#[derive(Debug)]
enum Reply {
    Out { version: Version, output: Value },
    Ack,
    Retrieved { content: Option<String> },
    Manifest(Releases),
}

type Responder = oneshot::Sender<Result<Reply, ClientError>>;

struct Pending {
    version: Option<Version>,
    responder: Responder,
}

#[derive(Default)]
struct PendingRequests {
    map: HashMap<RequestId, Pending>,
    closed: bool,
}

struct Shared {
    pending: Mutex<PendingRequests>,
    ready: Mutex<HashSet<Version>>,
    notifications: broadcast::Sender<Notification>,
}

impl Shared {
    fn route(&self, event: BrokerEvent) {
        match event {
            BrokerEvent::Ready { version } => {
                debug!(version = %version, "Engine ready");
                self.ready.lock().insert(version.clone());
                let _ = self.notifications.send(Notification::Ready(version));
            }
            BrokerEvent::Error {
                request_id: None,
                version,
                kind,
                detail,
            } => {
                let _ = self.notifications.send(Notification::Failed {
                    version,
                    kind,
                    detail,
                });
            }
            BrokerEvent::Error {
                request_id: Some(request_id),
                kind,
                detail,
                ..
            } => self.complete(request_id, Err(ClientError::Rejected { kind, detail })),
            BrokerEvent::Out {
                version,
                request_id,
                output,
            } => self.complete(request_id, Ok(Reply::Out { version, output })),
            BrokerEvent::Ack { request_id } => self.complete(request_id, Ok(Reply::Ack)),
            BrokerEvent::Retrieved {
                request_id,
                content,
                ..
            } => self.complete(request_id, Ok(Reply::Retrieved { content })),
            BrokerEvent::Manifest {
                request_id,
                releases,
                latest_release,
            } => self.complete(
                request_id,
                Ok(Reply::Manifest(Releases {
                    releases,
                    latest_release,
                })),
            ),
        }
    }

    fn complete(&self, request_id: RequestId, result: Result<Reply, ClientError>) {
        let entry = self.pending.lock().map.remove(&request_id);
        match entry {
            Some(pending) => {
                if let (Some(expected), Ok(Reply::Out { version, .. })) = (&pending.version, &result) {
                    if expected != version {
                        warn!(request_id = %request_id, expected = %expected, got = %version, "Reply carries a different version");
                    }
                }
                let _ = pending.responder.send(result);
            }
            None => debug!(request_id = %request_id, "Reply for unknown request"),
        }
    }

    fn teardown(&self) {
        let drained: Vec<Pending> = {
            let mut pending = self.pending.lock();
            pending.closed = true;
            pending.map.drain().map(|(_, p)| p).collect()
        };
        if !drained.is_empty() {
            debug!(count = drained.len(), "Rejecting pending requests on disconnect");
        }
        for pending in drained {
            let _ = pending.responder.send(Err(ClientError::Disconnected));
        }
        let _ = self.notifications.send(Notification::Disconnected);
    }
}

/// Future for one request's reply
pub struct ResponseFuture<T> {
    state: ResponseState,
    map: fn(Reply) -> Result<T, ClientError>,
}

enum ResponseState {
    Waiting(oneshot::Receiver<Result<Reply, ClientError>>),
    Failed(Option<ClientError>),
}

impl<T> ResponseFuture<T> {
    fn failed(err: ClientError, map: fn(Reply) -> Result<T, ClientError>) -> Self {
        Self {
            state: ResponseState::Failed(Some(err)),
            map,
        }
    }
}

impl<T> Future for ResponseFuture<T> {
    type Output = Result<T, ClientError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            ResponseState::Waiting(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(Ok(reply))) => Poll::Ready((this.map)(reply)),
                Poll::Ready(Ok(Err(err))) => Poll::Ready(Err(err)),
                Poll::Ready(Err(_)) => Poll::Ready(Err(ClientError::Disconnected)),
                Poll::Pending => Poll::Pending,
            },
            ResponseState::Failed(err) => {
                Poll::Ready(Err(err.take().unwrap_or(ClientError::Disconnected)))
            }
        }
    }
}

fn unexpected(reply: Reply) -> ClientError {
    ClientError::UnexpectedReply(format!("{:?}", reply))
}

fn expect_output(reply: Reply) -> Result<Value, ClientError> {
    match reply {
        Reply::Out { output, .. } => Ok(output),
        other => Err(unexpected(other)),
    }
}

fn expect_ack(reply: Reply) -> Result<(), ClientError> {
    match reply {
        Reply::Ack => Ok(()),
        other => Err(unexpected(other)),
    }
}

fn expect_content(reply: Reply) -> Result<Option<String>, ClientError> {
    match reply {
        Reply::Retrieved { content } => Ok(content),
        other => Err(unexpected(other)),
    }
}

fn expect_releases(reply: Reply) -> Result<Releases, ClientError> {
    match reply {
        Reply::Manifest(releases) => Ok(releases),
        other => Err(unexpected(other)),
    }
}

pub struct ClientHandle {
    outbound: mpsc::UnboundedSender<Value>,
    shared: Arc<Shared>,
    next_request: AtomicU64,
    default_version: Version,
}

impl ClientHandle {
    /// Wrap a connection and ask the broker to warm up `default_version`
    pub fn new(connection: Connection, default_version: impl Into<Version>) -> Self {
        let Connection { outbound, events } = connection;
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let shared = Arc::new(Shared {
            pending: Mutex::new(PendingRequests::default()),
            ready: Mutex::new(HashSet::new()),
            notifications,
        });
        tokio::spawn(read_events(events, shared.clone()));

        let handle = Self {
            outbound,
            shared,
            next_request: AtomicU64::new(1),
            default_version: default_version.into(),
        };
        handle.init(handle.default_version.clone());
        handle
    }

    pub fn default_version(&self) -> &Version {
        &self.default_version
    }

    /// Ask the broker to load `version`; completion is observed via `ready`
    pub fn init(&self, version: Version) {
        self.send(&ClientMessage::Init { version });
    }

    /// Compile against the default version
    pub fn compile(
        &self,
        input: Value,
        import_callback: Option<ImportCallbackFragment>,
    ) -> ResponseFuture<Value> {
        self.compile_with_version(self.default_version.clone(), input, import_callback)
    }

    /// Compile a single contract body with the default input settings
    pub fn compile_contract(&self, body: &str) -> ResponseFuture<Value> {
        self.compile(CompilerInput::from_contract(body).to_value(), None)
    }

    /// Compile a single contract body, resolving its imports through `callback_source`
    pub fn compile_contract_with_callback(
        &self,
        body: &str,
        callback_source: &str,
    ) -> ResponseFuture<Value> {
        self.compile_with_callback_source(
            self.default_version.clone(),
            CompilerInput::from_contract(body).to_value(),
            callback_source,
        )
    }

    pub fn compile_with_version(
        &self,
        version: Version,
        input: Value,
        import_callback: Option<ImportCallbackFragment>,
    ) -> ResponseFuture<Value> {
        self.request(Some(version.clone()), expect_output, move |request_id| {
            ClientMessage::Compile {
                version,
                request_id,
                input,
                import_callback,
            }
        })
    }

    /// Compile with an import callback given as function source text
    pub fn compile_with_callback_source(
        &self,
        version: Version,
        input: Value,
        callback_source: &str,
    ) -> ResponseFuture<Value> {
        match ImportCallbackFragment::from_source(callback_source) {
            Ok(fragment) => self.compile_with_version(version, input, Some(fragment)),
            Err(err) => ResponseFuture::failed(
                ClientError::InvalidCallback(err.detail().to_string()),
                expect_output,
            ),
        }
    }

    pub fn store(&self, path: &str, content: &str) -> ResponseFuture<()> {
        let (path, content) = (path.to_string(), content.to_string());
        self.request(None, expect_ack, move |request_id| ClientMessage::Store {
            request_id,
            path,
            content,
        })
    }

    pub fn retrieve(&self, path: &str) -> ResponseFuture<Option<String>> {
        let path = path.to_string();
        self.request(None, expect_content, move |request_id| {
            ClientMessage::Retrieve { request_id, path }
        })
    }

    pub fn delete(&self, path: &str) -> ResponseFuture<()> {
        let path = path.to_string();
        self.request(None, expect_ack, move |request_id| ClientMessage::Delete {
            request_id,
            path,
        })
    }

    /// Releases listed in the broker's version manifest
    pub fn versions(&self) -> ResponseFuture<Releases> {
        self.request(None, expect_releases, |request_id| ClientMessage::Versions {
            request_id,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.shared.notifications.subscribe()
    }

    pub fn is_ready(&self, version: &Version) -> bool {
        self.shared.ready.lock().contains(version)
    }

    /// Wait for `version` to be reported ready on this connection
    pub async fn wait_ready(&self, version: &Version) -> Result<(), ClientError> {
        let mut notifications = self.subscribe();
        if self.is_ready(version) {
            return Ok(());
        }
        if !self.is_connected() {
            return Err(ClientError::Disconnected);
        }
        loop {
            match notifications.recv().await {
                Ok(Notification::Ready(ready)) if &ready == version => return Ok(()),
                Ok(Notification::Failed {
                    version: Some(failed),
                    kind,
                    detail,
                }) if &failed == version => return Err(ClientError::Rejected { kind, detail }),
                Ok(Notification::Disconnected) => return Err(ClientError::Disconnected),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    if self.is_ready(version) {
                        return Ok(());
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return Err(ClientError::Disconnected),
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().map.len()
    }

    pub fn is_connected(&self) -> bool {
        !self.shared.pending.lock().closed
    }

    fn send(&self, message: &ClientMessage) -> bool {
        match protocol::encode(message) {
            Ok(value) => self.outbound.send(value).is_ok(),
            Err(err) => {
                warn!(error = %err, "Failed to encode client message");
                false
            }
        }
    }

    fn request<T>(
        &self,
        version: Option<Version>,
        map: fn(Reply) -> Result<T, ClientError>,
        build: impl FnOnce(RequestId) -> ClientMessage,
    ) -> ResponseFuture<T> {
        let request_id = RequestId::new(self.next_request.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending.lock();
            if pending.closed {
                return ResponseFuture::failed(ClientError::Disconnected, map);
            }
            pending.map.insert(
                request_id,
                Pending {
                    version,
                    responder: tx,
                },
            );
        }

        if !self.send(&build(request_id)) {
            self.shared.pending.lock().map.remove(&request_id);
            return ResponseFuture::failed(ClientError::Disconnected, map);
        }
        ResponseFuture {
            state: ResponseState::Waiting(rx),
            map,
        }
    }
}

async fn read_events(mut events: mpsc::UnboundedReceiver<Value>, shared: Arc<Shared>) {
    while let Some(value) = events.recv().await {
        match protocol::decode_event(value) {
            Ok(event) => shared.route(event),
            Err(err) => warn!(error = %err, "Dropping malformed broker event"),
        }
    }
    shared.teardown();
}
