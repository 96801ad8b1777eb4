//! Session Broker
//!
//! One task owns the [`VersionRegistry`] and every client's outbound channel.
//! Inbound messages are handled to completion one at a time; the only
//! suspension points are the jobs it schedules (engine init, compiles,
//! manifest fetches), whose results re-enter the loop as [`JobOutcome`]s.
//! Ready and version-level errors go to every connected client; everything
//! else goes back to the client that asked, tagged with its request id.

use crate::cache::ContractCache;
use crate::engine::{
    session, EngineLoader, EngineState, InitFuture, InitResult, Settled, VersionManifest,
    VersionRegistry,
};
use crate::error::BrokerError;
use crate::protocol::{self, BrokerEvent, ClientMessage, RequestId, Version};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub type ClientId = u64;

/// Everything the broker loop receives from connections
#[derive(Debug)]
pub enum Inbound {
    Connect {
        client_id: ClientId,
        events: mpsc::UnboundedSender<Value>,
    },
    Message {
        client_id: ClientId,
        payload: Value,
    },
    Disconnect {
        client_id: ClientId,
    },
}

/// Completion of a job scheduled by the broker
enum JobOutcome {
    InitSettled {
        version: Version,
        attempt: u64,
        result: InitResult,
    },
    Compiled {
        client_id: ClientId,
        request_id: RequestId,
        version: Version,
        result: Result<Value, BrokerError>,
    },
    Manifest {
        client_id: ClientId,
        request_id: RequestId,
        result: Result<VersionManifest, BrokerError>,
    },
}

/// One side of a client/broker channel carrying untyped JSON messages
#[derive(Debug)]
pub struct Connection {
    pub outbound: mpsc::UnboundedSender<Value>,
    pub events: mpsc::UnboundedReceiver<Value>,
}

impl Connection {
    /// Two connected ends, for transports that bridge an external stream
    pub fn pair() -> (Connection, Connection) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Connection {
                outbound: a_tx,
                events: b_rx,
            },
            Connection {
                outbound: b_tx,
                events: a_rx,
            },
        )
    }
}

/// Cloneable entry point for opening connections to a running broker
#[derive(Clone)]
pub struct BrokerHandle {
    inbound: mpsc::UnboundedSender<Inbound>,
    next_client: Arc<AtomicU64>,
}

impl BrokerHandle {
    /// Open a new client connection
    ///
    /// Dropping the returned `outbound` sender disconnects the client.
    pub fn connect(&self) -> Connection {
        let client_id = self.next_client.fetch_add(1, Ordering::SeqCst);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Value>();

        if self
            .inbound
            .send(Inbound::Connect {
                client_id,
                events: events_tx,
            })
            .is_err()
        {
            warn!(client_id, "Broker is not running; connection closed immediately");
        }

        let inbound = self.inbound.clone();
        tokio::spawn(async move {
            while let Some(payload) = outbound_rx.recv().await {
                if inbound.send(Inbound::Message { client_id, payload }).is_err() {
                    return;
                }
            }
            let _ = inbound.send(Inbound::Disconnect { client_id });
        });

        Connection {
            outbound: outbound_tx,
            events: events_rx,
        }
    }

    pub fn is_running(&self) -> bool {
        !self.inbound.is_closed()
    }
}

pub struct Broker {
    registry: VersionRegistry,
    cache: Option<Arc<dyn ContractCache>>,
    clients: HashMap<ClientId, mpsc::UnboundedSender<Value>>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    jobs: FuturesUnordered<BoxFuture<'static, JobOutcome>>,
}

impl Broker {
    pub fn new(loader: Arc<dyn EngineLoader>) -> (Self, BrokerHandle) {
        Self::with_registry(VersionRegistry::new(loader))
    }

    pub fn with_registry(registry: VersionRegistry) -> (Self, BrokerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let broker = Self {
            registry,
            cache: None,
            clients: HashMap::new(),
            inbound: rx,
            jobs: FuturesUnordered::new(),
        };
        let handle = BrokerHandle {
            inbound: tx,
            next_client: Arc::new(AtomicU64::new(1)),
        };
        (broker, handle)
    }

    /// Attach a contract cache for the store/retrieve/delete actions
    pub fn with_cache(mut self, cache: Arc<dyn ContractCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Run the broker on its own task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process messages until every handle and connection is gone and all
    /// scheduled jobs have finished
    pub async fn run(mut self) {
        info!("Broker started");
        let mut inbound_open = true;
        loop {
            tokio::select! {
                message = self.inbound.recv(), if inbound_open => match message {
                    Some(message) => self.handle_inbound(message),
                    None => inbound_open = false,
                },
                Some(outcome) = self.jobs.next(), if !self.jobs.is_empty() => {
                    self.handle_outcome(outcome);
                }
                else => break,
            }
        }
        info!("Broker stopped");
    }

    fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Connect { client_id, events } => {
                debug!(client_id, "Client connected");
                self.clients.insert(client_id, events);
            }
            Inbound::Disconnect { client_id } => {
                debug!(client_id, "Client disconnected");
                self.clients.remove(&client_id);
            }
            Inbound::Message { client_id, payload } => match protocol::decode_message(payload) {
                Ok(message) => self.dispatch(client_id, message),
                Err(err) => {
                    warn!(client_id, error = %err, "Dropping malformed message");
                }
            },
        }
    }

    fn dispatch(&mut self, client_id: ClientId, message: ClientMessage) {
        debug!(client_id, action = message.action(), "Dispatching message");
        match message {
            ClientMessage::Init { version } => {
                let _ = self.acquire(&version);
                if self.registry.state(&version) == Some(&EngineState::Ready) {
                    // already loaded, so no broadcast is coming for this client
                    self.send_to(client_id, &BrokerEvent::Ready { version });
                }
            }
            ClientMessage::Compile {
                version,
                request_id,
                input,
                import_callback,
            } => {
                let init = self.acquire(&version);
                self.jobs.push(
                    async move {
                        let result = match init.await {
                            Ok(engine) => session::compile(engine, input, import_callback).await,
                            Err(err) => Err(err),
                        };
                        JobOutcome::Compiled {
                            client_id,
                            request_id,
                            version,
                            result,
                        }
                    }
                    .boxed(),
                );
            }
            ClientMessage::Store {
                request_id,
                path,
                content,
            } => {
                let stored = self
                    .cache()
                    .and_then(|c| c.store(&path, &content).map_err(BrokerError::from));
                let event = match stored {
                    Ok(()) => BrokerEvent::Ack { request_id },
                    Err(err) => BrokerEvent::request_error(request_id, &err),
                };
                self.send_to(client_id, &event);
            }
            ClientMessage::Retrieve { request_id, path } => {
                let retrieved = self
                    .cache()
                    .and_then(|c| c.retrieve(&path).map_err(BrokerError::from));
                let event = match retrieved {
                    Ok(content) => BrokerEvent::Retrieved {
                        request_id,
                        path,
                        content,
                    },
                    Err(err) => BrokerEvent::request_error(request_id, &err),
                };
                self.send_to(client_id, &event);
            }
            ClientMessage::Delete { request_id, path } => {
                let deleted = self
                    .cache()
                    .and_then(|c| c.delete(&path).map_err(BrokerError::from));
                let event = match deleted {
                    Ok(()) => BrokerEvent::Ack { request_id },
                    Err(err) => BrokerEvent::request_error(request_id, &err),
                };
                self.send_to(client_id, &event);
            }
            ClientMessage::Versions { request_id } => {
                let loader = self.registry.loader();
                self.jobs.push(
                    async move {
                        let result = loader.fetch_manifest().await;
                        JobOutcome::Manifest {
                            client_id,
                            request_id,
                            result,
                        }
                    }
                    .boxed(),
                );
            }
        }
    }

    /// Get the init future for `version`, watching it if a new attempt began
    fn acquire(&mut self, version: &Version) -> InitFuture {
        let acquired = self.registry.get_or_create(version);
        if let Some(err) = &acquired.superseded {
            // the earlier attempt's own settle will be stale, so report it here
            error!(
                version = %version,
                kind = %err.kind(),
                detail = %err.detail(),
                "Engine initialization failed"
            );
            self.broadcast(&BrokerEvent::version_error(version, err));
        }
        if let Some(attempt) = acquired.started {
            let init = acquired.init.clone();
            let version = version.clone();
            self.jobs.push(
                async move {
                    let result = init.await;
                    JobOutcome::InitSettled {
                        version,
                        attempt,
                        result,
                    }
                }
                .boxed(),
            );
        }
        acquired.init
    }

    fn cache(&self) -> Result<&Arc<dyn ContractCache>, BrokerError> {
        self.cache
            .as_ref()
            .ok_or_else(|| BrokerError::CacheError("no contract cache attached".to_string()))
    }

    fn handle_outcome(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::InitSettled {
                version,
                attempt,
                result,
            } => match (self.registry.settle(&version, attempt, &result), result) {
                (Settled::Ready, _) => {
                    info!(version = %version, "Engine ready");
                    self.broadcast(&BrokerEvent::Ready { version });
                }
                (Settled::Failed | Settled::Unknown, Err(err)) => {
                    error!(
                version = %version,
                kind = %err.kind(),
                detail = %err.detail(),
                "Engine initialization failed"
            );
                    self.broadcast(&BrokerEvent::version_error(&version, &err));
                }
                (settled, _) => {
                    debug!(version = %version, attempt, ?settled, "Ignoring init result");
                }
            },
            JobOutcome::Compiled {
                client_id,
                request_id,
                version,
                result,
            } => {
                let event = match result {
                    Ok(output) => BrokerEvent::Out {
                        version,
                        request_id,
                        output,
                    },
                    Err(err) => {
                        debug!(client_id, request_id = %request_id, error = %err, "Compile failed");
                        BrokerEvent::request_error(request_id, &err)
                    }
                };
                self.send_to(client_id, &event);
            }
            JobOutcome::Manifest {
                client_id,
                request_id,
                result,
            } => {
                let event = match result {
                    Ok(manifest) => BrokerEvent::Manifest {
                        request_id,
                        releases: manifest.releases,
                        latest_release: manifest.latest_release,
                    },
                    Err(err) => BrokerEvent::request_error(request_id, &err),
                };
                self.send_to(client_id, &event);
            }
        }
    }

    fn send_to(&mut self, client_id: ClientId, event: &BrokerEvent) {
        let Some(value) = encode(event) else { return };
        match self.clients.get(&client_id) {
            Some(events) => {
                if events.send(value).is_err() {
                    debug!(client_id, "Client channel closed; forgetting client");
                    self.clients.remove(&client_id);
                }
            }
            None => {
                debug!(client_id, request_id = ?event.request_id(), "Dropping event for disconnected client");
            }
        }
    }

    fn broadcast(&mut self, event: &BrokerEvent) {
        let Some(value) = encode(event) else { return };
        self.clients
            .retain(|_, events| events.send(value.clone()).is_ok());
    }
}

fn encode(event: &BrokerEvent) -> Option<Value> {
    match protocol::encode(event) {
        Ok(value) => Some(value),
        Err(err) => {
            error!(error = %err, "Failed to encode broker event");
            None
        }
    }
}
