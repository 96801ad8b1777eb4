//! Version registry
//!
//! Maps each version to its one session and hands every requester the same
//! in-flight initialization. The registry has a single owner, the broker
//! task, so it takes `&mut self` and no lock.

use super::session::{self, EngineSession, EngineState};
use super::{CompileCapability, EngineLoader, EngineScope};
use crate::error::BrokerError;
use crate::protocol::Version;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub type InitResult = Result<Arc<dyn CompileCapability>, BrokerError>;

/// Cloneable handle on one initialization attempt
pub type InitFuture = Shared<BoxFuture<'static, InitResult>>;

/// What `get_or_create` hands back
pub struct Acquired {
    pub init: InitFuture,
    /// Set when this call started a new attempt; the caller must drive it to
    /// completion and report back through [`VersionRegistry::settle`].
    pub started: Option<u64>,
    /// Failure of an earlier attempt that had finished but was not settled
    /// yet; it was recorded here so this call could start the retry.
    pub superseded: Option<BrokerError>,
}

/// Outcome of settling an attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Settled {
    Ready,
    /// Load failed; the session stays Failed and the next request retries
    Failed,
    /// Version absent from the manifest; the session was discarded
    Unknown,
    /// The attempt was superseded or its session is gone
    Stale,
}

pub struct VersionRegistry {
    sessions: HashMap<Version, EngineSession>,
    loader: Arc<dyn EngineLoader>,
    scope: Arc<EngineScope>,
}

impl VersionRegistry {
    pub fn new(loader: Arc<dyn EngineLoader>) -> Self {
        Self::with_scope(loader, Arc::new(EngineScope::new()))
    }

    pub fn with_scope(loader: Arc<dyn EngineLoader>, scope: Arc<EngineScope>) -> Self {
        Self {
            sessions: HashMap::new(),
            loader,
            scope,
        }
    }

    pub fn loader(&self) -> Arc<dyn EngineLoader> {
        self.loader.clone()
    }

    pub fn scope(&self) -> &Arc<EngineScope> {
        &self.scope
    }

    /// Return the outstanding init for `version`, starting one if needed
    pub fn get_or_create(&mut self, version: &Version) -> Acquired {
        let session = self
            .sessions
            .entry(version.clone())
            .or_insert_with(|| EngineSession::new(version.clone()));

        let mut superseded = None;
        if let Some(init) = session.in_flight() {
            let failed = init.peek().and_then(|r| r.as_ref().err()).cloned();
            let Some(err) = failed else {
                return Acquired {
                    init,
                    started: None,
                    superseded: None,
                };
            };
            debug!(
                version = %version,
                attempt = session.attempt(),
                "Previous attempt already failed"
            );
            session.mark_failed(err.detail());
            superseded = Some(err);
        }

        if let EngineState::Failed(reason) = session.state() {
            debug!(version = %version, reason = %reason, "Retrying failed engine session");
        }

        let init = session::init(version.clone(), self.loader.clone(), self.scope.clone())
            .boxed()
            .shared();
        let attempt = session.begin_init(init.clone());
        debug!(version = %version, attempt, "Engine initialization started");

        Acquired {
            init,
            started: Some(attempt),
            superseded,
        }
    }

    /// Record the result of attempt `attempt` for `version`
    pub fn settle(&mut self, version: &Version, attempt: u64, result: &InitResult) -> Settled {
        let Some(session) = self.sessions.get_mut(version) else {
            return Settled::Stale;
        };
        if session.attempt() != attempt || session.state() != &EngineState::Initializing {
            return Settled::Stale;
        }

        match result {
            Ok(engine) => {
                session.mark_ready(engine.clone());
                Settled::Ready
            }
            Err(BrokerError::VersionNotFound(_)) => {
                self.sessions.remove(version);
                Settled::Unknown
            }
            Err(err) => {
                warn!(version = %version, attempt, error = %err, "Engine initialization failed");
                session.mark_failed(err.detail());
                Settled::Failed
            }
        }
    }

    pub fn state(&self, version: &Version) -> Option<&EngineState> {
        self.sessions.get(version).map(EngineSession::state)
    }

    pub fn session(&self, version: &Version) -> Option<&EngineSession> {
        self.sessions.get(version)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Versions whose engine is loaded
    pub fn ready_versions(&self) -> Vec<Version> {
        let mut versions: Vec<Version> = self
            .sessions
            .values()
            .filter(|s| s.state() == &EngineState::Ready)
            .map(|s| s.version().clone())
            .collect();
        versions.sort();
        versions
    }
}
