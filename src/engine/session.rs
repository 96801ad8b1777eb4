//! Engine session lifecycle
//!
//! One session per version. State moves `Unrequested -> Initializing ->
//! Ready | Failed`, and `Failed -> Initializing` when a later request retries.
//! Sessions are owned by the [`VersionRegistry`](super::VersionRegistry) and
//! only ever touched from the broker task.

use super::registry::InitFuture;
use super::{CompileCapability, EngineLoader, EngineScope};
use crate::callback::{ImportCallbackFragment, ImportResolver};
use crate::error::BrokerError;
use crate::protocol::Version;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    Unrequested,
    Initializing,
    Ready,
    Failed(String),
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Unrequested => f.write_str("unrequested"),
            EngineState::Initializing => f.write_str("initializing"),
            EngineState::Ready => f.write_str("ready"),
            EngineState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

pub struct EngineSession {
    version: Version,
    state: EngineState,
    attempt: u64,
    init: Option<InitFuture>,
    engine: Option<Arc<dyn CompileCapability>>,
}

impl EngineSession {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            state: EngineState::Unrequested,
            attempt: 0,
            init: None,
            engine: None,
        }
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    /// Number of init attempts started so far
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn engine(&self) -> Option<Arc<dyn CompileCapability>> {
        self.engine.clone()
    }

    /// The outstanding init future while Initializing or Ready
    pub fn in_flight(&self) -> Option<InitFuture> {
        match self.state {
            EngineState::Initializing | EngineState::Ready => self.init.clone(),
            EngineState::Unrequested | EngineState::Failed(_) => None,
        }
    }

    /// Start a fresh attempt. Never called on a Ready session.
    pub fn begin_init(&mut self, init: InitFuture) -> u64 {
        debug_assert!(self.state != EngineState::Ready);
        self.attempt += 1;
        self.state = EngineState::Initializing;
        self.init = Some(init);
        self.engine = None;
        self.attempt
    }

    pub fn mark_ready(&mut self, engine: Arc<dyn CompileCapability>) {
        self.state = EngineState::Ready;
        self.engine = Some(engine);
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.state = EngineState::Failed(reason.into());
        self.init = None;
        self.engine = None;
    }
}

impl fmt::Debug for EngineSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineSession")
            .field("version", &self.version)
            .field("state", &self.state)
            .field("attempt", &self.attempt)
            .finish()
    }
}

/// Run one initialization attempt: manifest, binary, wrapper, bind.
///
/// All-or-nothing: nothing is handed out unless every step succeeded.
pub async fn init(
    version: Version,
    loader: Arc<dyn EngineLoader>,
    scope: Arc<EngineScope>,
) -> Result<Arc<dyn CompileCapability>, BrokerError> {
    let manifest = loader.fetch_manifest().await?;
    let artifact = manifest.artifact_for(&version)?.to_string();
    debug!(version = %version, artifact = %artifact, "Resolved compiler artifact");

    loader.load_binary(&version, &artifact, &scope).await?;
    let wrapper = loader.load_wrapper(&version, &scope).await?;
    let binary = scope.require(&version)?;

    info!(version = %version, artifact = %binary.artifact, "Compiler engine loaded");
    Ok(wrapper.bind(binary))
}

/// Compile against a loaded engine, reconstructing the import callback first
pub async fn compile(
    engine: Arc<dyn CompileCapability>,
    input: Value,
    fragment: Option<ImportCallbackFragment>,
) -> Result<Value, BrokerError> {
    match fragment {
        None => engine.compile(input, None).await,
        Some(fragment) => {
            let callback = fragment.reconstruct()?;
            debug!(callback = %callback.name(), "Compiling with import callback");
            engine
                .compile(input, Some(&callback as &dyn ImportResolver))
                .await
        }
    }
}
