//! Engine Abstraction
//!
//! An engine is reached only through a [`CompileCapability`]. Obtaining one
//! takes two ordered loads against a shared [`EngineScope`]: the compiler
//! binary is made resident first, then the standard-JSON wrapper resolves it
//! from the scope and binds to it.

use crate::callback::ImportResolver;
use crate::error::BrokerError;
use crate::protocol::Version;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

pub mod imports;
pub mod loader;
pub mod registry;
pub mod session;
pub mod solc;

pub use loader::HttpArtifactLoader;
pub use registry::{Acquired, InitFuture, InitResult, Settled, VersionRegistry};
pub use session::{EngineSession, EngineState};
pub use solc::{SolcEngine, SolcWrapper};

/// The compile entry point of a loaded engine
#[async_trait]
pub trait CompileCapability: Send + Sync {
    /// Compile a standard-JSON input. The resolver, when given, is asked for
    /// every import the input does not already carry.
    async fn compile(
        &self,
        input: Value,
        resolver: Option<&dyn ImportResolver>,
    ) -> Result<Value, BrokerError>;
}

/// Fetches manifests and loads the two engine artifacts
#[async_trait]
pub trait EngineLoader: Send + Sync {
    async fn fetch_manifest(&self) -> Result<VersionManifest, BrokerError>;

    /// Make the compiler binary for `version` resident in `scope`
    async fn load_binary(
        &self,
        version: &Version,
        artifact: &str,
        scope: &EngineScope,
    ) -> Result<(), BrokerError>;

    /// Load the wrapper; fails if the binary is not resident in `scope`
    async fn load_wrapper(
        &self,
        version: &Version,
        scope: &EngineScope,
    ) -> Result<Box<dyn EngineWrapper>, BrokerError>;
}

/// Standard-JSON adapter awaiting its binary
pub trait EngineWrapper: Send {
    fn bind(self: Box<Self>, binary: ResidentBinary) -> Arc<dyn CompileCapability>;
}

/// A compiler binary loaded into the scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResidentBinary {
    pub artifact: String,
    pub location: PathBuf,
}

/// Process-wide table of resident compiler binaries
#[derive(Debug, Default)]
pub struct EngineScope {
    resident: RwLock<HashMap<Version, ResidentBinary>>,
}

impl EngineScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, version: Version, binary: ResidentBinary) {
        self.resident.write().insert(version, binary);
    }

    pub fn resolve(&self, version: &Version) -> Option<ResidentBinary> {
        self.resident.read().get(version).cloned()
    }

    pub fn is_resident(&self, version: &Version) -> bool {
        self.resident.read().contains_key(version)
    }

    /// Resolve or fail with the error a wrapper reports
    pub fn require(&self, version: &Version) -> Result<ResidentBinary, BrokerError> {
        self.resolve(version).ok_or_else(|| {
            BrokerError::LoadError(format!(
                "compiler binary for {} is not resident; load it before the wrapper",
                version
            ))
        })
    }
}

/// One entry of the manifest `builds` list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    pub path: String,
    pub version: String,
    #[serde(default)]
    pub long_version: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
}

/// Version manifest, `list.json` on the binaries mirror
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionManifest {
    #[serde(default)]
    pub builds: Vec<BuildInfo>,
    pub releases: BTreeMap<String, String>,
    #[serde(default)]
    pub latest_release: Option<String>,
}

impl VersionManifest {
    /// Artifact name for a version, `VersionNotFound` if the manifest lacks it
    pub fn artifact_for(&self, version: &Version) -> Result<&str, BrokerError> {
        self.releases
            .get(version.as_str())
            .map(String::as_str)
            .ok_or_else(|| BrokerError::VersionNotFound(version.to_string()))
    }

    pub fn build_for(&self, artifact: &str) -> Option<&BuildInfo> {
        self.builds.iter().find(|b| b.path == artifact)
    }
}
