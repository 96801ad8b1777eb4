//! Artifact loader backed by the soliditylang binaries mirror
//!
//! The manifest is `{binaries_url}/{platform}/list.json`; builds live next to
//! it. Downloaded builds are kept under `{dir}/{platform}/` and reused on the
//! next start.

use super::solc::SolcWrapper;
use super::{EngineLoader, EngineScope, EngineWrapper, ResidentBinary, VersionManifest};
use crate::config::ArtifactsConfig;
use crate::error::BrokerError;
use crate::protocol::Version;
use async_trait::async_trait;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

fn map_http_error(error: reqwest::Error) -> BrokerError {
    if let Some(status) = error.status() {
        BrokerError::LoadError(format!("Request failed with status {}: {}", status, error))
    } else if error.is_timeout() {
        BrokerError::LoadError(format!("Request timeout: {}", error))
    } else if error.is_connect() {
        BrokerError::LoadError(format!("Connection error: {}", error))
    } else {
        BrokerError::LoadError(format!("HTTP error: {}", error))
    }
}

fn build_http_client() -> Result<Client, BrokerError> {
    Client::builder()
        .connect_timeout(HTTP_CONNECT_TIMEOUT)
        .timeout(HTTP_REQUEST_TIMEOUT)
        .build()
        .map_err(|e| BrokerError::LoadError(format!("Failed to create HTTP client: {}", e)))
}

pub struct HttpArtifactLoader {
    client: Client,
    config: ArtifactsConfig,
    manifest: OnceCell<VersionManifest>,
}

impl HttpArtifactLoader {
    pub fn new(config: ArtifactsConfig) -> Result<Self, BrokerError> {
        Ok(Self {
            client: build_http_client()?,
            config,
            manifest: OnceCell::new(),
        })
    }

    fn base_url(&self) -> String {
        format!(
            "{}/{}",
            self.config.binaries_url.trim_end_matches('/'),
            self.config.platform
        )
    }

    pub fn manifest_url(&self) -> String {
        format!("{}/list.json", self.base_url())
    }

    fn artifact_path(&self, artifact: &str) -> PathBuf {
        self.config.dir.join(&self.config.platform).join(artifact)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, BrokerError> {
        let response = self.client.get(url).send().await.map_err(map_http_error)?;
        if !response.status().is_success() {
            return Err(BrokerError::LoadError(format!(
                "GET {} returned {}",
                url,
                response.status()
            )));
        }
        let bytes = response.bytes().await.map_err(map_http_error)?;
        Ok(bytes.to_vec())
    }

    async fn fetch_manifest_uncached(&self) -> Result<VersionManifest, BrokerError> {
        let url = self.manifest_url();
        debug!(url = %url, "Fetching compiler manifest");
        let response = self.client.get(&url).send().await.map_err(map_http_error)?;
        if !response.status().is_success() {
            return Err(BrokerError::LoadError(format!(
                "GET {} returned {}",
                url,
                response.status()
            )));
        }
        response
            .json::<VersionManifest>()
            .await
            .map_err(|e| BrokerError::LoadError(format!("Failed to parse manifest: {}", e)))
    }
}

#[async_trait]
impl EngineLoader for HttpArtifactLoader {
    async fn fetch_manifest(&self) -> Result<VersionManifest, BrokerError> {
        self.manifest
            .get_or_try_init(|| self.fetch_manifest_uncached())
            .await
            .cloned()
    }

    async fn load_binary(
        &self,
        version: &Version,
        artifact: &str,
        scope: &EngineScope,
    ) -> Result<(), BrokerError> {
        if scope.is_resident(version) {
            return Ok(());
        }

        let path = self.artifact_path(artifact);
        if tokio::fs::metadata(&path).await.is_ok() {
            debug!(path = %path.display(), "Reusing downloaded compiler");
        } else {
            let url = format!("{}/{}", self.base_url(), artifact);
            info!(version = %version, url = %url, "Downloading compiler");
            let bytes = self.download(&url).await?;

            if self.config.verify_checksums {
                let manifest = self.fetch_manifest().await?;
                if let Some(expected) = manifest.build_for(artifact).and_then(|b| b.sha256.clone()) {
                    verify_checksum(artifact, &bytes, &expected)?;
                }
            }
            write_executable(&path, &bytes).await?;
        }

        scope.install(
            version.clone(),
            ResidentBinary {
                artifact: artifact.to_string(),
                location: path,
            },
        );
        Ok(())
    }

    async fn load_wrapper(
        &self,
        version: &Version,
        scope: &EngineScope,
    ) -> Result<Box<dyn EngineWrapper>, BrokerError> {
        let binary = scope.require(version)?;
        let reported = SolcWrapper::probe(&binary.location).await?;
        debug!(version = %version, reported = %reported, "Compiler wrapper ready");
        Ok(Box::new(SolcWrapper::new(version.clone(), reported)))
    }
}

fn verify_checksum(artifact: &str, bytes: &[u8], expected: &str) -> Result<(), BrokerError> {
    let actual = hex::encode(Sha256::digest(bytes));
    let expected = expected.trim_start_matches("0x").to_ascii_lowercase();
    if actual != expected {
        return Err(BrokerError::LoadError(format!(
            "checksum mismatch for {}: expected {}, got {}",
            artifact, expected, actual
        )));
    }
    Ok(())
}

async fn write_executable(path: &Path, bytes: &[u8]) -> Result<(), BrokerError> {
    let io_err = |e: std::io::Error| {
        BrokerError::LoadError(format!("Failed to store {}: {}", path.display(), e))
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    // write under a temporary name so a crash never leaves a partial binary
    let partial = path.with_extension("partial");
    tokio::fs::write(&partial, bytes).await.map_err(io_err)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&partial, std::fs::Permissions::from_mode(0o755))
            .await
            .map_err(io_err)?;
    }
    tokio::fs::rename(&partial, path).await.map_err(io_err)?;
    Ok(())
}
