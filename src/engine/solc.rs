//! Standard-JSON adapter over a native `solc` build

use super::imports;
use super::{CompileCapability, EngineWrapper, ResidentBinary};
use crate::callback::ImportResolver;
use crate::error::BrokerError;
use crate::protocol::Version;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Wrapper loaded for one version, waiting to be bound to its binary
pub struct SolcWrapper {
    version: Version,
    reported: String,
}

impl SolcWrapper {
    pub fn new(version: Version, reported: String) -> Self {
        Self { version, reported }
    }

    /// Run `solc --version` and return its version line
    pub async fn probe(binary: &Path) -> Result<String, BrokerError> {
        let output = Command::new(binary)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                BrokerError::LoadError(format!("Failed to run {}: {}", binary.display(), e))
            })?;
        if !output.status.success() {
            return Err(BrokerError::LoadError(format!(
                "{} --version exited with {}",
                binary.display(),
                output.status
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .find(|line| line.starts_with("Version:"))
            .map(|line| line.trim_start_matches("Version:").trim().to_string())
            .unwrap_or_else(|| stdout.trim().to_string()))
    }
}

impl EngineWrapper for SolcWrapper {
    fn bind(self: Box<Self>, binary: ResidentBinary) -> Arc<dyn CompileCapability> {
        Arc::new(SolcEngine {
            version: self.version,
            reported: self.reported,
            binary,
        })
    }
}

/// Compile capability running `solc --standard-json`
pub struct SolcEngine {
    version: Version,
    reported: String,
    binary: ResidentBinary,
}

impl SolcEngine {
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Version string the binary reported when probed
    pub fn reported_version(&self) -> &str {
        &self.reported
    }

    async fn run(&self, input: &Value) -> Result<Value, BrokerError> {
        let payload = serde_json::to_vec(input)
            .map_err(|e| BrokerError::CompileError(format!("Failed to encode input: {}", e)))?;

        let mut child = Command::new(&self.binary.location)
            .arg("--standard-json")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BrokerError::CompileError(format!("Failed to start compiler: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| BrokerError::CompileError("Compiler stdin unavailable".to_string()))?;
        // feed stdin concurrently so a large output cannot deadlock the pipe
        let writer = tokio::spawn(async move {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| BrokerError::CompileError(format!("Compiler did not finish: {}", e)))?;
        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(BrokerError::CompileError(format!(
                    "Failed to write compiler input: {}",
                    e
                )))
            }
            Err(e) => return Err(BrokerError::CompileError(format!("Input writer failed: {}", e))),
        }

        if !output.status.success() {
            return Err(BrokerError::CompileError(format!(
                "Compiler exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        serde_json::from_slice(&output.stdout)
            .map_err(|e| BrokerError::CompileError(format!("Unparsable compiler output: {}", e)))
    }
}

#[async_trait]
impl CompileCapability for SolcEngine {
    async fn compile(
        &self,
        input: Value,
        resolver: Option<&dyn ImportResolver>,
    ) -> Result<Value, BrokerError> {
        let Some(resolver) = resolver else {
            return self.run(&input).await;
        };

        let (input, diagnostics) = imports::resolve_imports(input, resolver);
        debug!(
            version = %self.version,
            unresolved = diagnostics.len(),
            "Imports pre-resolved"
        );
        let output = self.run(&input).await?;
        Ok(imports::append_diagnostics(output, diagnostics))
    }
}
