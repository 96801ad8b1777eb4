//! Compiler input and output helpers
//!
//! The broker itself forwards inputs and outputs as opaque JSON. These types
//! are conveniences for callers that build inputs from a single contract body
//! or want to inspect diagnostics without walking raw JSON.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Version used when none is named
pub const DEFAULT_VERSION: &str = "0.8.20";

/// Source unit name used by [`CompilerInput::from_contract`]
pub const DEFAULT_SOURCE_NAME: &str = "contract";

pub const DEFAULT_OPTIMIZER_RUNS: u32 = 200;

/// Standard-JSON compiler input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilerInput {
    pub language: String,
    pub sources: BTreeMap<String, SourceUnit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceUnit {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keccak256: Option<String>,
}

impl CompilerInput {
    /// Single-source input with the default settings
    ///
    /// The output selection lives under `settings`, the only place the
    /// standard-JSON interface reads it from.
    pub fn from_contract(body: impl Into<String>) -> Self {
        let mut sources = BTreeMap::new();
        sources.insert(
            DEFAULT_SOURCE_NAME.to_string(),
            SourceUnit {
                content: body.into(),
                keccak256: None,
            },
        );
        Self {
            language: "Solidity".to_string(),
            sources,
            settings: Some(json!({
                "optimizer": { "enabled": false, "runs": DEFAULT_OPTIMIZER_RUNS },
                "outputSelection": { "*": { "*": ["*"], "": ["*"] } }
            })),
        }
    }

    pub fn with_source(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.sources.insert(
            name.into(),
            SourceUnit {
                content: content.into(),
                keccak256: None,
            },
        );
        self
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// One entry of the output `errors` array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub severity: Severity,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub component: Option<String>,
    #[serde(default)]
    pub formatted_message: Option<String>,
    #[serde(default)]
    pub source_location: Option<Value>,
    #[serde(default)]
    pub error_code: Option<String>,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Typed view over a standard-JSON output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompilerOutput {
    #[serde(default)]
    pub errors: Vec<Diagnostic>,
    #[serde(default)]
    pub contracts: BTreeMap<String, Map<String, Value>>,
    #[serde(default)]
    pub sources: BTreeMap<String, Value>,
}

impl CompilerOutput {
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }

    pub fn has_errors(&self) -> bool {
        self.errors.iter().any(Diagnostic::is_error)
    }

    pub fn error_diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.errors.iter().filter(|d| d.is_error())
    }

    pub fn contract(&self, source: &str, name: &str) -> Option<&Value> {
        self.contracts.get(source)?.get(name)
    }
}
