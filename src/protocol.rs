//! Message Schema
//!
//! Everything crossing a client/broker channel is a JSON object discriminated
//! by its `action` field. The channel itself carries untyped
//! `serde_json::Value`s; each end decodes what it receives and treats anything
//! it cannot decode as a protocol error.

use crate::callback::ImportCallbackFragment;
use crate::error::{BrokerError, ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Compiler version identifier, e.g. `0.8.20`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    pub fn new(version: impl Into<String>) -> Self {
        Version(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Version {
    fn from(value: &str) -> Self {
        Version(value.to_string())
    }
}

impl From<String> for Version {
    fn from(value: String) -> Self {
        Version(value)
    }
}

/// Per-connection request identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new(id: u64) -> Self {
        RequestId(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Messages sent by clients to the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientMessage {
    Init {
        version: Version,
    },
    Compile {
        version: Version,
        #[serde(rename = "requestId")]
        request_id: RequestId,
        input: Value,
        #[serde(
            rename = "importCallback",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        import_callback: Option<ImportCallbackFragment>,
    },
    Store {
        #[serde(rename = "requestId")]
        request_id: RequestId,
        path: String,
        content: String,
    },
    Retrieve {
        #[serde(rename = "requestId")]
        request_id: RequestId,
        path: String,
    },
    Delete {
        #[serde(rename = "requestId")]
        request_id: RequestId,
        path: String,
    },
    Versions {
        #[serde(rename = "requestId")]
        request_id: RequestId,
    },
}

impl ClientMessage {
    pub fn action(&self) -> &'static str {
        match self {
            ClientMessage::Init { .. } => "init",
            ClientMessage::Compile { .. } => "compile",
            ClientMessage::Store { .. } => "store",
            ClientMessage::Retrieve { .. } => "retrieve",
            ClientMessage::Delete { .. } => "delete",
            ClientMessage::Versions { .. } => "versions",
        }
    }
}

/// Events emitted by the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum BrokerEvent {
    /// Broadcast to every connected client once a version is loaded
    Ready { version: Version },
    Out {
        version: Version,
        #[serde(rename = "requestId")]
        request_id: RequestId,
        output: Value,
    },
    /// Per-request when `request_id` is set, broadcast otherwise
    Error {
        #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<RequestId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<Version>,
        kind: ErrorKind,
        detail: String,
    },
    Ack {
        #[serde(rename = "requestId")]
        request_id: RequestId,
    },
    Retrieved {
        #[serde(rename = "requestId")]
        request_id: RequestId,
        path: String,
        #[serde(default)]
        content: Option<String>,
    },
    Manifest {
        #[serde(rename = "requestId")]
        request_id: RequestId,
        releases: BTreeMap<String, String>,
        #[serde(
            rename = "latestRelease",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        latest_release: Option<String>,
    },
}

impl BrokerEvent {
    /// Error event addressed to a single request
    pub fn request_error(request_id: RequestId, err: &BrokerError) -> Self {
        BrokerEvent::Error {
            request_id: Some(request_id),
            version: None,
            kind: err.kind(),
            detail: err.detail().to_string(),
        }
    }

    /// Error event broadcast to all clients about a version
    pub fn version_error(version: &Version, err: &BrokerError) -> Self {
        BrokerEvent::Error {
            request_id: None,
            version: Some(version.clone()),
            kind: err.kind(),
            detail: err.detail().to_string(),
        }
    }

    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            BrokerEvent::Ready { .. } => None,
            BrokerEvent::Error { request_id, .. } => *request_id,
            BrokerEvent::Out { request_id, .. }
            | BrokerEvent::Ack { request_id }
            | BrokerEvent::Retrieved { request_id, .. }
            | BrokerEvent::Manifest { request_id, .. } => Some(*request_id),
        }
    }
}

/// Decode an inbound client message
pub fn decode_message(value: Value) -> Result<ClientMessage, BrokerError> {
    serde_json::from_value(value).map_err(|e| BrokerError::ProtocolError(e.to_string()))
}

/// Decode a broker event received by a client
pub fn decode_event(value: Value) -> Result<BrokerEvent, BrokerError> {
    serde_json::from_value(value).map_err(|e| BrokerError::ProtocolError(e.to_string()))
}

/// Encode any schema message for the channel
pub fn encode<T: Serialize>(message: &T) -> Result<Value, BrokerError> {
    serde_json::to_value(message).map_err(|e| BrokerError::ProtocolError(e.to_string()))
}
