//! solc-broker: Shared Compiler Session Broker
//!
//! Multiplexes lazily loaded, versioned Solidity compiler engines across any
//! number of client connections over one untyped JSON message channel.

pub mod broker;
pub mod cache;
pub mod callback;
pub mod cli;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod input;
pub mod logging;
pub mod protocol;
pub mod transport;

pub use broker::{Broker, BrokerHandle, Connection};
pub use client::{ClientHandle, Notification};
pub use error::{BrokerError, ClientError, ErrorKind};
pub use protocol::{RequestId, Version};
