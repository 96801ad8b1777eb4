//! Integration tests for the Solidity compiler session broker

mod broker_sessions;
mod client_correlation;
mod config_loading;
mod contract_cache;
mod end_to_end;
mod import_callbacks;
mod transport_tcp;
