//! Full path against a real compiler download.
//!
//! Needs network access to binaries.soliditylang.org; run with
//! `cargo test -- --ignored`.

use solc_broker::broker::Broker;
use solc_broker::client::ClientHandle;
use solc_broker::config::ArtifactsConfig;
use solc_broker::engine::HttpArtifactLoader;
use solc_broker::input::CompilerOutput;
use solc_broker::protocol::Version;
use std::sync::Arc;
use tempfile::TempDir;

const SOURCE: &str = r#"
// SPDX-License-Identifier: MIT
pragma solidity ^0.8.20;

contract Counter {
    uint256 public count;

    function increment() external {
        count += 1;
    }
}
"#;

#[tokio::test]
#[ignore]
async fn test_compiles_with_downloaded_solc() {
    let temp_dir = TempDir::new().unwrap();
    let artifacts = ArtifactsConfig {
        dir: temp_dir.path().to_path_buf(),
        ..ArtifactsConfig::default()
    };
    let loader = HttpArtifactLoader::new(artifacts).unwrap();
    let (broker, handle) = Broker::new(Arc::new(loader));
    broker.spawn();

    let client = ClientHandle::new(handle.connect(), "0.8.20");
    client.wait_ready(&Version::from("0.8.20")).await.unwrap();

    let output = client.compile_contract(SOURCE).await.unwrap();
    let output = CompilerOutput::from_value(&output).unwrap();
    assert!(!output.has_errors(), "{:?}", output.errors);

    let counter = output.contract("contract", "Counter").unwrap();
    let abi = counter["abi"].as_array().unwrap();
    assert!(abi.iter().any(|item| item["name"] == "increment"));
    assert!(abi.iter().any(|item| item["name"] == "count"));
}
