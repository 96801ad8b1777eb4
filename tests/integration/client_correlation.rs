//! Reply routing for concurrent requests and disconnects

use crate::integration::test_utils::{
    connect_client, contract_names, eventually, start_broker, FakeLoader, VERSION,
};
use solc_broker::protocol::Version;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

#[tokio::test]
async fn test_out_of_order_results_reach_their_requests() {
    let loader = Arc::new(FakeLoader::new(&[VERSION]));
    let gates = loader.gates();
    let broker = start_broker(loader);
    let client = connect_client(&broker);
    client.wait_ready(&Version::from(VERSION)).await.unwrap();

    let release_slow = gates.gate("Slow");
    let mut slow = client.compile_contract("contract Slow {}");
    let fast = client.compile_contract("contract Fast {}");

    // the second request finishes while the first is still compiling
    let fast = fast.await.unwrap();
    assert_eq!(contract_names(&fast), vec!["Fast"]);
    assert!(timeout(Duration::from_millis(50), &mut slow).await.is_err());
    assert_eq!(client.pending_count(), 1);

    release_slow.send(()).unwrap();
    let slow = slow.await.unwrap();
    assert_eq!(contract_names(&slow), vec!["Slow"]);
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn test_clients_only_see_their_own_results() {
    let loader = Arc::new(FakeLoader::new(&[VERSION]));
    let broker = start_broker(loader);
    let alice = connect_client(&broker);
    let bob = connect_client(&broker);

    // both connections number their first request 1
    let from_alice = alice.compile_contract("contract Alice {}");
    let from_bob = bob.compile_contract("contract Bob {}");
    let (from_alice, from_bob) = tokio::join!(from_alice, from_bob);

    assert_eq!(contract_names(&from_alice.unwrap()), vec!["Alice"]);
    assert_eq!(contract_names(&from_bob.unwrap()), vec!["Bob"]);
}

#[tokio::test]
async fn test_results_for_departed_clients_are_dropped() {
    let loader = Arc::new(FakeLoader::new(&[VERSION]));
    let gates = loader.gates();
    let broker = start_broker(loader);

    let leaving = connect_client(&broker);
    let release = gates.gate("Abandoned");
    let abandoned = leaving.compile_contract("contract Abandoned {}");
    drop(abandoned);
    drop(leaving);

    release.send(()).unwrap();

    // the broker keeps serving everyone else
    let staying = connect_client(&broker);
    let output = staying.compile_contract("contract Staying {}").await.unwrap();
    assert_eq!(contract_names(&output), vec!["Staying"]);
    assert!(broker.is_running());
}

#[tokio::test]
async fn test_cache_replies_interleave_with_compiles() {
    let loader = Arc::new(FakeLoader::new(&[VERSION]));
    let gates = loader.gates();
    let broker = start_broker(loader);
    let client = connect_client(&broker);

    let release = gates.gate("Pending");
    let compile = client.compile_contract("contract Pending {}");
    // no cache attached, so this fails at once while the compile is held
    let err = client.retrieve("a.sol").await.unwrap_err();
    assert_eq!(
        err.kind(),
        Some(solc_broker::error::ErrorKind::CacheError)
    );
    assert!(eventually(|| client.pending_count() == 1).await);

    release.send(()).unwrap();
    assert_eq!(contract_names(&compile.await.unwrap()), vec!["Pending"]);
}
