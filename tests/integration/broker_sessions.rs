//! Engine session lifecycle as seen through broker connections

use crate::integration::test_utils::{
    connect_client, contract_names, eventually, start_broker, FakeLoader, OTHER_VERSION, VERSION,
};
use futures::future::join_all;
use solc_broker::client::{ClientHandle, Notification};
use solc_broker::error::{ClientError, ErrorKind};
use solc_broker::input::CompilerInput;
use solc_broker::protocol::Version;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

#[tokio::test]
async fn test_concurrent_clients_share_one_engine_load() {
    let (loader, gate) = FakeLoader::new(&[VERSION]).gated();
    let loader = Arc::new(loader);
    let broker = start_broker(loader.clone());

    let clients: Vec<ClientHandle> = (0..8).map(|_| connect_client(&broker)).collect();
    let mut compiles: Vec<_> = clients
        .iter()
        .enumerate()
        .map(|(i, client)| client.compile_contract(&format!("contract C{} {{}}", i)))
        .collect();

    assert!(eventually(|| loader.binary_loads() == 1).await);
    // nothing completes while the load is held
    assert!(timeout(Duration::from_millis(50), &mut compiles[0]).await.is_err());

    gate.add_permits(1);
    let outputs = join_all(compiles).await;
    for (i, output) in outputs.into_iter().enumerate() {
        assert_eq!(contract_names(&output.unwrap()), vec![format!("C{}", i)]);
    }

    assert_eq!(loader.binary_loads(), 1);
    assert_eq!(loader.wrapper_loads(), 1);
    assert_eq!(loader.manifest_fetches(), 1);
    let version = Version::from(VERSION);
    for client in &clients {
        client.wait_ready(&version).await.unwrap();
    }
}

#[tokio::test]
async fn test_versions_load_independently() {
    let loader = Arc::new(FakeLoader::new(&[VERSION, OTHER_VERSION]));
    let broker = start_broker(loader.clone());
    let client = connect_client(&broker);

    let input = CompilerInput::from_contract("contract Old {}").to_value();
    let older = client
        .compile_with_version(Version::from(OTHER_VERSION), input, None)
        .await
        .unwrap();
    let newer = client.compile_contract("contract New {}").await.unwrap();

    assert_eq!(contract_names(&older), vec!["Old"]);
    assert_eq!(contract_names(&newer), vec!["New"]);
    assert_eq!(loader.binary_loads(), 2);
    assert!(older["contracts"]["contract"]["Old"]["metadata"]
        .as_str()
        .unwrap()
        .contains(OTHER_VERSION));
}

#[tokio::test]
async fn test_unknown_version_is_rejected_without_affecting_others() {
    let loader = Arc::new(FakeLoader::new(&[VERSION]));
    let broker = start_broker(loader.clone());
    let client = connect_client(&broker);
    let mut notifications = client.subscribe();

    let input = CompilerInput::from_contract("contract C {}").to_value();
    let err = client
        .compile_with_version(Version::from("9.9.9"), input.clone(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::VersionNotFound));

    // the failure is also broadcast against the version
    loop {
        match notifications.recv().await.unwrap() {
            Notification::Failed { version, kind, .. } => {
                assert_eq!(version, Some(Version::from("9.9.9")));
                assert_eq!(kind, ErrorKind::VersionNotFound);
                break;
            }
            _ => continue,
        }
    }

    let output = client.compile_contract("contract C {}").await.unwrap();
    assert_eq!(contract_names(&output), vec!["C"]);

    // a failed version is retried, and fails the same way
    let again = client
        .compile_with_version(Version::from("9.9.9"), input, None)
        .await
        .unwrap_err();
    assert_eq!(again.kind(), Some(ErrorKind::VersionNotFound));
    assert_eq!(loader.binary_loads(), 1);
}

#[tokio::test]
async fn test_load_failure_is_retried_on_next_request() {
    let loader = Arc::new(FakeLoader::new(&[VERSION]).failing_first(1));
    let broker = start_broker(loader.clone());
    let client = connect_client(&broker);

    let err = client.wait_ready(&Version::from(VERSION)).await.unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::LoadError));

    let output = client.compile_contract("contract Retried {}").await.unwrap();
    assert_eq!(contract_names(&output), vec!["Retried"]);
    assert_eq!(loader.binary_loads(), 2);
    assert_eq!(loader.wrapper_loads(), 1);
}

#[tokio::test]
async fn test_retry_sent_right_after_rejection_starts_new_attempt() {
    let (loader, gate) = FakeLoader::new(&[VERSION]).failing_first(1).gated();
    let loader = Arc::new(loader);
    let broker = start_broker(loader.clone());
    let client = connect_client(&broker);

    let first = client.compile_contract("contract First {}");
    gate.add_permits(1);
    let err = first.await.unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::LoadError));

    // sent before the broker may have recorded the failure
    let output = client.compile_contract("contract Second {}").await.unwrap();
    assert_eq!(contract_names(&output), vec!["Second"]);
    assert_eq!(loader.binary_loads(), 2);
}

#[tokio::test]
async fn test_ready_reaches_every_connection() {
    let (loader, gate) = FakeLoader::new(&[VERSION]).gated();
    let broker = start_broker(Arc::new(loader));
    let version = Version::from(VERSION);

    let first = connect_client(&broker);
    let second = connect_client(&broker);
    gate.add_permits(1);
    first.wait_ready(&version).await.unwrap();
    second.wait_ready(&version).await.unwrap();

    // a client that connects after the load still hears about it
    let late = connect_client(&broker);
    late.wait_ready(&version).await.unwrap();
    assert!(late.is_ready(&version));
}

#[tokio::test]
async fn test_compile_waits_for_in_flight_init() {
    let (loader, gate) = FakeLoader::new(&[VERSION]).gated();
    let loader = Arc::new(loader);
    let broker = start_broker(loader.clone());
    let client = connect_client(&broker);
    assert!(eventually(|| loader.binary_loads() == 1).await);

    let mut compile = client.compile_contract("contract Deferred {}");
    assert!(timeout(Duration::from_millis(50), &mut compile).await.is_err());
    assert_eq!(client.pending_count(), 1);

    gate.add_permits(1);
    let output = compile.await.unwrap();
    assert_eq!(contract_names(&output), vec!["Deferred"]);
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn test_versions_lists_manifest_releases() {
    let loader = Arc::new(FakeLoader::new(&[VERSION, OTHER_VERSION]));
    let broker = start_broker(loader);
    let client = connect_client(&broker);

    let releases = client.versions().await.unwrap();
    assert!(releases.releases.contains_key(VERSION));
    assert!(releases.releases.contains_key(OTHER_VERSION));
    assert_eq!(releases.latest_release.as_deref(), Some(VERSION));
}

#[tokio::test]
async fn test_broker_shutdown_disconnects_clients() {
    let (loader, _gate) = FakeLoader::new(&[VERSION]).gated();
    let (broker, handle) = solc_broker::Broker::new(Arc::new(loader));
    let task = broker.spawn();
    let client = connect_client(&handle);

    let compile = client.compile_contract("contract Stuck {}");
    task.abort();
    assert!(matches!(compile.await, Err(ClientError::Disconnected)));
    assert!(eventually(|| !client.is_connected()).await);
}
