//! Contract cache actions served by the broker

use crate::integration::test_utils::{
    connect_client, start_broker_with_cache, FakeLoader, VERSION,
};
use solc_broker::cache::{CacheResolver, ContractCache, MemoryContractCache, SledContractCache};
use solc_broker::engine::imports;
use solc_broker::input::CompilerInput;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_store_retrieve_delete_through_broker() {
    let cache = Arc::new(MemoryContractCache::new());
    let broker = start_broker_with_cache(Arc::new(FakeLoader::new(&[VERSION])), cache.clone());
    let client = connect_client(&broker);

    client.store("lib/Token.sol", "contract Token {}").await.unwrap();
    assert_eq!(
        client.retrieve("lib/Token.sol").await.unwrap().as_deref(),
        Some("contract Token {}")
    );
    assert_eq!(cache.len(), 1);

    client.delete("lib/Token.sol").await.unwrap();
    assert_eq!(client.retrieve("lib/Token.sol").await.unwrap(), None);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_entries_are_shared_between_clients() {
    let temp_dir = TempDir::new().unwrap();
    let cache = Arc::new(SledContractCache::new(temp_dir.path()).unwrap());
    let broker = start_broker_with_cache(Arc::new(FakeLoader::new(&[VERSION])), cache.clone());

    let writer = connect_client(&broker);
    let reader = connect_client(&broker);
    writer.store("a.sol", "contract A {}").await.unwrap();
    assert_eq!(
        reader.retrieve("a.sol").await.unwrap().as_deref(),
        Some("contract A {}")
    );
    assert_eq!(cache.list_paths().unwrap(), vec!["a.sol"]);
}

#[test]
fn test_cache_resolver_feeds_import_resolution() {
    let temp_dir = TempDir::new().unwrap();
    let cache = Arc::new(SledContractCache::new(temp_dir.path()).unwrap());
    cache.store("lib/Owned.sol", "contract Owned {}").unwrap();
    let resolver = CacheResolver::new(cache);

    let input = CompilerInput::from_contract(
        "import \"lib/Owned.sol\";\nimport \"lib/Absent.sol\";\ncontract Vault {}",
    )
    .to_value();
    let (input, diagnostics) = imports::resolve_imports(input, &resolver);

    assert_eq!(
        input["sources"]["lib/Owned.sol"]["content"],
        "contract Owned {}"
    );
    assert_eq!(diagnostics.len(), 1);
    assert!(diagnostics[0]["message"]
        .as_str()
        .unwrap()
        .contains("lib/Absent.sol is not in the contract cache"));
}
