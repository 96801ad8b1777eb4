//! Import callbacks sent across the broker boundary

use crate::integration::test_utils::{
    connect_client, contract_names, start_broker, FakeLoader, VERSION,
};
use solc_broker::callback::ImportCallbackFragment;
use solc_broker::error::{ClientError, ErrorKind};
use solc_broker::input::{CompilerInput, CompilerOutput};
use solc_broker::protocol::Version;
use std::sync::Arc;

const RESOLVER: &str = r#"
function resolve(path) {
    if (path === "lib/Token.sol") {
        return { contents: "import \"./Math.sol\"; contract Token {}" };
    }
    if (path === "lib/Math.sol") {
        return { contents: "contract Math {}" };
    }
    return { error: "no such file: " + path };
}
"#;

fn main_input() -> serde_json::Value {
    CompilerInput::from_contract("contract Placeholder {}")
        .with_source(
            "app/Main.sol",
            "import \"lib/Token.sol\";\nimport \"./Missing.sol\";\ncontract Main {}",
        )
        .to_value()
}

#[tokio::test]
async fn test_callback_supplies_imports() {
    let broker = start_broker(Arc::new(FakeLoader::new(&[VERSION])));
    let client = connect_client(&broker);

    let output = client
        .compile_with_callback_source(Version::from(VERSION), main_input(), RESOLVER)
        .await
        .unwrap();

    assert_eq!(
        contract_names(&output),
        vec!["Main", "Math", "Placeholder", "Token"]
    );
    assert!(output["sources"].get("lib/Math.sol").is_some());
}

#[tokio::test]
async fn test_single_contract_with_callback() {
    let broker = start_broker(Arc::new(FakeLoader::new(&[VERSION])));
    let client = connect_client(&broker);

    let output = client
        .compile_contract_with_callback("import \"lib/Math.sol\"; contract User {}", RESOLVER)
        .await
        .unwrap();
    assert_eq!(contract_names(&output), vec!["Math", "User"]);
}

#[tokio::test]
async fn test_callback_errors_become_diagnostics() {
    let broker = start_broker(Arc::new(FakeLoader::new(&[VERSION])));
    let client = connect_client(&broker);

    let output = client
        .compile_with_callback_source(Version::from(VERSION), main_input(), RESOLVER)
        .await
        .unwrap();

    let output = CompilerOutput::from_value(&output).unwrap();
    assert!(output.has_errors());
    let messages: Vec<&str> = output
        .error_diagnostics()
        .map(|d| d.message.as_str())
        .collect();
    assert_eq!(
        messages,
        vec!["Source \"app/Missing.sol\" not found: no such file: app/Missing.sol"]
    );
    let diagnostic = output.error_diagnostics().next().unwrap();
    assert_eq!(diagnostic.kind, "ParserError");
}

#[tokio::test]
async fn test_capturing_callback_is_rejected_by_broker() {
    let broker = start_broker(Arc::new(FakeLoader::new(&[VERSION])));
    let client = connect_client(&broker);

    // `root` is free in the body, so the callback cannot be rebuilt remotely
    let fragment = ImportCallbackFragment::new(
        "resolve",
        "path",
        "return { contents: root + path };",
    );
    let err = client
        .compile(main_input(), Some(fragment))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::InvalidImportCallback));

    // the session is unaffected
    let output = client.compile_contract("contract After {}").await.unwrap();
    assert_eq!(contract_names(&output), vec!["After"]);
}

#[tokio::test]
async fn test_pathologically_nested_callback_only_fails_its_request() {
    let broker = start_broker(Arc::new(FakeLoader::new(&[VERSION])));
    let client = connect_client(&broker);

    let body = format!(
        "return {{contents: {}path{}}};",
        "(".repeat(200_000),
        ")".repeat(200_000)
    );
    let fragment = ImportCallbackFragment::new("resolve", "path", body);
    let err = client
        .compile(main_input(), Some(fragment))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::InvalidImportCallback));

    let output = client.compile_contract("contract Survivor {}").await.unwrap();
    assert_eq!(contract_names(&output), vec!["Survivor"]);
    assert!(broker.is_running());
}

#[tokio::test]
async fn test_arrow_callback_is_rejected_locally() {
    let broker = start_broker(Arc::new(FakeLoader::new(&[VERSION])));
    let client = connect_client(&broker);

    let err = client
        .compile_with_callback_source(
            Version::from(VERSION),
            main_input(),
            "(path) => { return { error: path }; }",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidCallback(_)));
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn test_callback_is_not_consulted_for_known_sources() {
    let broker = start_broker(Arc::new(FakeLoader::new(&[VERSION])));
    let client = connect_client(&broker);

    let input = CompilerInput::from_contract("import \"lib/Given.sol\"; contract User {}")
        .with_source("lib/Given.sol", "contract Given {}")
        .to_value();
    let output = client
        .compile_with_callback_source(
            Version::from(VERSION),
            input,
            "function refuse(path) { return { error: \"asked for \" + path }; }",
        )
        .await
        .unwrap();

    let output = CompilerOutput::from_value(&output).unwrap();
    assert!(!output.has_errors());
    assert!(output.contract("lib/Given.sol", "Given").is_some());
    assert!(output.contract("contract", "User").is_some());
}
