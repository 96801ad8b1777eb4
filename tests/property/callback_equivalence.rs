//! A rebuilt callback answers exactly like the function it was written as

use proptest::prelude::*;
use solc_broker::callback::{ImportCallbackFragment, ImportResult};

const RESOLVER: &str = r#"
function resolve(path) {
    if (path.startsWith("@lib/")) {
        return { contents: "// " + path.slice(5) };
    }
    if (path.endsWith(".sol") && !path.includes("..")) {
        return { contents: path.toUpperCase() };
    }
    return { error: "unsupported: " + path };
}
"#;

fn native(path: &str) -> ImportResult {
    if let Some(rest) = path.strip_prefix("@lib/") {
        return ImportResult::contents(format!("// {}", rest));
    }
    if path.ends_with(".sol") && !path.contains("..") {
        return ImportResult::contents(path.to_uppercase());
    }
    ImportResult::error(format!("unsupported: {}", path))
}

#[test]
fn test_rebuilt_callback_matches_native_function() {
    let mut runner = proptest::test_runner::TestRunner::default();
    let callback = ImportCallbackFragment::from_source(RESOLVER)
        .unwrap()
        .reconstruct()
        .unwrap();

    runner
        .run(&"(@lib/)?[a-zA-Z0-9_./-]{0,24}(\\.sol)?", |path| {
            prop_assert_eq!(callback.call(&path), native(&path));
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_fragment_survives_the_wire() {
    let mut runner = proptest::test_runner::TestRunner::default();
    let fragment = ImportCallbackFragment::from_source(RESOLVER).unwrap();
    let wire = serde_json::to_string(&fragment).unwrap();
    let received: ImportCallbackFragment = serde_json::from_str(&wire).unwrap();
    let local = fragment.reconstruct().unwrap();
    let remote = received.reconstruct().unwrap();

    runner
        .run(&"[ -~]{0,32}", |path| {
            prop_assert_eq!(local.call(&path), remote.call(&path));
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_callback_never_panics_on_arbitrary_paths() {
    let mut runner = proptest::test_runner::TestRunner::default();
    let callback = ImportCallbackFragment::from_source(RESOLVER)
        .unwrap()
        .reconstruct()
        .unwrap();

    runner
        .run(&"[ -~]{0,32}", |path| {
            match callback.call(&path) {
                ImportResult::Contents(contents) => prop_assert!(!contents.is_empty()),
                ImportResult::Error(message) => prop_assert!(message.starts_with("unsupported: ")),
            }
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_conditional_callback_matches_native_function() {
    let mut runner = proptest::test_runner::TestRunner::default();
    let callback = ImportCallbackFragment::from_source(
        r#"function f(path) { return path === "a" ? {contents: "X"} : {error: "missing"}; }"#,
    )
    .unwrap()
    .reconstruct()
    .unwrap();
    let f = |path: &str| {
        if path == "a" {
            ImportResult::contents("X")
        } else {
            ImportResult::error("missing")
        }
    };

    assert_eq!(callback.call("a"), f("a"));
    runner
        .run(&"a?[a-z]{0,3}", |path| {
            prop_assert_eq!(callback.call(&path), f(&path));
            Ok(())
        })
        .unwrap();
}
