//! Import path resolution and resolver call counts

use proptest::prelude::*;
use serde_json::json;
use solc_broker::callback::ImportResult;
use solc_broker::engine::imports::{resolve_imports, resolve_path};
use std::collections::BTreeMap;
use std::sync::Mutex;

#[test]
fn test_relative_imports_resolve_against_importer_directory() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(
                prop::collection::vec("[a-z][a-z0-9]{0,6}", 1..4),
                "[A-Z][a-zA-Z]{0,8}\\.sol",
            ),
            |(dirs, file)| {
                let importer = format!("{}/Importer.sol", dirs.join("/"));

                let sibling = resolve_path(&importer, &format!("./{}", file));
                prop_assert_eq!(sibling, format!("{}/{}", dirs.join("/"), file));

                let parent = resolve_path(&importer, &format!("../{}", file));
                let mut expected = dirs[..dirs.len() - 1].to_vec();
                expected.push(file.clone());
                prop_assert_eq!(parent, expected.join("/"));

                // package-style paths are taken as written
                let absolute = format!("pkg/{}", file);
                prop_assert_eq!(resolve_path(&importer, &absolute), absolute);
                Ok(())
            },
        )
        .unwrap();
}

#[test]
fn test_each_missing_import_is_requested_once() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &prop::collection::vec(("[a-e]", any::<bool>()), 1..12),
            |imports| {
                let mut body = String::new();
                for (name, _) in &imports {
                    body.push_str(&format!("import \"lib/{}.sol\";\n", name));
                }
                body.push_str("contract Main {}");
                let known: BTreeMap<String, bool> = imports
                    .iter()
                    .map(|(name, found)| (format!("lib/{}.sol", name), *found))
                    .collect();

                let calls = Mutex::new(Vec::new());
                let resolver = |path: &str| {
                    calls.lock().unwrap().push(path.to_string());
                    match known.get(path) {
                        Some(true) => ImportResult::contents("contract Lib {}"),
                        _ => ImportResult::error("absent"),
                    }
                };

                let input = json!({"language": "Solidity", "sources": {"Main.sol": {"content": body}}});
                let (input, diagnostics) = resolve_imports(input, &resolver);

                let calls = calls.into_inner().unwrap();
                prop_assert_eq!(calls.len(), known.len());
                let missing = known.values().filter(|found| !**found).count();
                prop_assert_eq!(diagnostics.len(), missing);
                let sources = input["sources"].as_object().unwrap();
                prop_assert_eq!(sources.len(), 1 + known.len() - missing);
                Ok(())
            },
        )
        .unwrap();
}
