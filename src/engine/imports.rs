//! Import pre-resolution
//!
//! The native compiler has no callback channel, so imports are resolved
//! before it runs: every `import` directive in the input is scanned, paths
//! the input does not carry are handed to the resolver once each, and the
//! returned contents are added as extra sources. Resolver errors become
//! compiler-style diagnostics on the output.

use crate::callback::{ImportResolver, ImportResult};
use regex::{Captures, Regex};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::OnceLock;

fn import_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"import\s+(?:[^"';]*\bfrom\s+)?["']([^"']+)["']"#)
            .unwrap_or_else(|e| panic!("import pattern: {}", e))
    })
}

/// String literals or comments; strings come first so `//` inside a path survives
fn comment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?s)"(?:[^"\\\n]|\\.)*"|'(?:[^'\\\n]|\\.)*'|//[^\n]*|/\*.*?\*/"#)
            .unwrap_or_else(|e| panic!("comment pattern: {}", e))
    })
}

/// Import paths named by a source unit, in order of appearance
pub fn scan_imports(source: &str) -> Vec<String> {
    let stripped = comment_pattern().replace_all(source, |caps: &Captures| {
        let matched = &caps[0];
        if matched.starts_with('"') || matched.starts_with('\'') {
            matched.to_string()
        } else {
            String::new()
        }
    });
    import_pattern()
        .captures_iter(&stripped)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Resolve `import` as written in `importer` to a source unit name
pub fn resolve_path(importer: &str, import: &str) -> String {
    if !import.starts_with("./") && !import.starts_with("../") {
        return import.to_string();
    }

    let mut parts: Vec<&str> = importer.split('/').collect();
    parts.pop();
    for segment in import.split('/') {
        match segment {
            "." | "" => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// Pull in every missing import through `resolver`.
///
/// Returns the input with resolved sources added and one diagnostic per path
/// the resolver refused.
pub fn resolve_imports(mut input: Value, resolver: &dyn ImportResolver) -> (Value, Vec<Value>) {
    let mut known: BTreeMap<String, String> = BTreeMap::new();
    if let Some(sources) = input.get("sources").and_then(Value::as_object) {
        for (name, unit) in sources {
            let content = unit
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default();
            known.insert(name.clone(), content.to_string());
        }
    }

    let mut queue: VecDeque<(String, String)> = known
        .iter()
        .map(|(name, content)| (name.clone(), content.clone()))
        .collect();
    let mut attempted: BTreeSet<String> = BTreeSet::new();
    let mut added: Vec<(String, String)> = Vec::new();
    let mut diagnostics = Vec::new();

    while let Some((name, content)) = queue.pop_front() {
        for import in scan_imports(&content) {
            let path = resolve_path(&name, &import);
            if known.contains_key(&path) || !attempted.insert(path.clone()) {
                continue;
            }
            match resolver.resolve(&path) {
                ImportResult::Contents(contents) => {
                    known.insert(path.clone(), contents.clone());
                    added.push((path.clone(), contents.clone()));
                    queue.push_back((path, contents));
                }
                ImportResult::Error(message) => {
                    diagnostics.push(not_found(&path, &message));
                }
            }
        }
    }

    if !added.is_empty() {
        if let Some(sources) = input.get_mut("sources").and_then(Value::as_object_mut) {
            for (path, contents) in added {
                sources.insert(path, json!({ "content": contents }));
            }
        }
    }

    (input, diagnostics)
}

fn not_found(path: &str, message: &str) -> Value {
    let text = format!("Source \"{}\" not found: {}", path, message);
    json!({
        "component": "general",
        "severity": "error",
        "type": "ParserError",
        "message": text,
        "formattedMessage": format!("ParserError: {}\n", text),
    })
}

/// Merge resolver diagnostics into a compiler output.
///
/// The compiler reports its own "not found" entry for each unresolved path;
/// those are replaced by the resolver's message.
pub fn append_diagnostics(mut output: Value, diagnostics: Vec<Value>) -> Value {
    if diagnostics.is_empty() {
        return output;
    }
    let Some(object) = output.as_object_mut() else {
        return output;
    };

    let unresolved: Vec<String> = diagnostics
        .iter()
        .filter_map(|d| d.get("message").and_then(Value::as_str))
        .filter_map(|m| m.split('"').nth(1).map(|p| format!("Source \"{}\" not found", p)))
        .collect();

    let errors = object
        .entry("errors")
        .or_insert_with(|| Value::Array(Vec::new()));
    if let Some(list) = errors.as_array_mut() {
        list.retain(|entry| {
            let message = entry.get("message").and_then(Value::as_str).unwrap_or("");
            !unresolved.iter().any(|prefix| message.starts_with(prefix.as_str()))
        });
        list.extend(diagnostics);
    }
    output
}
