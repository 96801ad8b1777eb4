//! Import Callbacks
//!
//! An import callback is a synchronous resolver the engine invokes once per
//! unresolved import path. Callbacks cross the client/broker channel as an
//! [`ImportCallbackFragment`]: the function's name, declared parameter list and
//! body text. The broker never evaluates that text with a general interpreter;
//! it reconstructs a restricted, closure-free expression tree and runs that.

mod eval;
mod lexer;
mod parser;

use crate::error::BrokerError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use eval::Val;
pub use parser::{Expr, Stmt};

/// Result returned by an import resolver for one path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportResult {
    Contents(String),
    Error(String),
}

impl ImportResult {
    pub fn contents(contents: impl Into<String>) -> Self {
        ImportResult::Contents(contents.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        ImportResult::Error(message.into())
    }
}

/// Resolves import paths to source text during compilation
pub trait ImportResolver: Send + Sync {
    fn resolve(&self, path: &str) -> ImportResult;
}

impl<F> ImportResolver for F
where
    F: Fn(&str) -> ImportResult + Send + Sync,
{
    fn resolve(&self, path: &str) -> ImportResult {
        self(path)
    }
}

/// Serialized, closure-free description of an import callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportCallbackFragment {
    pub name: String,
    pub args: String,
    pub body: String,
}

impl ImportCallbackFragment {
    pub fn new(name: impl Into<String>, args: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: args.into(),
            body: body.into(),
        }
    }

    /// Reflect a function's source text into a fragment.
    ///
    /// Accepts `function name(args) { body }` declarations and
    /// `const name = function (args) { body }` expressions. Arrow functions,
    /// async functions and generators are rejected.
    pub fn from_source(source: &str) -> Result<Self, BrokerError> {
        let source = source.trim();
        let open_paren = source.find('(').ok_or_else(|| invalid("missing parameter list"))?;
        let close_paren = source[open_paren..]
            .find(')')
            .map(|i| i + open_paren)
            .ok_or_else(|| invalid("unterminated parameter list"))?;
        let open_brace = source.find('{').ok_or_else(|| invalid("missing function body"))?;
        let close_brace = source.rfind('}').ok_or_else(|| invalid("unterminated function body"))?;
        if close_brace < open_brace || open_brace < close_paren {
            return Err(invalid("malformed function source"));
        }

        let head = &source[..open_paren];
        let between = &source[close_paren + 1..open_brace];
        if between.contains("=>") {
            return Err(invalid("arrow functions are not supported"));
        }
        let words: Vec<&str> = head.split_whitespace().collect();
        if words.iter().any(|w| *w == "async") {
            return Err(invalid("async functions are not supported"));
        }
        if head.contains('*') {
            return Err(invalid("generator functions are not supported"));
        }
        let Some(function_at) = words.iter().position(|w| *w == "function") else {
            return Err(invalid("expected a `function` declaration or expression"));
        };

        let name = if let Some(next) = words.get(function_at + 1) {
            next.to_string()
        } else {
            // `const resolve = function (path) {..}` takes the binding name
            binding_name(&words[..function_at]).unwrap_or_default()
        };

        Ok(Self {
            name,
            args: source[open_paren + 1..close_paren].trim().to_string(),
            body: source[open_brace + 1..close_brace].to_string(),
        })
    }

    /// Rebuild a callable from the fragment text
    pub fn reconstruct(&self) -> Result<ImportCallback, BrokerError> {
        let params = parse_params(&self.args)?;
        let tokens = lexer::tokenize(&self.body).map_err(|e| invalid(&e))?;
        let body = parser::parse_body(tokens, &params).map_err(|e| invalid(&e))?;
        Ok(ImportCallback {
            name: self.name.clone(),
            params: Arc::new(params),
            body: Arc::new(body),
        })
    }
}

/// Callable rebuilt from an [`ImportCallbackFragment`]
#[derive(Debug, Clone)]
pub struct ImportCallback {
    name: String,
    params: Arc<Vec<String>>,
    body: Arc<Vec<Stmt>>,
}

impl ImportCallback {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Invoke with an import path; faults become `{error}` results
    pub fn call(&self, path: &str) -> ImportResult {
        match eval::run(&self.params, &self.body, path) {
            Ok(value) => eval::to_import_result(value),
            Err(fault) => ImportResult::Error(format!(
                "import callback `{}` failed: {}",
                self.name, fault
            )),
        }
    }
}

impl ImportResolver for ImportCallback {
    fn resolve(&self, path: &str) -> ImportResult {
        self.call(path)
    }
}

fn invalid(message: &str) -> BrokerError {
    BrokerError::InvalidImportCallback(message.to_string())
}

fn binding_name(words: &[&str]) -> Option<String> {
    // words like ["const", "resolve", "="]
    match words {
        [.., keyword, name, "="] if matches!(*keyword, "const" | "let" | "var") => {
            Some(name.to_string())
        }
        [.., keyword, name_eq] if matches!(*keyword, "const" | "let" | "var") => {
            name_eq.strip_suffix('=').map(|n| n.to_string())
        }
        _ => None,
    }
}

fn parse_params(args: &str) -> Result<Vec<String>, BrokerError> {
    let mut params = Vec::new();
    for raw in args.split(',') {
        let param = raw.trim();
        if param.is_empty() {
            continue;
        }
        let valid = param.chars().enumerate().all(|(i, c)| {
            c == '_' || c == '$' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit())
        });
        if !valid {
            return Err(invalid(&format!(
                "unsupported parameter `{}` (only plain identifiers are allowed)",
                param
            )));
        }
        params.push(param.to_string());
    }
    Ok(params)
}
