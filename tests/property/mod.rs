//! Property-based tests for import callbacks and import resolution

mod callback_equivalence;
mod import_paths;
