//! Configuration sources, applied in override order.

pub mod environment;
pub mod explicit_file;
pub mod global_file;
