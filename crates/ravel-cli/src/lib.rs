//! Library half of the `ravel` tool
//!
//! The binary in `main.rs` only parses arguments and sets up logging; the
//! commands live here so they can be driven from tests.

pub mod classpath;
pub mod commands;
pub mod files;
