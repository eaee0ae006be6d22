//! Subcommand implementations

pub mod check;
pub mod dump;
pub mod instrument;
