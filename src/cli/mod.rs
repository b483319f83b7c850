//! Command line interface

pub mod commands;
pub mod manpage;
pub mod prompt;

pub use commands::{ChangeIdArgs, Cli, Cmd};
