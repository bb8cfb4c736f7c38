//! CLI module - argument parsing and interactive prompts

mod args;
mod prompts;

pub use args::{default_session_path, Cli, Commands, DataArgs, VariableArgs};
pub use prompts::*;
