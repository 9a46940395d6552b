//! Platform helpers for Lexicon: per-user application directories and
//! process spawning adapters.

mod commands;
mod paths;

pub use commands::Detach;
pub use paths::{AppPaths, AppPathsError, current_executable};
