//! I/O helpers: config, agent processes, prompts and run artifacts.

pub mod config;
pub mod executor;
pub mod process;
pub mod prompt;
pub mod run_log;
