//! I/O helpers for the task engine.

pub mod collector;
pub mod config;
pub mod globs;
pub mod ignore_files;
pub mod prompt;
pub mod provider;
pub mod session;
