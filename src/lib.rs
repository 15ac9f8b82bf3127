//! Userscript manager
//!
//! Discovers, activates and updates userscript plugins drawn from a bundled
//! library directory and a user directory, keeping the main, hook and
//! position scripts always loaded.
//!
//! This library exposes the manager for both the CLI binary and integration
//! testing.

pub mod activation;
pub mod assets;
pub mod config;
pub mod discovery;
pub mod fetch;
pub mod fsutil;
pub mod layout;
pub mod manager;
pub mod metadata;
pub mod script;
pub mod sync;
pub mod update;
pub mod version;
pub mod watcher;
