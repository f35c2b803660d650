//! Server configuration.
//!
//! The only runtime knobs are the bind address, the port, and a
//! verbosity switch — spec.md §6 is explicit that there is no other
//! runtime configuration.

use std::path::PathBuf;

/// Resolved server configuration.
///
/// Built by the CLI front end (`src/bin/mockd.rs`) via `clap`, or
/// directly by tests/embedders.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub verbose: bool,
    pub catalog_path: Option<PathBuf>,
    pub vfs_seed_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 2222,
            verbose: false,
            catalog_path: None,
            vfs_seed_path: None,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
