//! Mock Carvera-family CNC controller.
//!
//! Emulates the wire-level command protocol of a Carvera-family CNC
//! controller over TCP: command dispatch against a declarative table,
//! a byte-level framer that distinguishes instant commands from
//! newline-terminated ones, a small virtual filesystem, and an
//! XMODEM-8K file-transfer engine for `upload`/`download`.

pub mod catalog;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod framer;
pub mod server;
pub mod time_anchor;
pub mod vfs;
pub mod xmodem;

pub use config::ServerConfig;
pub use server::run;
