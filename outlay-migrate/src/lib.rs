//! Outlay Migration Library
//!
//! The expense service's migration definitions and the `db` command handlers.
//! The CLI tool (main.rs) uses this library.

pub mod commands;
pub mod migrations;
