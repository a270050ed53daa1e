//! Command handlers for the CLI
//!
//! - `mcp` -- list servers, list tools, call a tool

pub mod mcp;
