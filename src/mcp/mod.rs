//! MCP server surface over the SSH session pool.
//!
//! - `types`: Serializable response types for MCP tools
//! - `commands`: MCP tool implementations

pub mod commands;
pub mod types;

pub use commands::SshTools;
