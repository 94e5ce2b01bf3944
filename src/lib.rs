//! Pooled SSH sessions with fail-closed host trust.
//!
//! - [`ssh`]: the session core (key loading, host trust, sessions, pool)
//! - [`mcp`]: MCP tools that embed a [`ssh::SessionPool`]

pub mod mcp;
pub mod ssh;
