//! Backend connectivity subsystem
//!
//! Provides the JSON-RPC transport to the single upstream backend, the
//! tri-state connection health monitor layered over it, and the retry policy
//! applied to read-only tool calls.

pub mod health;
pub mod retry;
pub mod transport;
