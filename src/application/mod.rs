//! Application layer - orchestration of the limiting protocol.
//!
//! This layer assembles script calls, owns the script cache and
//! interprets store answers:
//! - Rate limiter (the public surface)
//! - Script cache (digest execution with body fallback)
//! - Runtime error taxonomy
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer
//! independent from the concrete store client.

pub mod error;
pub mod limiter;
pub mod ports;
pub mod scripts;
