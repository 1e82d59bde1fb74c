//! # tc-av
//!
//! External encoder plumbing for the trimcast pipeline.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache the path to ffmpeg.
//! - **Admission control** ([`ConcurrencyGate`]) -- bound how many encoders run
//!   at once; waiters queue FIFO and slots release exactly once.
//! - **Invocation building** ([`encode`]) -- argument vectors for copy and
//!   precise trims, to a file or to stdout.
//! - **Supervision** ([`Transcoder`]) -- spawn the encoder, enforce its
//!   deadline and cancellation, capture stderr, and classify the outcome.

pub mod encode;
pub mod gate;
pub mod tools;
pub mod transcoder;

// ---- Re-exports for convenience ----

pub use encode::{EncodeJob, OutputTarget};
pub use gate::{ConcurrencyGate, GateSlot, GateStats};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
pub use transcoder::{EncodeReport, EncodeStream, Transcoder};
