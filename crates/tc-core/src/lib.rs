//! tc-core: shared types, IDs, errors, configuration, and time-range handling.
//!
//! This crate is the foundational dependency for the other tc-* crates,
//! providing type-safe identifiers, a unified error type that maps onto HTTP
//! statuses, application configuration, the time-range normalizer that picks
//! between copy and precise trims, and small media-domain types.

pub mod config;
pub mod error;
pub mod ids;
pub mod media;
pub mod time_range;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::*;
pub use media::*;
pub use time_range::{NormalizedRange, RangeSpec, TimeRange, TrimMode};
