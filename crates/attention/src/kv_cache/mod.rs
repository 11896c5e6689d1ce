//! Interfaces and helpers for key/value cache management.
//!
//! Attention implementations use these types to persist projected keys and
//! values across incremental decoding steps, so each step only projects the
//! newest positions.

pub mod api;
pub mod state;

pub use api::KeyValueCache;
pub use state::AttentionState;
