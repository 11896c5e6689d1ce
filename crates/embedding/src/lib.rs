//! Embedding crate
//!
//! Token lookup tables with a tied read-out head, and learned absolute
//! positional embeddings.

pub mod positional;
pub mod token;

pub use positional::*;
pub use token::*;
