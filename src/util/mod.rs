//! Internal utilities.
//!
//! Intentionally minimal: a generational arena for the transaction
//! registry and an entropy capability for identifier generation.

pub mod arena;
pub mod entropy;

pub use arena::{Arena, ArenaIndex};
pub use entropy::{EntropySource, OsEntropy, SeededEntropy};
