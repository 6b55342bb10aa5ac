//! Core primitives.
//!
//! Math and randomness shared by every sync component. Nothing in here
//! knows about peers or transports.

pub mod vec2;
pub mod smoothing;
pub mod rng;

// Re-export core types
pub use vec2::Vec2;
pub use rng::SeededRng;
