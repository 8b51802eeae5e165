//! # palimpsest-core
//!
//! Core types, traits, and abstractions for the palimpsest reprocessing and
//! recovery engine.
//!
//! This crate provides the foundational data structures, the confidence-tier
//! classification policy, and the trait definitions that the other palimpsest
//! crates depend on.

pub mod classify;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use classify::{classify_confidence, classify_similarity};
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
pub use uuid_utils::new_v7;
