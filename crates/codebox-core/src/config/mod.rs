//! Configuration for the dispatch engine.
//!
//! Configuration is read from YAML, then overridden from the environment and
//! validated. Every field has a default, so an empty document is valid.

pub mod loader;
pub mod types;

pub use loader::*;
pub use types::*;
