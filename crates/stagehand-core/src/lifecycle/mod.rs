//! # Lifecycle Module
//!
//! Stage enumeration, transition table and expiration markers.
//!
//! The stage model is pure data: it never touches a registry or an engine.
//! Registries consult it to validate a transition before committing it.

mod stage;

pub use stage::*;
