//! Task registry — the single source of truth for task state.
//!
//! Workers write through it, the gateway reads through it, and nothing else
//! in the system holds mutable task state.

pub mod store;

pub use store::{ListFilter, RegistryError, TaskRegistry};
