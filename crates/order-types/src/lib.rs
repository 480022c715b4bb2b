//! Common types for the order lifecycle service.
//!
//! This crate defines the data types shared by every other crate in the
//! workspace: the order record, its lifecycle states and events, storage
//! namespaces and the registry trait used by pluggable backends.

/// Lifecycle events published to in-process observers.
pub mod events;
/// Order record, identifiers, states and events.
pub mod order;
/// Registry trait for pluggable implementations.
pub mod registry;
/// Storage namespaces.
pub mod storage;

pub use events::*;
pub use order::*;
pub use registry::ImplementationRegistry;
pub use storage::*;
