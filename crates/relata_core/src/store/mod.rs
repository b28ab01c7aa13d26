//! Per-transaction object data store.
//!
//! # Responsibility
//! - Hold the current and original values of every object a transaction knows.
//! - Derive the container part of an object's public state.
//!
//! # Invariants
//! - A container is `Changed` iff its current values differ from the originals.
//! - Touched flags never influence state.

mod data_container;

pub use data_container::{ContainerLifecycle, DataContainer};
