//! Core value model shared by every layer.
//!
//! # Responsibility
//! - Define object identity, scalar values and lifecycle states.
//!
//! # Invariants
//! - Every domain object is identified by a stable `ObjectId`.
//! - Handles never own transaction state.

pub mod domain_object;
pub mod object_id;
pub mod property_values;
pub mod state;
pub mod value;
