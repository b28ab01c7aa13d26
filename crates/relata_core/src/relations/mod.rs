//! Relation end points.
//!
//! # Responsibility
//! - Identify both sides of a relation by `(object, property)`.
//! - Store the virtual (non-foreign-key) sides; real sides are views over
//!   the owning data container.
//! - Describe synchronized modifications as a list of end-point steps.
//!
//! # Invariants
//! - End points store object ids only, never handles or containers.
//! - An incomplete collection end point carries no local modifications.

mod end_point;
mod modification;

pub use end_point::{RelationEndPoint, RelationEndPointId};
pub(crate) use end_point::{VirtualCollectionEndPoint, VirtualEndPoint, VirtualObjectEndPoint};
pub(crate) use modification::EndPointStep;
