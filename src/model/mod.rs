//! # Property Graph Model
//!
//! DTOs that define the property graph. These types cross every boundary:
//! storage ↔ interpreter ↔ SQL generator ↔ user.
//!
//! This module is pure data — no I/O, no state.

pub mod node;
pub mod relationship;
pub mod value;
pub mod property_map;

pub use node::{Node, NodeId};
pub use relationship::{Relationship, RelId, Direction};
pub use value::Value;
pub use property_map::PropertyMap;
