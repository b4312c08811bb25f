//! Model producers: code that builds a `TreeModelBody` rather than merely
//! walking one (spec.md §4.9, §4.10).

pub mod batch;
pub mod worlds;
