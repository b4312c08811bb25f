//! Model consumers: deterministic, read-only walks over a bound tree or
//! rule-set document (spec.md §4.7, §4.8).

pub mod ruleset;
pub mod tree;
