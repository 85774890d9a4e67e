//! Data models for containers and access policies.

mod container;

pub use container::*;
