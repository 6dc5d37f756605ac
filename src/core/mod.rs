//! Core traits and dense interop.

pub mod traits;
pub mod wrappers;
