//! Shared utilities.
//!
//! Content hashing, path helpers and test helpers.

pub mod hash;
pub mod paths;

#[cfg(test)]
pub mod testutil;
