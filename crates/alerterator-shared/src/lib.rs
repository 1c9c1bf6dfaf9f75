//! This crate contains YAML helpers shared by the alerterator crates.

pub mod crd;
pub mod yaml;
