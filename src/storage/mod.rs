//! On-disk state kept under the reserved directories of the root.

pub mod attributes;
pub mod journal;
pub mod versions;
