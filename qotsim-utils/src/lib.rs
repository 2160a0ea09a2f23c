//! Utility library for the qotsim project: persisted monitor artifacts and serde helpers.

pub mod other;
pub mod records;
pub mod serde;
