//! Canonical path derivation

mod generator;

pub use generator::{derive_docket_id, PathGenerator, PathKey, UNKNOWN};
