//! Object gateway backends.

pub mod memory;
pub mod s3;
