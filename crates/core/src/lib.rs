//! Core types, errors, and key functions shared by the sluice crates.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod meta;
pub mod result;

pub use error::Error;
pub use meta::{
    KeyFunc, ObjectKey, ObjectMeta, meta_namespace_key, meta_namespace_key_func,
    split_meta_namespace_key,
};
pub use result::{Result, ResultExt};
