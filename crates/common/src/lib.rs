//! Shared error plumbing and small utilities used across all hermod crates.

pub mod error;
pub mod time;

pub use {
    error::{Error, FromMessage, Result},
    time::unix_now,
};
