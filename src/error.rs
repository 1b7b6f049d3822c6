//! Definition of errors.

use std::error;
use std::fmt;
use std::result;

/// Errors reported by `HazardDomain` and `LockFreeStack`.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Error {
    /// Every hazard slot of the domain is claimed by a live thread
    ResourceExhausted {
        /// Capacity of the slot table that ran out
        max_slots: usize,
    },
    /// A configuration value is out of range
    InvalidConfig(&'static str),
}

/// Result alias used across the crate.
pub type Result<T> = result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::ResourceExhausted { max_slots } => write!(
                f,
                "hazard slots exhausted, all {} slots are claimed by live threads",
                max_slots
            ),
            Error::InvalidConfig(what) => write!(f, "invalid config: {}", what),
        }
    }
}

impl error::Error for Error {}
