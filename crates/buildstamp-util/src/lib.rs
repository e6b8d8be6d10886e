//! Miscellaneous filesystem support code used by buildstamp.

pub use atomic::{AtomicFile, write_atomic};
pub use digest::ContentDigest;

mod atomic;
mod digest;
pub mod paths;
