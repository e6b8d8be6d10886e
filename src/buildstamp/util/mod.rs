pub use self::errors::{BuildstampResult, ConfigurationError, InvalidPathError, MissingInputError};
pub use self::hasher::StableHasher;
pub use self::hex::{hash_u64, to_hex};

pub mod errors;
mod hasher;
mod hex;
