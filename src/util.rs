//! Utility functions

use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::OsRng;

use crate::errors::{Error, Result};

/// Generate a new request ID
pub fn generate_request_id() -> String {
    format!("auth-{}", uuid::Uuid::new_v4())
}

/// Generate a random alphanumeric identifier of `len` characters
///
/// Characters are drawn uniformly from `[a-zA-Z0-9]` using the operating
/// system's CSPRNG.
pub fn generate_id(len: usize) -> Result<String> {
    if len == 0 {
        return Err(Error::Other("length must be greater than 0".to_string()));
    }
    Ok(Alphanumeric.sample_string(&mut OsRng, len))
}
