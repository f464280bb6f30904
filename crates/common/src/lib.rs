//! Shared types for the zoh workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
