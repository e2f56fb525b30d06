//! Shared types for roadwise

pub mod error;

pub use error::{AppError, Result};
