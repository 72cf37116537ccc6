// src/utils/mod.rs
pub mod error;
pub mod logging;

pub use error::{AppError, ExtractError, SourceError, StorageError};
