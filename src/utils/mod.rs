//! Shared utilities

pub mod error;
pub mod time;

pub use error::{AppError, AppResult};
pub use time::MediaTime;
