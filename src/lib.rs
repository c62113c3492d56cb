pub mod cli;
pub mod config;
pub mod error;
pub mod fetch;
pub mod index;
pub mod manager;
pub mod records;
pub mod schedule;
pub mod updates;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use error::{AppError, Result};
