pub mod config;
pub mod error;
pub mod identity;

pub use error::{Error, Result};
