#![deny(dead_code)]
#![deny(unused_variables)]

pub mod chunker;
pub mod config;
pub mod error;
pub mod loader;
pub mod metrics;
pub mod models;
pub mod tokens;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
