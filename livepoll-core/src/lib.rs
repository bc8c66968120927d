pub mod models;
pub mod repository;
pub mod service;
pub mod config;
pub mod error;
pub mod logging;
pub mod bootstrap;

pub use config::Config;
pub use error::{Error, Result};
