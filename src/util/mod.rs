//! Utility modules: logging setup and configuration loading.

pub mod config;
pub mod logger;
