//! secretsweep — hard-coded secret scanner (library crate).
//!
//! Re-exports public modules for integration tests and external use.

pub mod classify;
pub mod client;
pub mod config;
pub mod constants;
pub mod diff;
pub mod download;
pub mod env;
pub mod hook;
pub mod models;
pub mod output;
pub mod rules;
pub mod scanner;
pub mod similarity;
pub mod store;
