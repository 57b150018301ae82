#![forbid(unsafe_code)]

//! Palaver delivery-core server library.
//! Exposes internal modules for integration testing; the binary entry point
//! is in main.rs.

pub mod app;
pub mod config;
pub mod server;
pub mod util;
