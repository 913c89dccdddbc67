// Vigil daemon library
// Exposes internal modules for integration testing

#[macro_use]
extern crate log;

pub mod config;
pub mod core;
pub mod healthcheck;
pub mod notify;
pub mod rpc;
