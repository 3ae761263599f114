//! flowforge server.
//!
//! Hosts the HTTP trigger surface, the Postgres implementation of the
//! engine's storage traits and the configuration the `flowforge-server`
//! binary wires the engine, scheduler and run queue from.

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
