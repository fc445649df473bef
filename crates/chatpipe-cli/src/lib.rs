//! `chatpipe` crate (library surface).
//!
//! The primary entrypoint for end users is the `chatpipe` binary. This library module
//! re-exports the core and local crates for embedding and hosts the local document
//! search HTTP server so it can be mounted (and tested) in-process.

pub use chatpipe_core as core;
pub use chatpipe_local as local;

pub mod docs_server;
