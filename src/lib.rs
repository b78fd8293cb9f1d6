//! SSO-1: attested market signal oracle function
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod feeds;
pub mod slot;
pub mod context;
pub mod scoring;
pub mod attestation;
pub mod submission;
pub mod pipeline;
