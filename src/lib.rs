//! Subforged - subtitle extraction service
//!
//! This library crate exposes the job orchestration core and its HTTP
//! transport for the binary and for integration testing.

pub mod config;
pub mod conversion;
pub mod engine;
pub mod server;
pub mod state;
pub mod storage;
