//! Core types and trait definitions for the acctrail change-history pipeline.
//!
//! This crate is deliberately free of network and database dependencies.
//! The stream, ingest, and storage crates all depend on it.

// Native `async fn` / `impl Future` in traits; `Send` bounds are spelled out
// on the returned futures where they matter.
#![allow(async_fn_in_trait)]

pub mod address;
pub mod digest;
pub mod error;
pub mod history;
pub mod store;
pub mod update;

pub use error::{Error, Result};
