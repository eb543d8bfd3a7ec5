//! # Compliance Harness Core
//!
//! Runtime-free logic for Compliance Harness: vector math, the static
//! corpus index and its snapshot codec, semantic chunking, data models,
//! and the [`Embedder`](service::Embedder) / [`Generator`](service::Generator)
//! call contracts.
//!
//! This crate contains no tokio, network, or filesystem I/O. The
//! application crate supplies concrete service clients, persists
//! snapshots, and schedules the per-chunk analysis pipeline.

pub mod chunk;
pub mod corpus;
pub mod error;
pub mod models;
pub mod service;
pub mod snapshot;
pub mod vector;

pub use error::{Error, Result};
