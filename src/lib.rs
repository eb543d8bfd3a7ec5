//! # Compliance Harness
//!
//! Retrieval-augmented compliance review. A document is split into
//! semantically coherent chunks; each chunk is embedded, matched against a
//! static corpus of reference passages, and sent with the best matches to a
//! language model that reports compliance findings.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌────────────────────────────────┐
//! │ Extract  │──▶│  Chunk   │──▶│ Analyze (≤ N chunks in flight) │
//! │ PDF/DOCX │   │ semantic │   │ embed → search → generate      │
//! └──────────┘   └──────────┘   └───────────────┬────────────────┘
//!                                               │ ordered results
//!                                  ┌────────────┴───────────┐
//!                                  ▼                        ▼
//!                             ┌──────────┐            ┌──────────┐
//!                             │   CLI    │            │   HTTP   │
//!                             │  (chk)   │            │  (axum)  │
//!                             └──────────┘            └──────────┘
//! ```
//!
//! Runtime-free logic (vector math, the corpus index and snapshot codec,
//! the chunker, the service traits) lives in `compliance-harness-core`; this
//! crate supplies configuration, HTTP clients, persistence, scheduling and
//! the two front ends.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`remote`] | Shared HTTP client and retry policy |
//! | [`embedding`] | Embedding service clients |
//! | [`generation`] | Generation service clients and prompts |
//! | [`corpus`] | Corpus records and snapshot persistence |
//! | [`extract`] | PDF / DOCX / TXT text extraction |
//! | [`analysis`] | Analysis context and concurrent orchestrator |
//! | [`progress`] | CLI progress reporting |
//! | [`server`] | HTTP server |

pub mod analysis;
pub mod analyze_cmd;
pub mod config;
pub mod corpus;
pub mod corpus_cmd;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod progress;
pub mod remote;
pub mod server;
