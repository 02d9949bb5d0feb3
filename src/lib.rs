//! # kb-sync
//!
//! Keeps the vector-store knowledge base behind a QA assistant in step with a
//! local tree of markdown documents, pushing only the documents whose
//! content changed since the last pass.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  walk        │──▶│  sync        │──▶│  RemoteStore │
//! │  .md files   │   │  fingerprint │   │  OpenAI /    │
//! │  key + hash  │   │  compare     │   │  in-memory   │
//! └──────────────┘   └──────┬───────┘   └──────────────┘
//!                           │ rate limited?
//!                           ▼
//!                    ┌──────────────┐
//!                    │  backoff     │
//!                    └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export OPENAI_API_KEY=sk-...
//! kbsync scan                 # list keys and fingerprints, no network
//! kbsync sync --baseline      # treat local content as already uploaded
//! kbsync sync                 # push everything that differs
//! kbsync watch                # sync every [sync].interval_secs
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`fingerprint`] | Content digests |
//! | [`paths`] | Document keys |
//! | [`backoff`] | Exponential backoff policy |
//! | [`error`] | Remote and sync error types |
//! | [`store`] | Remote store trait and in-memory store |
//! | [`openai`] | OpenAI vector store gateway |
//! | [`walk`] | Markdown discovery |
//! | [`sync`] | Sync engine |

pub mod backoff;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod models;
pub mod openai;
pub mod paths;
pub mod store;
pub mod sync;
pub mod walk;
