//! # Course Assistant
//!
//! Retrieval-augmented question answering over a question/answer corpus.
//!
//! A CSV corpus is loaded into a full-text index (embedded SQLite FTS5 or an
//! Elasticsearch cluster). Each question retrieves the best-matching answers,
//! which are rendered into a fixed prompt and handed to a text-generation
//! runtime. Answers come back with retrieval diagnostics, and can be saved
//! and rated.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌──────────────────┐
//! │  Corpus  │──▶│ Index Manager │──▶│  SearchBackend   │
//! │  (CSV)   │   │ state + locks │   │ SQLite / Elastic │
//! └──────────┘   └───────────────┘   └────────┬─────────┘
//!                                             │
//!   question ──▶ Retriever ──▶ Prompt ──▶ Generator ──▶ answer
//!                                             │
//!                      ┌──────────────────────┤
//!                      ▼                      ▼
//!                 ┌──────────┐          ┌──────────┐
//!                 │   CLI    │          │   HTTP   │
//!                 │ (assist) │          │  (axum)  │
//!                 └──────────┘          └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! assist init                          # create database
//! assist index                         # build the index from the corpus
//! assist search "what is overfitting"  # inspect retrieval
//! assist ask "what is overfitting"     # retrieve + generate
//! assist serve                         # start HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Pipeline error taxonomy |
//! | [`models`] | Core data types |
//! | [`corpus`] | CSV corpus loader |
//! | [`index`] | Index lifecycle, rebuild locking, fingerprints |
//! | [`backend`] | Search backend trait, SQLite FTS5 and Elasticsearch |
//! | [`retrieve`] | Ranked multi-field retrieval |
//! | [`prompt`] | Prompt template |
//! | [`generate`] | Generator trait and providers |
//! | [`pipeline`] | Question answering orchestration |
//! | [`history`] | Conversation and feedback store |
//! | [`server`] | HTTP API |
//! | [`progress`] | Rebuild progress reporting |
//! | [`logging`] | Tracing subscriber setup |
//! | [`db`] | Database connection |

pub mod ask;
pub mod backend;
pub mod config;
pub mod corpus;
pub mod db;
pub mod error;
pub mod generate;
pub mod history;
pub mod index;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod prompt;
pub mod retrieve;
pub mod search;
pub mod server;
pub mod stats;
