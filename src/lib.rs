//! # convo-import
//!
//! Imports chat history exported from ChatGPT, Claude, or LibreChat itself
//! into a LibreChat-compatible conversation server.
//!
//! The runtime-free pipeline (format detection, previews, duplicate
//! marking, selection, chunking, and the upload state machine) lives in
//! [`convo_import_core`]. This crate adds the native pieces around it: the
//! reqwest transport, the conversation cache, the tokio timer, the async
//! orchestrator, and the `convo` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌───────────┐   ┌──────────────┐
//! │  export  │──▶│ parse + dedup│──▶│ selection │──▶│ orchestrator │──▶ server
//! │  .json   │   │    (core)    │   │   (core)  │   │ chunk / poll │
//! └──────────┘   └──────────────┘   └───────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! convo inspect conversations.json --offline
//! convo import conversations.json --mode batch --start 1 --end 500
//! convo import conversations.json --mode selective --search "rust" --select-all-visible
//! convo split conversations.json --out-dir ./chunks
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | tracing subscriber setup |
//! | [`http_transport`] | reqwest implementation of the transport trait |
//! | [`cache`] | Conversation id cache with idempotent invalidation |
//! | [`timer`] | Scheduler / ticker capability |
//! | [`orchestrator`] | Async upload driver |
//! | [`progress`] | Progress reporters |
//! | [`input`] | Reading `.json` export files |
//! | [`inspect`] | `convo inspect` |
//! | [`import_cmd`] | `convo import` |
//! | [`split_cmd`] | `convo split` |

pub mod cache;
pub mod config;
pub mod http_transport;
pub mod import_cmd;
pub mod input;
pub mod inspect;
pub mod logging;
pub mod orchestrator;
pub mod progress;
pub mod split_cmd;
pub mod timer;
