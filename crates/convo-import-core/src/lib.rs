//! # convo-import core
//!
//! Runtime-free logic for importing chat history exports: format
//! detection, preview extraction, duplicate marking, selection modes,
//! the byte-bounded chunker, and the upload state machine.
//!
//! This crate contains no tokio, reqwest, or filesystem I/O. Every
//! collaborator with side effects (the import endpoints, the clock, the
//! polling timer) is injected by the caller, so the whole pipeline can be
//! driven deterministically from tests.

pub mod chunk;
pub mod dedup;
pub mod error;
pub mod models;
pub mod parser;
pub mod progress;
pub mod selection;
pub mod transport;
pub mod upload;
