//! Folio - question answering over a single document
//!
//! A local daemon holds one ingested document. Each question runs a bounded
//! generation loop in which a language model may call a hybrid retrieval
//! tool (BM25 and vector search merged by reciprocal rank fusion) before it
//! answers. Loop activity is streamed to the client as NDJSON events.

pub mod agent;
pub mod answer;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod retrieval;
pub mod store;
pub mod stream;

pub use error::{FolioError, Result};
