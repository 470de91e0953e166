//! CLI command handlers
//!
//! - serve: API server
//! - rag: questions and searches through the pipeline
//! - cache: semantic cache maintenance
//! - info: health and configuration display

pub mod cache;
pub mod info;
pub mod rag;
pub mod serve;

pub use cache::*;
pub use info::*;
pub use rag::*;
pub use serve::*;
