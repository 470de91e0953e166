pub mod admission;
pub mod api;
pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod embeddings;
pub mod errors;
pub mod index;
pub mod llm;
pub mod logging;
pub mod models;
pub mod rag;

#[cfg(test)]
mod errors_tests;

pub use config::AppConfig;
pub use errors::*;
