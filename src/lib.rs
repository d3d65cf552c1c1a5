pub mod ai_utils;
pub mod api;
pub mod book;
pub mod config;
pub mod error;
pub mod ingest;
pub mod processor;
pub mod runtime;
pub mod theme;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;
