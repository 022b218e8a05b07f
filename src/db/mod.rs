//! Persisted crawler state: the HTTP response cache and user-named
//! crawl-state tables.

pub mod cache;
pub mod state;
