//! Receipt batch extraction
//!
//! Queues receipt images, extracts structured fields from them through a
//! pluggable AI backend in bounded concurrent slices, and stores the
//! validated records in a local SQLite document store.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
