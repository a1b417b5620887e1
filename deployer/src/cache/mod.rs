//! In-memory caches

pub mod documents;
