//! Catalog storage, settings and persisted state

pub mod context;
pub mod layout;
pub mod repository;
pub mod settings;
