//! Data models

pub mod application;
pub mod execution;
pub mod template;
