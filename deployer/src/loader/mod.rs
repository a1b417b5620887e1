//! Application and template loading

pub mod application;
pub mod template;
pub mod validation;
