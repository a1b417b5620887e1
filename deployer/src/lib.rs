//! OCI LXC Deployer Library
//!
//! Resolves inheritable application templates into command lists and runs
//! them on Proxmox VE hosts and their LXC containers.

pub mod cache;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod loader;
pub mod logs;
pub mod models;
pub mod storage;
pub mod utils;
