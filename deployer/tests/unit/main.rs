//! Integration tests of the deployer library

mod support;
mod test_cache;
mod test_fsm;
mod test_loader;
mod test_repository;
mod test_transport;
