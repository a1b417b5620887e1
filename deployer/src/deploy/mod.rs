//! Execution engine: substitution, transports and the command loop

pub mod executor;
pub mod fsm;
pub mod host;
pub mod output;
pub mod process;
pub mod transport;
pub mod variables;
