#![warn(missing_docs)]

//! Test fixtures for the dirrepl workspace.
//!
//! The centerpiece is [`SimulatedFleet`]: a set of in-memory directory
//! servers wired together so that the control plane can be exercised end to
//! end, online initialization included, without a network.

pub mod fleet;
pub mod logging;

pub use fleet::{root_spec, SimulatedFleet, ROOT_PASSWORD};
pub use logging::init_test_logging;
