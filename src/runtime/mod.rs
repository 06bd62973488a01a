//! # Runtime Module
//!
//! Process plumbing around the controllers: initialization, leader election,
//! the watch loop and the shared error policy.

pub mod error_policy;
pub mod initialization;
pub mod leader_election;
pub mod watch_loop;

pub use initialization::{initialize, InitializationResult};
pub use watch_loop::run_watch_loop;
