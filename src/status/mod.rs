//! Status reporting: the on-disk health snapshot read by other processes.
//!
//! A present file reflects the live connection state; an absent file means
//! the daemon is not running (or shut down cleanly).

pub mod reporter;
pub mod snapshot;

pub use reporter::{StatusFile, StatusReporter};
pub use snapshot::StatusSnapshot;
