//! Test doubles for vessel: a scripted cluster, a submit strategy that
//! skips the artifact build, a recording console sink and fixtures.

mod cluster;
pub mod fixtures;
mod mock;

pub use cluster::{MockCluster, SubmissionRecord};
pub use mock::{MockSubmitStrategy, RecordingConsole};
