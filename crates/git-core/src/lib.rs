//! Pure git plumbing: run `git`, read state, diff state into activities.
//!
//! This crate has no notion of projects, sessions, or sinks — it only knows
//! how to talk to one working tree and turn two snapshots of it into a list
//! of typed activities. The `observer-core` crate builds the watching and
//! routing layer on top of this.

pub mod activity;
pub mod executor;
pub mod state;
pub mod types;

pub use activity::{Activity, ActivityKind, BranchScope, FileChangeSummary, FileChangeType};
pub use executor::{ExecOutput, GitExecError, GitExecutor};
pub use state::{GitQueries, GitStateReader, UpstreamInfo};
pub use types::{CommitMeta, RepoState, clone_repo_state, validate_repo_state};
