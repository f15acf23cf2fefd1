//! Working-copy management: clone, branch, commit, push and commit diffs.

pub mod manager;
pub mod remote_url;

pub use manager::WorkingCopyManager;
pub use remote_url::parse_remote_url;
