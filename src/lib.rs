//! A sandboxed filesystem rooted at one host directory, with a write-ahead
//! journal, per-path locking, file versions, attributes and operation hooks.

pub mod config;
pub mod error;
pub mod fs;
pub mod hooks;
pub mod state;
pub mod storage;

pub use config::Options;
pub use error::{Result, VaultError};
pub use fs::{FileInfo, VaultFs, DEFAULT_FILE_MODE};
pub use hooks::{HookContext, Operation, Phase};
pub use state::explicit_locks::{LockInfo, LockKind};
pub use storage::attributes::AttributeMap;
pub use storage::journal::RecoveryReport;
pub use storage::versions::VersionRecord;
