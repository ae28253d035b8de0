//! Bookkeeping directories under the root.

use std::ffi::OsStr;

pub const JOURNAL_DIR_NAME: &str = ".journal";
pub const JOURNAL_FILE_NAME: &str = "fs.log";
pub const VERSIONS_DIR_NAME: &str = ".versions";
pub const ATTRIBUTES_DIR_NAME: &str = ".attributes";

pub const RESERVED_NAMES: [&str; 3] = [JOURNAL_DIR_NAME, VERSIONS_DIR_NAME, ATTRIBUTES_DIR_NAME];

pub fn is_reserved_name(name: &OsStr) -> bool {
    RESERVED_NAMES.iter().any(|r| name == OsStr::new(r))
}
