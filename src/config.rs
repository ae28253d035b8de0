use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Facade configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Record every mutation in `.journal/fs.log` before applying it.
    pub enable_journaling: bool,
    /// Snapshot prior content into `.versions/` on overwrite and delete.
    pub enable_versioning: bool,
    /// Versions retained per path; 0 keeps everything.
    pub max_versions: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            enable_journaling: true,
            enable_versioning: false,
            max_versions: 10,
        }
    }
}

impl Options {
    pub fn from_json(text: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "vaultfs",
    about = "Sandboxed filesystem with journaling, versioning and hooks"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Root directory for the filesystem
    #[arg(long, global = true, default_value = "./data")]
    pub root: PathBuf,

    /// Enable file versioning
    #[arg(long, global = true)]
    pub versioning: bool,

    /// Disable journaling
    #[arg(long, global = true)]
    pub no_journal: bool,

    /// Maximum number of versions to keep per file (0 = unlimited)
    #[arg(long, global = true, default_value_t = 10)]
    pub max_versions: usize,

    /// Debug-level logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Reject every mutating operation
    #[arg(long, global = true)]
    pub read_only: bool,

    /// Append one line per operation to this file
    #[arg(long, global = true)]
    pub audit_log: Option<PathBuf>,
}

impl GlobalArgs {
    pub fn options(&self) -> Options {
        Options {
            enable_journaling: !self.no_journal,
            enable_versioning: self.versioning,
            max_versions: self.max_versions,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List directory contents
    #[command(alias = "list")]
    Ls {
        #[arg(default_value = ".")]
        path: String,
    },
    /// Print file contents
    #[command(alias = "cat")]
    Read { path: String },
    /// Write content to a file
    Write {
        path: String,
        content: String,
        /// Octal permission bits
        #[arg(long, default_value = "644")]
        mode: String,
    },
    /// Create a directory
    Mkdir { path: String },
    /// Delete a file, or a directory with -r
    #[command(alias = "delete")]
    Rm {
        path: String,
        #[arg(short, long)]
        recursive: bool,
    },
    /// Copy a file
    #[command(alias = "copy")]
    Cp { src: String, dst: String },
    /// Move a file
    #[command(alias = "move")]
    Mv { src: String, dst: String },
    /// Show file information
    Stat { path: String },
    /// Show path resolution details
    Info { path: String },
    /// Manage file attributes
    #[command(alias = "attributes")]
    Attr {
        #[command(subcommand)]
        action: AttrCommand,
    },
    /// Manage file versions
    #[command(alias = "versions")]
    Version {
        #[command(subcommand)]
        action: VersionCommand,
    },
    /// Replay the journal after a crash
    Recover,
    /// Journal maintenance
    Journal {
        #[command(subcommand)]
        action: JournalCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum AttrCommand {
    Set { path: String, key: String, value: String },
    Get { path: String, key: String },
    List { path: String },
    Delete { path: String, key: String },
}

#[derive(Subcommand, Debug)]
pub enum VersionCommand {
    List { path: String },
    Get { path: String, version_id: String },
    Create {
        path: String,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    Restore { path: String, version_id: String },
    Describe {
        path: String,
        version_id: String,
        description: String,
    },
    Delete { path: String, version_id: String },
}

#[derive(Subcommand, Debug)]
pub enum JournalCommand {
    Rotate,
    Truncate,
}
