//! Pre/post operation hooks. A pre-hook error aborts the operation; a
//! post-hook error is reported after the mutation has happened.

pub mod builtin;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateDir,
    WriteFile,
    ReadFile,
    ListDir,
    DeleteFile,
    DeleteDir,
    CopyFile,
    MoveFile,
    SetAttribute,
    GetAttribute,
    ListAttributes,
    DeleteAttribute,
    CreateVersion,
    GetVersion,
    ListVersions,
    RestoreVersion,
    DeleteVersion,
}

impl Operation {
    pub const ALL: [Operation; 17] = [
        Operation::CreateDir,
        Operation::WriteFile,
        Operation::ReadFile,
        Operation::ListDir,
        Operation::DeleteFile,
        Operation::DeleteDir,
        Operation::CopyFile,
        Operation::MoveFile,
        Operation::SetAttribute,
        Operation::GetAttribute,
        Operation::ListAttributes,
        Operation::DeleteAttribute,
        Operation::CreateVersion,
        Operation::GetVersion,
        Operation::ListVersions,
        Operation::RestoreVersion,
        Operation::DeleteVersion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::CreateDir => "createDir",
            Operation::WriteFile => "writeFile",
            Operation::ReadFile => "readFile",
            Operation::ListDir => "listDir",
            Operation::DeleteFile => "deleteFile",
            Operation::DeleteDir => "deleteDir",
            Operation::CopyFile => "copyFile",
            Operation::MoveFile => "moveFile",
            Operation::SetAttribute => "setAttribute",
            Operation::GetAttribute => "getAttribute",
            Operation::ListAttributes => "listAttributes",
            Operation::DeleteAttribute => "deleteAttribute",
            Operation::CreateVersion => "createVersion",
            Operation::GetVersion => "getVersion",
            Operation::ListVersions => "listVersions",
            Operation::RestoreVersion => "restoreVersion",
            Operation::DeleteVersion => "deleteVersion",
        }
    }

    /// Whether the operation changes files, attributes or version history.
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Operation::ReadFile
                | Operation::ListDir
                | Operation::GetAttribute
                | Operation::ListAttributes
                | Operation::GetVersion
                | Operation::ListVersions
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Pre,
    Post,
}

pub type HookError = Box<dyn std::error::Error + Send + Sync>;
pub type HookResult = std::result::Result<(), HookError>;
pub type HookFn = Arc<dyn Fn(&mut HookContext<'_>) -> HookResult + Send + Sync>;

/// Box a closure as a shareable [`HookFn`].
pub fn hook_fn<F>(f: F) -> HookFn
where
    F: Fn(&mut HookContext<'_>) -> HookResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// What a hook sees of one operation invocation. The same context value is
/// passed to the pre and post phase, so `extensions` can carry state between
/// them.
pub struct HookContext<'a> {
    pub operation: Operation,
    /// Root-relative key of the primary path.
    pub path: String,
    pub abs_path: PathBuf,
    /// Destination of copy/move.
    pub dst_path: Option<String>,
    pub dst_abs_path: Option<PathBuf>,
    pub data: Option<&'a [u8]>,
    pub mode: Option<u32>,
    pub key: Option<String>,
    pub value: Option<String>,
    pub version_id: Option<String>,
    extensions: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl<'a> HookContext<'a> {
    pub fn new(operation: Operation, path: impl Into<String>, abs_path: impl Into<PathBuf>) -> Self {
        Self {
            operation,
            path: path.into(),
            abs_path: abs_path.into(),
            dst_path: None,
            dst_abs_path: None,
            data: None,
            mode: None,
            key: None,
            value: None,
            version_id: None,
            extensions: HashMap::new(),
        }
    }

    pub fn with_destination(mut self, path: impl Into<String>, abs_path: &Path) -> Self {
        self.dst_path = Some(path.into());
        self.dst_abs_path = Some(abs_path.to_path_buf());
        self
    }

    pub fn with_data(mut self, data: &'a [u8]) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_key(mut self, key: &str) -> Self {
        self.key = Some(key.to_string());
        self
    }

    pub fn with_value(mut self, value: &str) -> Self {
        self.value = Some(value.to_string());
        self
    }

    pub fn with_version(mut self, version_id: &str) -> Self {
        self.version_id = Some(version_id.to_string());
        self
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, key: &str, value: T) {
        self.extensions.insert(key.to_string(), Box::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.extensions.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn remove<T: Any + Send + Sync>(&mut self, key: &str) -> Option<T> {
        let boxed = self.extensions.remove(key)?;
        boxed.downcast::<T>().ok().map(|b| *b)
    }
}

/// Registered hooks. Registration takes the write lock; dispatch clones the
/// hook list under the read lock and runs it unlocked, so a running hook
/// never blocks registration or other operations.
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<HashMap<(Operation, Phase), Vec<HookFn>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, operation: Operation, phase: Phase, hook: F)
    where
        F: Fn(&mut HookContext<'_>) -> HookResult + Send + Sync + 'static,
    {
        self.register_shared(operation, phase, hook_fn(hook));
    }

    pub fn register_shared(&self, operation: Operation, phase: Phase, hook: HookFn) {
        self.hooks
            .write()
            .entry((operation, phase))
            .or_default()
            .push(hook);
    }

    /// Drop every hook for `(operation, phase)`.
    pub fn unregister(&self, operation: Operation, phase: Phase) {
        self.hooks.write().remove(&(operation, phase));
    }

    pub fn clear(&self) {
        self.hooks.write().clear();
    }

    pub fn count(&self, operation: Operation, phase: Phase) -> usize {
        self.hooks
            .read()
            .get(&(operation, phase))
            .map_or(0, Vec::len)
    }

    pub fn run(&self, phase: Phase, ctx: &mut HookContext<'_>) -> HookResult {
        let hooks = match self.hooks.read().get(&(ctx.operation, phase)) {
            Some(hooks) => hooks.clone(),
            None => return Ok(()),
        };
        for hook in hooks {
            hook(ctx)?;
        }
        Ok(())
    }
}
