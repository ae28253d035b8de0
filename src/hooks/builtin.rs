//! Ready-made hooks.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;

use super::{hook_fn, HookFn, HookRegistry, Operation, Phase};

pub const TIMING_START: &str = "timing.start";
pub const TIMING_ELAPSED: &str = "timing.elapsed";

/// Register `hook` for each of `operations` in `phase`.
pub fn register_for(
    registry: &HookRegistry,
    operations: impl IntoIterator<Item = Operation>,
    phase: Phase,
    hook: &HookFn,
) {
    for op in operations {
        registry.register_shared(op, phase, Arc::clone(hook));
    }
}

/// Operations that change state.
pub fn mutating_operations() -> impl Iterator<Item = Operation> {
    Operation::ALL.into_iter().filter(Operation::is_mutation)
}

/// Appends `<rfc3339> <operation> <path>[ -> <dst>]` to `path` for every
/// operation it is registered on.
pub fn logging_hook(path: impl Into<PathBuf>) -> io::Result<HookFn> {
    let path = path.into();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let file: Mutex<File> = Mutex::new(OpenOptions::new().create(true).append(true).open(&path)?);

    Ok(hook_fn(move |ctx| {
        let mut line = format!("{} {} {}", Utc::now().to_rfc3339(), ctx.operation, ctx.path);
        if let Some(dst) = &ctx.dst_path {
            line.push_str(" -> ");
            line.push_str(dst);
        }
        line.push('\n');
        file.lock().write_all(line.as_bytes())?;
        Ok(())
    }))
}

/// Rejects every operation it is registered on. Register it on
/// [`mutating_operations`] to make a root read-only.
pub fn read_only_hook() -> HookFn {
    hook_fn(|ctx| Err(format!("filesystem is read-only ({})", ctx.operation).into()))
}

/// Before a write, delete, copy or move, copy the file about to be
/// overwritten or removed to `dir/<basename>.<timestamp>`. For copy and move
/// that is the destination. Missing files and directories are ignored.
pub fn backup_hook(dir: impl Into<PathBuf>) -> HookFn {
    let dir = dir.into();
    hook_fn(move |ctx| {
        let overwritten: &Path = match ctx.operation {
            Operation::WriteFile | Operation::DeleteFile => ctx.abs_path.as_path(),
            Operation::CopyFile | Operation::MoveFile => match &ctx.dst_abs_path {
                Some(dst) => dst.as_path(),
                None => return Ok(()),
            },
            _ => return Ok(()),
        };
        if !overwritten.is_file() {
            return Ok(());
        }
        let name = overwritten
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stamp = Utc::now().format("%Y%m%d-%H%M%S%.3f");
        std::fs::create_dir_all(&dir)?;
        let mut target = dir.join(format!("{}.{}", name, stamp));
        let mut n = 1;
        while target.exists() {
            target = dir.join(format!("{}.{}.{}", name, stamp, n));
            n += 1;
        }
        std::fs::copy(overwritten, &target)?;
        debug!("Backed up {} to {}", overwritten.display(), target.display());
        Ok(())
    })
}

/// Pre/post pair measuring an operation. The pre hook stores an `Instant`
/// under [`TIMING_START`]; the post hook stores the elapsed `Duration` under
/// [`TIMING_ELAPSED`] and logs it.
pub fn timing_hooks() -> (HookFn, HookFn) {
    let pre = hook_fn(|ctx| {
        ctx.insert(TIMING_START, Instant::now());
        Ok(())
    });
    let post = hook_fn(|ctx| {
        if let Some(start) = ctx.remove::<Instant>(TIMING_START) {
            let elapsed: Duration = start.elapsed();
            debug!("{} {} took {:?}", ctx.operation, ctx.path, elapsed);
            ctx.insert(TIMING_ELAPSED, elapsed);
        }
        Ok(())
    });
    (pre, post)
}
