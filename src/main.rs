use std::ffi::OsStr;
use std::io::Write;
use std::path::Path;

use clap::Parser;
use serde::Serialize;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use vaultfs::config::{AttrCommand, Cli, Command, GlobalArgs, JournalCommand, VersionCommand};
use vaultfs::hooks::builtin::{logging_hook, mutating_operations, read_only_hook, register_for};
use vaultfs::hooks::{Operation, Phase};
use vaultfs::{Result, VaultError, VaultFs};

/// Install the tracing subscriber: stderr always, plus a non-blocking file
/// layer when `--log-file` is given. The returned guard flushes the file
/// layer on drop and must live until exit.
fn init_logging(args: &GlobalArgs) -> Option<WorkerGuard> {
    let env_filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    let (file_layer, guard) = match &args.log_file {
        Some(log_file) => {
            let log_dir = log_file
                .parent()
                .filter(|d| !d.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let log_name = log_file
                .file_name()
                .unwrap_or_else(|| OsStr::new("vaultfs.log"));
            let file_appender = tracing_appender::rolling::never(log_dir, log_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(file_layer);
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("vaultfs: failed to set tracing subscriber: {}", e);
    }
    guard
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn write_stdout(data: &[u8]) -> Result<()> {
    let mut out = std::io::stdout().lock();
    out.write_all(data)
        .and_then(|_| out.flush())
        .map_err(|e| VaultError::io("<stdout>", e))
}

fn parse_mode(mode: &str) -> Result<u32> {
    u32::from_str_radix(mode, 8)
        .ok()
        .filter(|m| *m <= 0o7777)
        .ok_or_else(|| VaultError::Config(format!("invalid octal mode: {}", mode)))
}

fn open_fs(args: &GlobalArgs) -> Result<VaultFs> {
    let fs = VaultFs::open(&args.root, args.options())?;

    if args.read_only {
        register_for(fs.hooks(), mutating_operations(), Phase::Pre, &read_only_hook());
    }
    if let Some(audit_log) = &args.audit_log {
        let hook = logging_hook(audit_log).map_err(|e| VaultError::io(audit_log, e))?;
        register_for(fs.hooks(), Operation::ALL, Phase::Post, &hook);
    }
    Ok(fs)
}

fn run(cli: Cli) -> Result<()> {
    let fs = open_fs(&cli.global)?;
    info!("vaultfs root: {}", fs.root().display());

    match cli.command {
        Command::Ls { path } => {
            for entry in fs.list_dir(&path)? {
                println!(
                    "{:04o} {:>10} {} {}{}",
                    entry.mode,
                    entry.size,
                    entry.modified.format("%Y-%m-%d %H:%M:%S"),
                    entry.name,
                    if entry.is_dir { "/" } else { "" }
                );
            }
        }
        Command::Read { path } => write_stdout(&fs.read_file(&path)?)?,
        Command::Write {
            path,
            content,
            mode,
        } => fs.write_file_with_mode(&path, content.as_bytes(), parse_mode(&mode)?)?,
        Command::Mkdir { path } => fs.create_dir(&path)?,
        Command::Rm { path, recursive } => {
            if recursive {
                fs.delete_dir(&path)?
            } else {
                fs.delete_file(&path)?
            }
        }
        Command::Cp { src, dst } => fs.copy_file(&src, &dst)?,
        Command::Mv { src, dst } => fs.move_file(&src, &dst)?,
        Command::Stat { path } => print_json(&fs.stat(&path)?)?,
        Command::Info { path } => print_json(&fs.path_info(&path)?)?,
        Command::Attr { action } => match action {
            AttrCommand::Set { path, key, value } => fs.set_attribute(&path, &key, &value)?,
            AttrCommand::Get { path, key } => println!("{}", fs.get_attribute(&path, &key)?),
            AttrCommand::List { path } => {
                for (key, value) in fs.list_attributes(&path)? {
                    println!("{}={}", key, value);
                }
            }
            AttrCommand::Delete { path, key } => fs.delete_attribute(&path, &key)?,
        },
        Command::Version { action } => match action {
            VersionCommand::List { path } => print_json(&fs.list_versions(&path)?)?,
            VersionCommand::Get { path, version_id } => {
                let (data, _) = fs.get_version(&path, &version_id)?;
                write_stdout(&data)?
            }
            VersionCommand::Create { path, description } => {
                println!("{}", fs.create_version(&path, &description)?.version_id)
            }
            VersionCommand::Restore { path, version_id } => {
                fs.restore_version(&path, &version_id)?
            }
            VersionCommand::Describe {
                path,
                version_id,
                description,
            } => print_json(&fs.set_version_description(&path, &version_id, &description)?)?,
            VersionCommand::Delete { path, version_id } => {
                fs.delete_version(&path, &version_id)?
            }
        },
        Command::Recover => print_json(&fs.recover()?)?,
        Command::Journal { action } => match action {
            JournalCommand::Rotate => println!("{}", fs.rotate_journal()?.display()),
            JournalCommand::Truncate => fs.truncate_journal()?,
        },
    }

    fs.close()
}

fn main() {
    let cli = Cli::parse();
    let guard = init_logging(&cli.global);

    if let Err(e) = run(cli) {
        eprintln!("vaultfs: {}", e);
        drop(guard);
        std::process::exit(1);
    }
}
