//! Installs the global `tracing` subscriber.

use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, anyhow};
use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::{NonBlocking, NonBlockingBuilder, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::config::{LogConfig, LogRotation};

/// Install a formatting subscriber for `cfg`.
///
/// When logging is disabled nothing is installed and every `tracing` macro
/// becomes a no-op. In asynchronous mode lines go through a bounded queue to
/// a writer thread; the returned guard flushes that queue when dropped and
/// must be held until the program exits.
pub fn init(cfg: &LogConfig) -> anyhow::Result<Option<WorkerGuard>> {
    if !cfg.enabled {
        return Ok(None);
    }
    let level = parse_level(&cfg.level)?;
    let (writer, guard) = make_writer(cfg)?;

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_max_level(level)
        .with_ansi(cfg.file.is_none())
        .with_writer(writer)
        .try_init()
        .map_err(|e| anyhow!("failed to install log subscriber: {}", e))?;
    Ok(guard)
}

/// Destination for formatted lines: stdout or a rolling file, either written
/// in place or through the background writer.
fn make_writer(cfg: &LogConfig) -> anyhow::Result<(BoxMakeWriter, Option<WorkerGuard>)> {
    match (&cfg.file, cfg.asynchronous) {
        (Some(path), true) => {
            let (writer, guard) = non_blocking(cfg, file_appender(path, cfg.rotation)?);
            Ok((BoxMakeWriter::new(writer), Some(guard)))
        }
        (Some(path), false) => Ok((BoxMakeWriter::new(file_appender(path, cfg.rotation)?), None)),
        (None, true) => {
            let (writer, guard) = non_blocking(cfg, io::stdout());
            Ok((BoxMakeWriter::new(writer), Some(guard)))
        }
        (None, false) => Ok((BoxMakeWriter::new(io::stdout), None)),
    }
}

// lossy: a full queue drops lines rather than stalling the event loop
fn non_blocking<W>(cfg: &LogConfig, writer: W) -> (NonBlocking, WorkerGuard)
where
    W: Write + Send + 'static,
{
    NonBlockingBuilder::default()
        .buffered_lines_limit(cfg.queue_capacity)
        .lossy(true)
        .thread_name("lantern-log")
        .finish(writer)
}

fn file_appender(path: &Path, rotation: LogRotation) -> anyhow::Result<RollingFileAppender> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let name = path
        .file_name()
        .with_context(|| format!("log file {} has no file name", path.display()))?;

    RollingFileAppender::builder()
        .rotation(rotation.into())
        .filename_prefix(name.to_string_lossy())
        .build(dir)
        .with_context(|| format!("failed to open log file {}", path.display()))
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Never => Rotation::NEVER,
            LogRotation::Minutely => Rotation::MINUTELY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
        }
    }
}

pub fn parse_level(level: &str) -> anyhow::Result<Level> {
    level
        .trim()
        .parse()
        .map_err(|_| anyhow!("invalid log level {:?}", level))
}

/// Whether events at `level` currently reach a subscriber.
pub fn is_enabled(level: Level) -> bool {
    level <= LevelFilter::current()
}
