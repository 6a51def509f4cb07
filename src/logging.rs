use std::path::Path;
use tracing_appender::rolling::RollingFileAppender;
use tracing_core::{Level, LevelFilter};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{registry, Layer};

use crate::error::{Error, Result};

/// If a global tracing subscriber is not already configured, log to stdout and optionally to a
/// file, and add our custom panic hook.
///
/// Records emitted through the `log` facade are forwarded to the subscriber. Fails when
/// `log_file` does not name a file.
pub fn install_logger(log_file: Option<&Path>, verbose: bool) -> Result<()> {
    let writer = log_file.map(file_writer).transpose()?;

    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let stdout = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(level)
        .with_filter(filter_fn(skip_noisy_modules));

    let file = writer.map(|writer| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(LevelFilter::DEBUG)
            .with_filter(filter_fn(skip_noisy_modules))
    });

    if registry().with(stdout).with(file).try_init().is_ok() {
        if let Some(path) = log_file {
            update_panic_hook(path);
        }
    }

    Ok(())
}

fn file_writer(path: &Path) -> Result<RollingFileAppender> {
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::Config(format!("log file '{}' is not a file path", path.display())))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    Ok(tracing_appender::rolling::never(dir, file_name))
}

fn skip_noisy_modules(metadata: &tracing_core::Metadata<'_>) -> bool {
    if let Some(path) = metadata.module_path() {
        // The wgpu crate is logging too much, so we skip `info` level.
        if path.starts_with("wgpu") && *metadata.level() >= Level::INFO {
            return false;
        }
    }
    true
}

fn update_panic_hook(file_path: &Path) {
    let hook = std::panic::take_hook();
    let file_path = file_path.display().to_string();

    std::panic::set_hook(Box::new(move |info| {
        log::error!("PANIC => {}", info);
        eprintln!(
            "=== PANIC ===\nA fatal error happened, you can check the experiment logs here => \
             '{file_path}'\n============="
        );
        hook(info);
    }));
}
