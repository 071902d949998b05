use crate::domain::settings::LogSettings;
use std::str::FromStr;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub struct LoggingGuard {
    // Keeps the file writer alive so buffered lines are flushed on exit
    _guards: Vec<WorkerGuard>,
}

/// `RUST_LOG` wins over the configured level; an unparsable level falls back
/// to `info`.
fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::from_str(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn parse_rotation(rotation: &str) -> Rotation {
    match rotation.to_lowercase().as_str() {
        "hourly" => Rotation::HOURLY,
        "minutely" => Rotation::MINUTELY,
        "never" => Rotation::NEVER,
        _ => Rotation::DAILY,
    }
}

fn file_appender(settings: &LogSettings) -> anyhow::Result<RollingFileAppender> {
    let appender = RollingFileAppender::builder()
        .rotation(parse_rotation(&settings.rotation))
        .filename_prefix(&settings.file_name_prefix)
        .filename_suffix("log")
        .build(&settings.log_dir)?;
    Ok(appender)
}

pub fn init_logger(settings: &LogSettings) -> anyhow::Result<LoggingGuard> {
    let mut guards = Vec::new();

    let level_filter = build_filter(&settings.level);

    let console_layer = settings.console_logging_enabled.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_file(settings.show_file_line)
            .with_line_number(settings.show_file_line)
            .with_thread_ids(settings.show_thread_ids)
            .with_target(settings.show_target)
            .with_ansi(settings.ansi_colors)
    });

    let file_layer = if settings.file_logging_enabled {
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender(settings)?);
        guards.push(guard);
        Some(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_file(settings.show_file_line)
                .with_line_number(settings.show_file_line)
                .with_thread_ids(settings.show_thread_ids)
                .with_target(settings.show_target),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(level_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!(
        "Logging initialized (level: {}, file: {})",
        settings.level,
        settings.file_logging_enabled
    );

    Ok(LoggingGuard { _guards: guards })
}
