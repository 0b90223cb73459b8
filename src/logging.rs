//! `tracing` setup for both front-ends
//!
//! Console output goes to stderr so that `chat` can own stdout. An optional
//! daily-rotated file layer is flushed through a guard held by `main`.
//! `RUST_LOG` overrides the configured level per module.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::LoggingSettings;
use crate::error::{Error, Result};

/// Crates whose chatter is capped at `warn`
const QUIET_DEPENDENCIES: [&str; 3] = ["hyper", "tokio_tungstenite", "tungstenite"];

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

/// Keeps the file writer alive; drop it last so buffered lines are flushed
pub struct LogGuards {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global subscriber
///
/// `debug` is the server debug flag; it raises the configured level to at
/// least DEBUG when no `-v` flag is given.
pub fn init_logging(
    settings: &LoggingSettings,
    verbose: u8,
    quiet: bool,
    debug: bool,
) -> Result<LogGuards> {
    let level = determine_level(settings, verbose, quiet, debug);

    let (file_layer, file_guard) = match settings.file.as_deref().filter(|f| !f.is_empty()) {
        Some(log_file) => {
            let (layer, guard) =
                build_file_layer(log_file, settings.max_files, settings.json_format)?;
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(build_env_filter(level)?)
        .with(output_layer(io::stderr, settings.json_format, true))
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("Logging already initialized: {}", e)))?;

    tracing::debug!(
        %level,
        file = ?settings.file,
        json = settings.json_format,
        "Logging ready"
    );

    Ok(LogGuards {
        _file_guard: file_guard,
    })
}

/// `-q` beats `-v`, `-v` beats the config level, debug mode lifts the
/// config level to at least DEBUG
fn determine_level(settings: &LoggingSettings, verbose: u8, quiet: bool, debug: bool) -> Level {
    let configured = parse_level(&settings.level);
    match (quiet, verbose) {
        (true, _) => Level::ERROR,
        (false, 0) if debug => configured.max(Level::DEBUG),
        (false, 0) => configured,
        (false, 1) => Level::DEBUG,
        (false, _) => Level::TRACE,
    }
}

/// Unknown names fall back to INFO
fn parse_level(name: &str) -> Level {
    match name.trim().to_lowercase().as_str() {
        "warning" => Level::WARN,
        other => other.parse().unwrap_or(Level::INFO),
    }
}

fn directive(text: &str) -> Result<Directive> {
    text.parse()
        .map_err(|e| Error::Config(format!("Invalid log directive '{}': {}", text, e)))
}

/// `RUST_LOG` if set, otherwise `level`; our own crate always logs at `level`
fn build_env_filter(level: Level) -> Result<EnvFilter> {
    let base = level.to_string().to_lowercase();

    let mut filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&base))
        .add_directive(directive(&format!("autoglm_ui={}", base))?);
    for krate in QUIET_DEPENDENCIES {
        filter = filter.add_directive(directive(&format!("{}=warn", krate))?);
    }

    Ok(filter)
}

/// One fmt layer over `writer`; JSON lines carry file and line
fn output_layer<S, W>(writer: W, json: bool, ansi: bool) -> BoxedLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer::<S>().with_writer(writer).with_target(true);
    if json {
        Box::new(
            layer
                .json()
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE),
        )
    } else if ansi {
        Box::new(layer.with_ansi(true).compact())
    } else {
        Box::new(layer.with_ansi(false).with_thread_ids(true))
    }
}

/// Daily rotation in the directory of `log_file`, keeping `max_files`
fn build_file_layer<S>(
    log_file: &str,
    max_files: u32,
    json: bool,
) -> Result<(BoxedLayer<S>, WorkerGuard)>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let path = Path::new(log_file);
    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    fs::create_dir_all(directory).map_err(|e| Error::IoWrite {
        path: directory.to_path_buf(),
        source: e,
    })?;

    let prefix = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("autoglm-ui");

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .max_log_files(max_files.max(1) as usize)
        .build(directory)
        .map_err(|e| {
            Error::Config(format!(
                "Cannot open log file in {}: {}",
                directory.display(),
                e
            ))
        })?;

    let (writer, guard) = tracing_appender::non_blocking(appender);
    Ok((output_layer(writer, json, false), guard))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("trace"), Level::TRACE);
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level(" info "), Level::INFO);
        assert_eq!(parse_level("warning"), Level::WARN);
        assert_eq!(parse_level("error"), Level::ERROR);
        assert_eq!(parse_level("chatty"), Level::INFO);
    }

    #[test]
    fn test_determine_level_flags() {
        let settings = LoggingSettings::default();
        assert_eq!(determine_level(&settings, 0, true, false), Level::ERROR);
        assert_eq!(determine_level(&settings, 0, false, false), Level::INFO);
        assert_eq!(determine_level(&settings, 1, false, false), Level::DEBUG);
        assert_eq!(determine_level(&settings, 2, false, false), Level::TRACE);
    }

    #[test]
    fn test_debug_mode_raises_level() {
        let mut settings = LoggingSettings::default();
        assert_eq!(determine_level(&settings, 0, false, true), Level::DEBUG);

        // Already more verbose than debug
        settings.level = "trace".to_string();
        assert_eq!(determine_level(&settings, 0, false, true), Level::TRACE);

        // Quiet still wins
        assert_eq!(determine_level(&settings, 0, true, true), Level::ERROR);
    }

    #[test]
    fn test_env_filter_directives() {
        assert!(build_env_filter(Level::WARN).is_ok());
        assert!(directive("autoglm_ui=loudest").is_err());
    }

    #[test]
    fn test_file_layer_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("logs").join("autoglm-ui.log");

        let built = build_file_layer::<tracing_subscriber::Registry>(
            &log_path.to_string_lossy(),
            3,
            true,
        );

        assert!(built.is_ok());
        assert!(temp_dir.path().join("logs").is_dir());
    }
}
