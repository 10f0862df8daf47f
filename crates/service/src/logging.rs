//! Logging: the process-wide `tracing` subscriber, and the [`Logger`] handle
//! injected into the server and every client.

use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,tower_http=warn,hyper=warn";

/// Receives log lines instead of `tracing` when installed on a [`Logger`].
pub trait LogProvider: Send + Sync {
    fn error(&self, msg: &str);
    fn warn(&self, msg: &str);
    fn log(&self, msg: &str);
    fn verbose(&self, msg: &str);
}

/// Leveled logger handle (cheap to clone).
///
/// Without a provider every line goes to `tracing` under the `uxp_service`
/// component; with one, the provider sees every line regardless of level.
#[derive(Clone, Default)]
pub struct Logger {
    provider: Option<Arc<dyn LogProvider>>,
}

impl Logger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(provider: Arc<dyn LogProvider>) -> Self {
        Self {
            provider: Some(provider),
        }
    }

    pub fn error(&self, msg: impl Display) {
        match &self.provider {
            Some(p) => p.error(&msg.to_string()),
            None => tracing::error!(component = "uxp_service", "{msg}"),
        }
    }

    pub fn warn(&self, msg: impl Display) {
        match &self.provider {
            Some(p) => p.warn(&msg.to_string()),
            None => tracing::warn!(component = "uxp_service", "{msg}"),
        }
    }

    pub fn log(&self, msg: impl Display) {
        match &self.provider {
            Some(p) => p.log(&msg.to_string()),
            None => tracing::info!(component = "uxp_service", "{msg}"),
        }
    }

    pub fn verbose(&self, msg: impl Display) {
        match &self.provider {
            Some(p) => p.verbose(&msg.to_string()),
            None => tracing::debug!(component = "uxp_service", "{msg}"),
        }
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("provider", &self.provider.is_some())
            .finish()
    }
}

pub struct LoggingHandle {
    pub run_id: String,
    pub guard: WorkerGuard,
}

pub fn init_logging(log_dir: &Path) -> anyhow::Result<LoggingHandle> {
    std::fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join("service.log");

    let filter = std::env::var("UXP_DEVTOOLS_LOG_FILTER")
        .ok()
        .and_then(|value| EnvFilter::try_new(value).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER));

    let file_appender = tracing_appender::rolling::never(log_dir, "service.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    let format = std::env::var("UXP_DEVTOOLS_LOG_FORMAT").unwrap_or_else(|_| "json".into());

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let registry = tracing_subscriber::registry().with(filter).with(console);
    if format.eq_ignore_ascii_case("pretty") {
        registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .pretty()
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .json()
                    .flatten_event(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true)
                    .with_current_span(true),
            )
            .init();
    }

    let run_id = format!("pid-{}", std::process::id());

    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        log_path = %log_path.display(),
        format = %format,
        run_id = %run_id,
    );

    Ok(LoggingHandle { run_id, guard })
}

/// A provider that records every line, for assertions in tests.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct CapturingProvider {
    pub lines: std::sync::Mutex<Vec<(&'static str, String)>>,
}

#[cfg(test)]
impl CapturingProvider {
    pub fn contains(&self, level: &str, needle: &str) -> bool {
        self.lines
            .lock()
            .expect("capture lock")
            .iter()
            .any(|(l, msg)| *l == level && msg.contains(needle))
    }

    fn push(&self, level: &'static str, msg: &str) {
        self.lines
            .lock()
            .expect("capture lock")
            .push((level, msg.to_string()));
    }
}

#[cfg(test)]
impl LogProvider for CapturingProvider {
    fn error(&self, msg: &str) {
        self.push("error", msg);
    }
    fn warn(&self, msg: &str) {
        self.push("warn", msg);
    }
    fn log(&self, msg: &str) {
        self.push("log", msg);
    }
    fn verbose(&self, msg: &str) {
        self.push("verbose", msg);
    }
}
