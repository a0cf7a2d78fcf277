//! ---
//! simtap_section: "03-logging-configuration"
//! simtap_subsection: "module"
//! simtap_type: "source"
//! simtap_scope: "code"
//! simtap_description: "Tracing bootstrap and lifecycle log helpers."
//! simtap_version: "v0.0.0-prealpha"
//! simtap_owner: "tbd"
//! ---
use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{info, warn, Level, Subscriber};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "SIMTAP_LOG";
const DEFAULT_DIRECTIVE: &str = "info";

/// Writer guards; dropping them loses buffered records.
struct LogGuards {
    _file: WorkerGuard,
    _stdout: WorkerGuard,
}

static GUARDS: OnceCell<LogGuards> = OnceCell::new();

/// Available log formats for the daemon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    StructuredJson,
    #[default]
    Pretty,
}

/// Where the active filter directive came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterSource {
    SimtapLog,
    RustLog,
    Default,
}

impl FilterSource {
    fn as_str(self) -> &'static str {
        match self {
            FilterSource::SimtapLog => LOG_ENV,
            FilterSource::RustLog => "RUST_LOG",
            FilterSource::Default => "default",
        }
    }
}

/// Filter chosen from the environment, plus the directive that was refused, if any.
struct ResolvedFilter {
    filter: EnvFilter,
    source: FilterSource,
    rejected: Option<(FilterSource, String)>,
}

/// `SIMTAP_LOG` wins over `RUST_LOG`; an unparsable directive falls through
/// to the next candidate.
fn resolve_filter(simtap_log: Option<String>, rust_log: Option<String>) -> ResolvedFilter {
    let mut rejected = None;
    let candidates = [
        (FilterSource::SimtapLog, simtap_log),
        (FilterSource::RustLog, rust_log),
    ];
    for (source, directive) in candidates {
        let Some(directive) = directive.filter(|d| !d.trim().is_empty()) else {
            continue;
        };
        match EnvFilter::try_new(&directive) {
            Ok(filter) => {
                return ResolvedFilter {
                    filter,
                    source,
                    rejected,
                }
            }
            Err(err) => {
                rejected.get_or_insert((source, format!("{directive}: {err}")));
            }
        }
    }
    ResolvedFilter {
        filter: EnvFilter::new(DEFAULT_DIRECTIVE),
        source: FilterSource::Default,
        rejected,
    }
}

/// `<prefix>.log` when a prefix is configured, `<service>.log` otherwise.
/// The daily roller appends the date.
fn log_file_name(service_name: &str, prefix: Option<&str>) -> String {
    format!("{}.log", prefix.unwrap_or(service_name))
}

fn stdout_layer<S>(format: LogFormat, writer: NonBlocking) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    let layer = fmt::layer()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_writer(writer);
    match format {
        LogFormat::StructuredJson => layer.with_target(false).json().boxed(),
        LogFormat::Pretty => layer.with_target(true).boxed(),
    }
}

fn file_layer<S>(directory: &Path, file_name: &str) -> (Box<dyn Layer<S> + Send + Sync>, WorkerGuard)
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    let (writer, guard) = tracing_appender::non_blocking(daily(directory, file_name));
    let layer = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .json()
        .with_writer(writer)
        .boxed();
    (layer, guard)
}

/// Install the process-wide subscriber: the configured format on stdout and a
/// daily rolling JSON file under `config.directory`.
///
/// The filter comes from `SIMTAP_LOG`, then `RUST_LOG`, then `info`. A second
/// call leaves the first subscriber in place.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory).with_context(|| {
        format!("unable to create log directory {}", config.directory.display())
    })?;
    let file_name = log_file_name(service_name, config.file_prefix.as_deref());
    let resolved = resolve_filter(std::env::var(LOG_ENV).ok(), std::env::var("RUST_LOG").ok());

    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let (file, file_guard) = file_layer(&config.directory, &file_name);
    let installed = tracing_subscriber::registry()
        .with(resolved.filter)
        .with(stdout_layer(config.format, stdout_writer))
        .with(file)
        .try_init()
        .is_ok();
    if !installed {
        return Ok(());
    }
    let _ = GUARDS.set(LogGuards {
        _file: file_guard,
        _stdout: stdout_guard,
    });

    if let Some((source, detail)) = &resolved.rejected {
        warn!(variable = source.as_str(), detail = %detail, "ignoring invalid log filter");
    }
    info!(
        service = %service_name,
        log_dir = %config.directory.display(),
        log_file = %file_name,
        format = ?config.format,
        filter_source = resolved.source.as_str(),
        "tracing initialised"
    );
    Ok(())
}

/// Plain stdout subscriber for tests and tools that have no configuration.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with(fmt::layer().with_test_writer())
        .try_init();
}

/// Structured context attached to lifecycle log records.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Application name announced to the host.
    pub application: Option<&'a str>,
    /// Session counter of the client (increments on every open).
    pub session: Option<u64>,
    /// Request identifier involved in the event.
    pub request_id: Option<u32>,
}

impl<'a> LogContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_application(mut self, application: &'a str) -> Self {
        self.application = Some(application);
        self
    }

    pub fn with_session(mut self, session: u64) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_request_id(mut self, request_id: u32) -> Self {
        self.request_id = Some(request_id);
        self
    }
}

/// High-level outcome used when emitting lifecycle log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOutcome {
    Success,
    Fault,
}

impl LifecycleOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            LifecycleOutcome::Success => "success",
            LifecycleOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized lifecycle record (`connect`, `session.open`, `session.quit`, ...).
pub fn log_lifecycle_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: LifecycleOutcome,
) {
    let default_ctx = LogContext::default();
    let ctx = context.unwrap_or(&default_ctx);
    macro_rules! emit {
        ($level:expr) => {
            tracing::event!(
                $level,
                event,
                outcome = outcome.as_str(),
                application = ctx.application.unwrap_or(""),
                session = ctx.session.unwrap_or_default(),
                request_id = ctx.request_id.unwrap_or_default(),
                message = %message
            )
        };
    }
    match outcome {
        LifecycleOutcome::Success => emit!(Level::INFO),
        LifecycleOutcome::Fault => emit!(Level::ERROR),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_helper_emits_without_panic() {
        init_test_tracing();
        let ctx = LogContext::new()
            .with_application("Managed Data Request")
            .with_session(3);
        log_lifecycle_event(
            Some(&ctx),
            "session.open",
            "host session opened",
            LifecycleOutcome::Success,
        );
        log_lifecycle_event(
            None,
            "session.fault",
            "host session faulted",
            LifecycleOutcome::Fault,
        );
    }

    #[test]
    fn simtap_log_wins_over_rust_log() {
        let resolved = resolve_filter(Some("debug".into()), Some("warn".into()));
        assert_eq!(resolved.source, FilterSource::SimtapLog);
        assert!(resolved.rejected.is_none());
    }

    #[test]
    fn invalid_directive_falls_back_and_is_reported() {
        let resolved = resolve_filter(Some("simtap_core=loud".into()), None);
        assert_eq!(resolved.source, FilterSource::Default);
        let (source, _) = resolved.rejected.expect("bad directive recorded");
        assert_eq!(source, FilterSource::SimtapLog);

        let resolved = resolve_filter(Some("simtap_core=loud".into()), Some("trace".into()));
        assert_eq!(resolved.source, FilterSource::RustLog);
    }

    #[test]
    fn blank_directives_are_ignored() {
        let resolved = resolve_filter(Some("  ".into()), None);
        assert_eq!(resolved.source, FilterSource::Default);
        assert!(resolved.rejected.is_none());
    }

    #[test]
    fn log_file_uses_prefix_or_service_name() {
        assert_eq!(log_file_name("simtapd", None), "simtapd.log");
        assert_eq!(log_file_name("simtapd", Some("cockpit")), "cockpit.log");
    }

    #[test]
    fn log_format_defaults_to_pretty() {
        assert_eq!(LogFormat::default(), LogFormat::Pretty);
    }
}
