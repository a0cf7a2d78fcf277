//! ---
//! simtap_section: "03-logging-configuration"
//! simtap_subsection: "module"
//! simtap_type: "source"
//! simtap_scope: "code"
//! simtap_description: "Shared primitives for the telemetry client workspace."
//! simtap_version: "v0.0.0-prealpha"
//! simtap_owner: "tbd"
//! ---
//! Shared configuration loading and logging bootstrap for the simtap workspace.

pub mod config;
pub mod logging;

pub use config::{AppConfig, ClientConfig, FieldConfig, HostConfig, LoadedAppConfig, LoggingConfig};
pub use logging::{
    init_test_tracing, init_tracing, log_lifecycle_event, LifecycleOutcome, LogContext, LogFormat,
};
