//! ---
//! etcds_section: "03-persistence-logging"
//! etcds_subsection: "module"
//! etcds_type: "source"
//! etcds_scope: "code"
//! etcds_description: "Structured logging adapters and sinks."
//! etcds_version: "v0.1.0"
//! etcds_owner: "tbd"
//! ---
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Layer, Registry};

pub mod macros;

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "ETCDS_LOG";

/// Output format for diagnostics written to stderr.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    /// Human readable single-line events.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

/// Install the process-wide subscriber. Repeated calls are ignored.
///
/// Diagnostics go to stderr so that command output on stdout stays clean.
/// `ETCDS_LOG` wins over `RUST_LOG`; both fall back to `info`.
pub fn init(format: LogFormat) {
    let fmt_layer = match format {
        LogFormat::Pretty => subscriber_fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Json => subscriber_fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
    };
    let _ = Registry::default()
        .with(resolve_filter())
        .with(fmt_layer)
        .try_init();
}

fn resolve_filter() -> EnvFilter {
    match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(&directive).unwrap_or_else(|err| {
            eprintln!(
                "invalid {} directive ({}); defaulting to info logging",
                LOG_ENV, err
            );
            EnvFilter::new("info")
        }),
        Err(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Inventory name of the node the event concerns.
    pub node: Option<&'a str>,
    /// Operation being performed (`up`, `stop`, `ca.sign`, ...).
    pub operation: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node name.
    pub fn with_node(mut self, node: &'a str) -> Self {
        self.node = Some(node);
        self
    }

    /// Attach an operation name.
    pub fn with_operation(mut self, operation: &'a str) -> Self {
        self.operation = Some(operation);
        self
    }
}

/// Outcome attached to fleet events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FleetEventOutcome {
    /// The operation completed.
    Success,
    /// Nothing was done, but the run continues (stale state, node not running).
    Warning,
    /// The operation failed.
    Fault,
}

impl FleetEventOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            FleetEventOutcome::Success => "success",
            FleetEventOutcome::Warning => "warning",
            FleetEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized fleet event.
pub fn log_fleet_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: FleetEventOutcome,
) {
    let default_ctx = LogContext::default();
    let ctx = context.unwrap_or(&default_ctx);
    match outcome {
        FleetEventOutcome::Success => tracing::event!(
            Level::INFO,
            event,
            outcome = outcome.as_str(),
            node = ctx.node.unwrap_or(""),
            operation = ctx.operation.unwrap_or(""),
            message = %message
        ),
        FleetEventOutcome::Warning => tracing::event!(
            Level::WARN,
            event,
            outcome = outcome.as_str(),
            node = ctx.node.unwrap_or(""),
            operation = ctx.operation.unwrap_or(""),
            message = %message
        ),
        FleetEventOutcome::Fault => tracing::event!(
            Level::ERROR,
            event,
            outcome = outcome.as_str(),
            node = ctx.node.unwrap_or(""),
            operation = ctx.operation.unwrap_or(""),
            message = %message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macros_emit_without_panic() {
        init(LogFormat::Pretty);
        let ctx = LogContext::new().with_node("a").with_operation("up");
        etcds_info!(context = ctx.clone(), "node started");
        etcds_warn!("nothing to stop");
        etcds_error!(context = ctx, "exit status: {}", 1);
    }

    #[test]
    fn init_is_repeatable() {
        init(LogFormat::Json);
        init(LogFormat::Pretty);
    }

    #[test]
    fn fleet_event_helper_emits() {
        init(LogFormat::Pretty);
        let ctx = LogContext::new().with_node("b");
        log_fleet_event(
            Some(&ctx),
            "lifecycle.stop",
            "container stopped",
            FleetEventOutcome::Success,
        );
        log_fleet_event(
            None,
            "lifecycle.rm",
            "nothing matched",
            FleetEventOutcome::Warning,
        );
    }

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
