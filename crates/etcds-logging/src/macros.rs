//! ---
//! etcds_section: "03-persistence-logging"
//! etcds_subsection: "module"
//! etcds_type: "source"
//! etcds_scope: "code"
//! etcds_description: "Structured logging adapters and sinks."
//! etcds_version: "v0.1.0"
//! etcds_owner: "tbd"
//! ---
/// Emit an informational log enriched with fleet context.
#[macro_export]
macro_rules! etcds_info {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::INFO,
            node = ctx.node.unwrap_or(""),
            operation = ctx.operation.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        tracing::event!(
            tracing::Level::INFO,
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit a warning enriched with fleet context.
#[macro_export]
macro_rules! etcds_warn {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::WARN,
            node = ctx.node.unwrap_or(""),
            operation = ctx.operation.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        tracing::event!(
            tracing::Level::WARN,
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an error log enriched with fleet context.
#[macro_export]
macro_rules! etcds_error {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::ERROR,
            node = ctx.node.unwrap_or(""),
            operation = ctx.operation.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        tracing::event!(
            tracing::Level::ERROR,
            message = %format_args!($($arg)+)
        );
    }};
}
