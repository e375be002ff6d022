//! Logging setup for processes embedding the cache.
use std::env;

use anyhow::{Context, Result};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{LogFormat, Logging};

/// The filter directives used when `RUST_LOG` is not set.
fn default_directives(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::OFF => "",
        LevelFilter::ERROR => "ERROR",
        LevelFilter::WARN => "WARN",
        LevelFilter::INFO => "INFO",
        LevelFilter::DEBUG => "INFO,metacache=DEBUG",
        LevelFilter::TRACE => "INFO,metacache=TRACE",
    }
}

/// Resolves [`LogFormat::Auto`], depending on whether a human watches the output.
fn resolve_format(format: LogFormat, attended: bool) -> LogFormat {
    match format {
        LogFormat::Auto if attended => LogFormat::Pretty,
        LogFormat::Auto => LogFormat::Simplified,
        format => format,
    }
}

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Errors are also reported to Sentry,
/// lower levels end up as breadcrumbs.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
///
/// # Safety
///
/// With [`enable_backtraces`](Logging::enable_backtraces) set, this calls
/// [`std::env::set_var`], so no other thread may access the environment at the same time.
pub unsafe fn init_logging(config: &Logging) -> Result<()> {
    if config.enable_backtraces {
        // SAFETY: upheld by the caller.
        unsafe { env::set_var("RUST_BACKTRACE", "1") };
    }

    let filter = match env::var("RUST_LOG") {
        Ok(directives) => EnvFilter::new(directives),
        Err(_) => EnvFilter::new(default_directives(config.level)),
    };

    let layer = tracing_subscriber::fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true);
    let fmt_layer = match resolve_format(config.format, console::user_attended()) {
        LogFormat::Json => layer
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        LogFormat::Simplified => layer.compact().with_ansi(false).boxed(),
        LogFormat::Pretty | LogFormat::Auto => layer.pretty().boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(filter))
        .with(sentry::integrations::tracing::layer())
        .try_init()
        .context("failed to install the global logger")
}
