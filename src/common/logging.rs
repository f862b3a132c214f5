//! Logging and tracing configuration
//!
//! Logs are controlled by the `RUST_LOG` environment variable. Default
//! level is INFO for this crate (DEBUG with `--verbose`), WARN for
//! dependencies. Scenario runs can also write a full log file, which
//! captures every line the target printed.

use std::path::Path;

use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize tracing for the CLI (stderr logging, optional log file)
///
/// The returned guard must be held until exit so the file writer flushes.
pub fn init_cli(verbose: bool, log_file: Option<&Path>) -> Option<WorkerGuard> {
    let default_directive = if verbose {
        "debug_harness=debug,warn"
    } else {
        "debug_harness=info,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let Some(path) = log_file else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer())
            .init();
        return None;
    };

    let dir = path.parent().filter(|d| !d.as_os_str().is_empty());
    let file_name = path
        .file_name()
        .map(|n| n.to_owned())
        .unwrap_or_else(|| "debug-harness.log".into());
    let appender = tracing_appender::rolling::never(dir.unwrap_or(Path::new(".")), file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    // File logging with full details, always at trace for this crate
    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(EnvFilter::new("debug_harness=trace,info"));

    tracing_subscriber::registry()
        .with(stderr_layer().with_filter(filter))
        .with(file_layer)
        .init();

    Some(guard)
}

fn stderr_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
}
