//! Logging setup, lifted from erdos's own `LeaderHandle`/`WorkerHandle`
//! constructors, which build a `tracing_subscriber::fmt` layer over a
//! non-blocking `tracing-appender` writer gated by an optional
//! `tracing::Level`.
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;

/// Installs a process-wide `tracing` subscriber at `level`, writing to
/// stdout through a non-blocking appender. Returns the [`WorkerGuard`]; it
/// must be held for the lifetime of the process, since dropping it flushes
/// and detaches the background writer thread.
///
/// Does nothing and returns `None` if `level` is `None`: a host process
/// managing its own subscriber is not overridden.
pub fn init_tracing(level: Option<Level>) -> Option<WorkerGuard> {
    let level = level?;
    let display_verbose = level >= Level::TRACE;

    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());
    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_thread_ids(display_verbose)
        .with_span_events(FmtSpan::FULL)
        .with_target(display_verbose)
        .with_max_level(level)
        .init();

    Some(guard)
}
