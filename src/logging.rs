use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize structured JSON logging on stderr.
///
/// Each session thread logs inside a `session` span carrying its `session_id`, and the span list
/// on every line names the performance it belongs to. At `debug` the alignment decisions show
/// up with their fields: `line_index` and `score` for pending, held and committed lines,
/// `generation` for confirmation deadlines, `latency_ms` from first sighting to commit.
///
/// Defaults to `error` level unless overridden by `PROMPTER_LOG`, e.g.
/// `PROMPTER_LOG=prompter::engine=debug,prompter::confirm=debug` to follow the cursor, or
/// `PROMPTER_LOG=prompter=debug` to also see dropped transcript updates and stale deadlines.
pub fn init() {
    let filter = EnvFilter::builder()
        .with_env_var("PROMPTER_LOG")
        .with_default_directive(tracing::level_filters::LevelFilter::ERROR.into())
        .from_env_lossy();

    // Logs go to stderr so stdout stays a clean event stream.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .with_span_list(true),
        )
        .try_init();
}
