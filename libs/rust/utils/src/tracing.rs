use futures::{Future, FutureExt};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs the global subscriber: `RUST_LOG` filter (default `info`) and a
/// stdout formatter. `LOG_FORMAT=json` switches to one JSON object per line,
/// which is what log collectors on function runtimes expect.
pub fn setup_tracing() {
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter_layer);

    if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stdout),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_line_number(true)
                    .compact()
                    .with_writer(std::io::stdout),
            )
            .init();
    }
}

/// Runs `future` with tracing installed, logging panics with a backtrace
/// instead of letting them vanish from the collected logs.
pub async fn run_with_tracing<F, Fut>(future: F) -> anyhow::Result<()>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    setup_tracing();

    let result = std::panic::AssertUnwindSafe(future()).catch_unwind().await;

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            capture_panic_details(e);
            Err(anyhow::anyhow!("task panicked"))
        }
    };

    shutdown_tracing().await;
    outcome
}

fn capture_panic_details(e: Box<dyn std::any::Any + Send>) {
    let backtrace = backtrace::Backtrace::new();
    if let Some(s) = e.downcast_ref::<&str>() {
        error!(panic_message = *s, backtrace = ?backtrace, "Panic occurred with message");
    } else if let Some(s) = e.downcast_ref::<String>() {
        error!(panic_message = s, backtrace = ?backtrace, "Panic occurred with message");
    } else {
        error!(backtrace = ?backtrace, "Panic occurred but the payload is not a string");
    }
}

pub async fn shutdown_tracing() {
    // stdout is line buffered; give the writer a moment before the process exits
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
}
