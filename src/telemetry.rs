//! Tracing and logging setup, plus the request-scoped trace context that
//! stamps correlation ids onto log lines and problem+json error responses.

use std::any::type_name_of_val;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use log::LevelFilter;
use thiserror::Error;
use tokio::task_local;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    registry,
    util::{SubscriberInitExt, TryInitError},
};

use crate::config::AppConfig;

/// Correlation metadata carried through one webhook or operator request.
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: String,
}

impl TraceContext {
    /// Fresh context for an incoming request.
    pub fn for_request() -> Self {
        Self {
            trace_id: format!("req-{}", &uuid::Uuid::new_v4().to_string()[..8]),
        }
    }
}

task_local! {
    static CURRENT_REQUEST: TraceContext;
}

/// Run `future` with `context` installed as the task's trace context.
pub async fn with_trace_context<Fut, R>(context: TraceContext, future: Fut) -> R
where
    Fut: Future<Output = R>,
{
    CURRENT_REQUEST.scope(context, future).await
}

/// Trace id of the running request task, if inside one.
pub fn current_trace_id() -> Option<String> {
    CURRENT_REQUEST.try_with(|ctx| ctx.trace_id.clone()).ok()
}

/// Errors that can occur while initializing global telemetry.
#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("failed to install log tracer bridge: {0}")]
    LogTracer(#[from] log::SetLoggerError),
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

static INIT_DONE: AtomicBool = AtomicBool::new(false);

/// Initialize global tracing exactly once, bridging legacy `log::` macros
/// into the tracing pipeline. Safe to call repeatedly; later calls are
/// no-ops so embedded uses (tests, the reseal tool) cannot double-install.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryInitError> {
    if INIT_DONE
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Ok(());
    }

    install_log_bridge();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if let Err(err) = registry()
        .with(env_filter)
        .with(fmt_layer(config))
        .try_init()
    {
        INIT_DONE.store(false, Ordering::SeqCst);
        eprintln!(
            "Warning: failed to set global tracing subscriber: {}. Default subscriber remains in effect.",
            err
        );
    }

    Ok(())
}

fn fmt_layer<S>(config: &AppConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    match config.log_format.as_str() {
        "pretty" => fmt::layer().pretty().boxed(),
        _ => fmt::layer().json().boxed(),
    }
}

fn install_log_bridge() {
    if let Err(err) = LogTracer::builder()
        .with_max_level(LevelFilter::Trace)
        .init()
    {
        // An already-registered LogTracer (tests, embedding binaries) counts
        // as success; anything else loses legacy log output
        let logger_type = type_name_of_val(log::logger());
        if !logger_type.contains("LogTracer") {
            eprintln!(
                "Warning: failed to install log tracer bridge: {}. Legacy `log::` macros will not emit structured tracing events.",
                err
            );
        }
    }
}
