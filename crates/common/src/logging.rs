use crate::config::Environment;
use tracing::Subscriber;
use tracing_subscriber::{
    EnvFilter, Layer, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt,
};

/// Initialize the tracing subscriber: pretty output for development,
/// JSON for production.
///
/// Filtering comes from `RUST_LOG` and defaults to `info`.
pub fn setup_logging(environment: Environment) {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer(environment))
        .init();
}

pub(crate) fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

pub(crate) fn fmt_layer<S>(environment: Environment) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    match environment {
        Environment::Production => tracing_subscriber::fmt::layer()
            .json()
            .with_level(true)
            .boxed(),
        Environment::Development => tracing_subscriber::fmt::layer()
            .pretty()
            .with_ansi(true)
            .with_target(false)
            .boxed(),
    }
}
