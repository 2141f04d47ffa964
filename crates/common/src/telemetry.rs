use crate::Environment;
use crate::logging::{env_filter, fmt_layer};
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    metrics::{PeriodicReader, SdkMeterProvider},
    propagation::TraceContextPropagator,
    trace::{Sampler, SdkTracerProvider},
};
use opentelemetry_semantic_conventions::attribute::{SERVICE_NAME, SERVICE_VERSION};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const METRIC_EXPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Owns the OTLP trace and metric providers; flushes and shuts them down on drop.
///
/// Installs the tracing subscriber as well, so callers use either this guard
/// or [`crate::setup_logging`], never both.
///
/// ```ignore
/// let _telemetry = TelemetryGuard::init("tracker", "http://localhost:4317", Environment::Production)?;
/// ```
pub struct TelemetryGuard {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl TelemetryGuard {
    /// Must be called from within a Tokio runtime: the batch exporters spawn onto it.
    pub fn init(
        service_name: &str,
        endpoint: &str,
        environment: Environment,
    ) -> anyhow::Result<Self> {
        global::set_text_map_propagator(TraceContextPropagator::new());

        let resource = service_resource(service_name, environment);
        let tracer_provider = build_tracer_provider(endpoint, resource.clone())?;
        let meter_provider = build_meter_provider(endpoint, resource)?;

        global::set_tracer_provider(tracer_provider.clone());
        global::set_meter_provider(meter_provider.clone());

        let otel_layer =
            tracing_opentelemetry::layer().with_tracer(global::tracer(service_name.to_string()));

        tracing_subscriber::registry()
            .with(env_filter())
            .with(otel_layer)
            .with(fmt_layer(environment))
            .init();

        tracing::info!(endpoint, service_name, "OTLP telemetry enabled");

        Ok(Self {
            tracer_provider,
            meter_provider,
        })
    }
}

fn service_resource(service_name: &str, environment: Environment) -> Resource {
    Resource::builder()
        .with_attributes([
            KeyValue::new(SERVICE_NAME, service_name.to_string()),
            KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
            KeyValue::new("deployment.environment", environment.as_str()),
        ])
        .build()
}

fn build_tracer_provider(endpoint: &str, resource: Resource) -> anyhow::Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_resource(resource)
        .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
        .with_batch_exporter(exporter)
        .build())
}

fn build_meter_provider(endpoint: &str, resource: Resource) -> anyhow::Result<SdkMeterProvider> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(METRIC_EXPORT_INTERVAL)
        .build();

    Ok(SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build())
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        // The subscriber may already be gone at this point.
        if let Err(e) = self.meter_provider.shutdown() {
            eprintln!("Failed to shut down meter provider: {:?}", e);
        }
        if let Err(e) = self.tracer_provider.shutdown() {
            eprintln!("Failed to shut down tracer provider: {:?}", e);
        }
    }
}

/// Enters an info-level span, optionally with fields:
/// `span!("encode_frame")`, `span!("encode_frame", width = 640)`.
#[macro_export]
macro_rules! span {
    ($name:literal $(, $($fields:tt)*)?) => {
        tracing::info_span!($name $(, $($fields)*)?).entered()
    };
}

/// Debug-level counterpart of [`span!`].
#[macro_export]
macro_rules! span_debug {
    ($name:literal $(, $($fields:tt)*)?) => {
        tracing::debug_span!($name $(, $($fields)*)?).entered()
    };
}
