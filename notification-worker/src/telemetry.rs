//! Logging, trace export and trace propagation setup

use opentelemetry::{global, trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    propagation::TraceContextPropagator,
    runtime,
    trace::{config, Config, Tracer, TracerProvider},
    Resource,
};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::{log_format::TraceCorrelatedJson, types::Environment};

/// Installs the W3C propagator, the tracer and the log subscriber
///
/// Spans are exported over OTLP when `OTEL_EXPORTER_OTLP_ENDPOINT` is set;
/// otherwise they still get trace ids, so context is propagated through the
/// queue, but are not exported. Logs are JSON with `traceId`/`spanId` in
/// production and staging, plain text in development, filtered by `RUST_LOG`.
///
/// # Errors
///
/// Returns an error if the OTLP exporter cannot be built or a global
/// subscriber is already set
pub fn init(env: &Environment) -> anyhow::Result<()> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let service_name = env.service_name();
    let trace_config = config().with_resource(Resource::new(vec![
        KeyValue::new("service.name", service_name.clone()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        KeyValue::new("deployment.environment", env.name()),
    ]));

    let otlp_endpoint = env.otlp_endpoint();
    let tracer = match &otlp_endpoint {
        Some(endpoint) => otlp_tracer(endpoint, trace_config)?,
        None => local_tracer(trace_config),
    };

    let fmt_layer = if env.json_logs() {
        fmt::layer()
            .event_format(TraceCorrelatedJson::new(service_name))
            .boxed()
    } else {
        fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt_layer)
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .try_init()?;

    match otlp_endpoint {
        Some(endpoint) => info!(otlp_endpoint = %endpoint, "Exporting traces over OTLP"),
        None => info!("OTEL_EXPORTER_OTLP_ENDPOINT not set, traces are not exported"),
    }

    Ok(())
}

/// Flushes pending spans and shuts down the global tracer provider
pub fn shutdown() {
    global::shutdown_tracer_provider();
    info!("OpenTelemetry terminated");
}

fn otlp_tracer(endpoint: &str, trace_config: Config) -> anyhow::Result<Tracer> {
    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .with_trace_config(trace_config)
        .install_batch(runtime::Tokio)?;

    Ok(tracer)
}

fn local_tracer(trace_config: Config) -> Tracer {
    let provider = TracerProvider::builder().with_config(trace_config).build();
    let tracer = provider.tracer("notification-worker");
    global::set_tracer_provider(provider);
    tracer
}
