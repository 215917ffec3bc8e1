//! JSON log records carrying the active trace

use std::fmt;

use chrono::{SecondsFormat, Utc};
use opentelemetry::trace::{SpanId, TraceContextExt, TraceId};
use serde_json::{Map, Value};
use tracing::{
    field::{Field, Visit},
    Event, Subscriber,
};
use tracing_opentelemetry::OtelData;
use tracing_subscriber::{
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields},
    registry::{LookupSpan, SpanRef},
};

/// Writes one JSON object per event
///
/// Every record has `timestamp`, `level`, `target`, `service` and the event
/// fields. Inside a traced span it also has `traceId` and `spanId`, so log
/// lines can be joined with the exported spans.
pub struct TraceCorrelatedJson {
    service: String,
}

impl TraceCorrelatedJson {
    /// Creates a formatter tagging records with `service`
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

impl<S, N> FormatEvent<S, N> for TraceCorrelatedJson
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();

        let mut record = Map::new();
        record.insert(
            "timestamp".to_string(),
            Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        record.insert(
            "level".to_string(),
            Value::from(metadata.level().to_string().to_lowercase()),
        );
        record.insert("target".to_string(), Value::from(metadata.target()));
        record.insert("service".to_string(), Value::from(self.service.as_str()));

        event.record(&mut JsonFields(&mut record));

        if let Some((trace_id, span_id)) = ctx.lookup_current().and_then(|span| trace_ids(&span)) {
            record.insert("traceId".to_string(), Value::from(trace_id.to_string()));
            record.insert("spanId".to_string(), Value::from(span_id.to_string()));
        }

        let line = serde_json::to_string(&record).map_err(|_| fmt::Error)?;
        writeln!(writer, "{line}")
    }
}

/// Trace and span id of `span` as the OpenTelemetry layer will export them
fn trace_ids<S>(span: &SpanRef<'_, S>) -> Option<(TraceId, SpanId)>
where
    S: for<'a> LookupSpan<'a>,
{
    let extensions = span.extensions();
    let otel = extensions.get::<OtelData>()?;

    let trace_id = if otel.parent_cx.has_active_span() {
        otel.parent_cx.span().span_context().trace_id()
    } else {
        otel.builder.trace_id?
    };
    let span_id = otel.builder.span_id?;

    (trace_id != TraceId::INVALID).then_some((trace_id, span_id))
}

struct JsonFields<'a>(&'a mut Map<String, Value>);

impl Visit for JsonFields<'_> {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0
            .insert(field.name().to_string(), Value::from(format!("{value:?}")));
    }
}
