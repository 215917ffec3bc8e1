use std::{collections::HashMap, future::Future};

use opentelemetry::{
    global,
    trace::{FutureExt, TraceContextExt},
    Context,
};
use tracing::{info_span, Instrument};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::message::{OrderEvent, QueueMessage};

/// Builds a message from `event`, carrying the producer's active trace
///
/// The active trace is the OpenTelemetry context of the current `tracing` span
/// when it has one, otherwise the attached OpenTelemetry context. Without an
/// active trace the carrier is empty.
#[must_use]
pub fn inject_trace_context(event: OrderEvent) -> QueueMessage {
    inject_trace_context_from(&active_context(), event)
}

/// Builds a message from `event`, carrying the trace of `cx`
#[must_use]
pub fn inject_trace_context_from(cx: &Context, event: OrderEvent) -> QueueMessage {
    let mut carrier = HashMap::new();
    global::get_text_map_propagator(|propagator| propagator.inject_context(cx, &mut carrier));

    QueueMessage {
        trace_context: Some(carrier),
        ..QueueMessage::from(event)
    }
}

/// Rebuilds the producer's context from a message carrier
///
/// A missing or empty carrier yields an empty root context.
#[must_use]
pub fn extract_context(carrier: Option<&HashMap<String, String>>) -> Context {
    match carrier {
        Some(carrier) if !carrier.is_empty() => global::get_text_map_propagator(|propagator| {
            propagator.extract_with_context(&Context::new(), carrier)
        }),
        _ => Context::new(),
    }
}

/// Runs `future` under the trace context carried by `message`
///
/// The future is polled with the extracted context attached and inside a
/// `process_message` span parented to it.
pub async fn in_message_context<F>(message: &QueueMessage, future: F) -> F::Output
where
    F: Future,
{
    let cx = extract_context(message.trace_context.as_ref());

    let span = info_span!(
        "process_message",
        message_type = %message.kind,
        order_id = message.order_id,
    );
    span.set_parent(cx.clone());

    future.with_context(cx).instrument(span).await
}

fn active_context() -> Context {
    let span_cx = tracing::Span::current().context();
    if span_cx.span().span_context().is_valid() {
        span_cx
    } else {
        Context::current()
    }
}
