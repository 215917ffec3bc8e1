//! Shared helpers for queue transport tests

#![allow(dead_code)]

use std::{
    sync::{Mutex, Once},
    time::Duration,
};

use async_trait::async_trait;
use opentelemetry::{
    global,
    trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState},
    Context,
};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use queue::{MessageHandler, OrderEvent, QueueMessage};

static PROPAGATOR: Once = Once::new();

/// Installs the W3C trace context propagator once per test binary
pub fn install_propagator() {
    PROPAGATOR.call_once(|| global::set_text_map_propagator(TraceContextPropagator::new()));
}

/// Context of a sampled remote span with the given trace id
pub fn remote_context(trace_id: u128) -> Context {
    Context::new().with_remote_span_context(SpanContext::new(
        TraceId::from(trace_id),
        SpanId::from(0x00f0_67aa_0ba9_02b7_u64),
        TraceFlags::SAMPLED,
        true,
        TraceState::default(),
    ))
}

/// An `order_created` event for `order_id`
pub fn order_event(order_id: f64) -> OrderEvent {
    OrderEvent {
        kind: "order_created".to_string(),
        order_id,
        user_id: 7.0,
        user_name: "a".to_string(),
        total: 9.5,
        timestamp: "2024-01-01T12:00:00Z".to_string(),
    }
}

/// The envelope of `order_event(order_id)` without a carrier
pub fn order_message(order_id: f64) -> QueueMessage {
    QueueMessage::from(order_event(order_id))
}

/// Handler that records every message and fails for chosen orders
#[derive(Default)]
pub struct RecordingHandler {
    failing_order_ids: Vec<f64>,
    received: Mutex<Vec<QueueMessage>>,
    trace_ids: Mutex<Vec<TraceId>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(order_ids: &[f64]) -> Self {
        Self {
            failing_order_ids: order_ids.to_vec(),
            ..Self::default()
        }
    }

    pub fn received(&self) -> Vec<QueueMessage> {
        self.received.lock().unwrap().clone()
    }

    pub fn received_order_ids(&self) -> Vec<f64> {
        self.received().iter().map(|m| m.order_id).collect()
    }

    pub fn calls(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    /// Trace id active while each call ran
    pub fn trace_ids(&self) -> Vec<TraceId> {
        self.trace_ids.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, message: QueueMessage) -> anyhow::Result<()> {
        let trace_id = Context::current().span().span_context().trace_id();
        self.trace_ids.lock().unwrap().push(trace_id);

        let fail = self.failing_order_ids.contains(&message.order_id);
        let order_id = message.order_id;
        self.received.lock().unwrap().push(message);

        if fail {
            anyhow::bail!("simulated failure for order {order_id}");
        }
        Ok(())
    }
}

/// Polls `condition` until it holds, failing the test after five seconds
pub async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
