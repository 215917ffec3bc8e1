//! Queue transports for the notification pipeline
//!
//! A work item is published by a producer and consumed by a worker through one
//! of two interchangeable backends:
//!
//! * [`RedisTransport`] - a Redis list, used for local development. Items are
//!   removed by the blocking pop, so a handler failure loses the item.
//! * [`SqsTransport`] - an AWS SQS queue. Items are deleted only after the
//!   handler succeeds, so a handler failure leads to redelivery once the
//!   visibility timeout elapses (at-least-once).
//!
//! Trace context is carried inside the message body so both backends share the
//! same inject/extract logic.

#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    dead_code
)]

/// Transport configuration read from the environment
pub mod config;
/// Error types for queue operations
pub mod error;
/// Message envelope and validation
pub mod message;
/// Redis list backend
pub mod redis_transport;
/// AWS SQS backend
pub mod sqs_transport;
/// Trace context propagation through the message body
pub mod trace_context;
/// Transport contract and factory
pub mod transport;

pub use config::{RedisConfig, SqsConfig, TransportConfig, TransportKind};
pub use error::{QueueError, QueueResult, ValidationError};
pub use message::{validate, OrderEvent, QueueMessage};
pub use redis_transport::{ListStore, RedisListStore, RedisTransport};
pub use sqs_transport::{ReceivedMessage, SqsApi, SqsTransport};
pub use trace_context::{
    extract_context, in_message_context, inject_trace_context, inject_trace_context_from,
};
pub use transport::{create_queue_transport, MessageHandler, QueueTransport};
