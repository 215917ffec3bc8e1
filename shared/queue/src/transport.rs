use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{TransportConfig, TransportKind},
    error::{QueueError, QueueResult},
    message::QueueMessage,
    redis_transport::RedisTransport,
    sqs_transport::SqsTransport,
    trace_context::in_message_context,
};

/// Caller-supplied processing for a validated message
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Processes one message. An error counts as a handler failure and is
    /// treated according to the backend's delivery policy.
    async fn handle(&self, message: QueueMessage) -> anyhow::Result<()>;
}

/// Operations every queue backend provides
///
/// Trace context is the caller's job on the publish side (see
/// [`crate::inject_trace_context`]); on the consume side every handler call
/// runs under the context extracted from the message.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Which backend this transport talks to
    fn kind(&self) -> TransportKind;

    /// Serializes and enqueues a message. Publishes are never retried here.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Connection` if the backend rejects the write, or
    /// `QueueError::Serialization` if the message cannot be encoded
    async fn publish(&self, message: &QueueMessage) -> QueueResult<()>;

    /// Retrieves, validates and hands messages to `handler` until the
    /// transport is closed or its shutdown token is cancelled
    ///
    /// Handler calls are sequential. A failure on one message is logged and
    /// the loop continues. Calling `consume` twice on one transport is not
    /// supported.
    async fn consume(&self, handler: &dyn MessageHandler);

    /// Stops the consume loop and releases the backend connection
    ///
    /// Idempotent. An in-flight retrieval or handler call is allowed to
    /// finish, so at most one more iteration completes after this returns.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Connection` if releasing the connection fails
    async fn close(&self) -> QueueResult<()>;
}

/// Builds the transport selected by `config`
///
/// # Errors
///
/// Returns `QueueError::Connection` if the Redis connection cannot be opened
pub async fn create_queue_transport(
    config: &TransportConfig,
    shutdown: CancellationToken,
) -> QueueResult<Box<dyn QueueTransport>> {
    match config {
        TransportConfig::Redis(redis) => Ok(Box::new(
            RedisTransport::connect(redis.clone(), shutdown).await?,
        )),
        TransportConfig::Sqs(sqs) => Ok(Box::new(
            SqsTransport::from_config(sqs.clone(), shutdown).await,
        )),
    }
}

/// Runs `handler` under the message's trace context
pub(crate) async fn invoke_handler(
    handler: &dyn MessageHandler,
    message: QueueMessage,
) -> QueueResult<()> {
    let traced = message.clone();
    in_message_context(&traced, handler.handle(message))
        .await
        .map_err(QueueError::Handler)
}

/// Sleeps for `delay`, waking early on shutdown
pub(crate) async fn backoff(shutdown: &CancellationToken, delay: Duration) {
    tokio::select! {
        () = tokio::time::sleep(delay) => {}
        () = shutdown.cancelled() => {}
    }
}
