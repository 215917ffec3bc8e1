//! AWS SQS backend
//!
//! Messages are deleted only after the handler succeeds. A failed handler
//! leaves the message in the queue, and SQS delivers it again once the
//! visibility timeout expires, so handlers must tolerate duplicates.
//! Malformed messages are deleted straight away so a poison message cannot
//! keep cycling through the queue.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use aws_sdk_sqs::{types::QueueAttributeName, Client as SqsClient};
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::{SqsConfig, TransportKind},
    error::{QueueError, QueueResult},
    message::{preview, QueueMessage},
    transport::{backoff, invoke_handler, MessageHandler, QueueTransport},
};

/// A raw message as returned by a receive call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// SQS message ID
    pub message_id: Option<String>,
    /// Receipt handle for deleting the message
    pub receipt_handle: Option<String>,
    /// Unparsed message body
    pub body: Option<String>,
}

/// SQS operations the backend needs
#[async_trait]
pub trait SqsApi: Send + Sync {
    /// Sends `body` to the queue
    async fn send(&self, queue_url: &str, body: String) -> QueueResult<()>;

    /// Long-polls for up to `max_messages` messages
    async fn receive(
        &self,
        queue_url: &str,
        max_messages: i32,
        wait_time_seconds: i32,
    ) -> QueueResult<Vec<ReceivedMessage>>;

    /// Deletes (acknowledges) a received message
    async fn delete(&self, queue_url: &str, receipt_handle: &str) -> QueueResult<()>;

    /// Raw `ApproximateNumberOfMessages` attribute, if reported
    async fn approximate_depth(&self, queue_url: &str) -> QueueResult<Option<String>>;
}

#[async_trait]
impl SqsApi for SqsClient {
    async fn send(&self, queue_url: &str, body: String) -> QueueResult<()> {
        self.send_message()
            .queue_url(queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| QueueError::connection("send_message", e))?;

        Ok(())
    }

    async fn receive(
        &self,
        queue_url: &str,
        max_messages: i32,
        wait_time_seconds: i32,
    ) -> QueueResult<Vec<ReceivedMessage>> {
        let result = self
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(max_messages)
            .wait_time_seconds(wait_time_seconds)
            .send()
            .await
            .map_err(|e| QueueError::connection("receive_message", e))?;

        Ok(result
            .messages()
            .iter()
            .map(|msg| ReceivedMessage {
                message_id: msg.message_id().map(ToString::to_string),
                receipt_handle: msg.receipt_handle().map(ToString::to_string),
                body: msg.body().map(ToString::to_string),
            })
            .collect())
    }

    async fn delete(&self, queue_url: &str, receipt_handle: &str) -> QueueResult<()> {
        self.delete_message()
            .queue_url(queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::connection("delete_message", e))?;

        Ok(())
    }

    async fn approximate_depth(&self, queue_url: &str) -> QueueResult<Option<String>> {
        let result = self
            .get_queue_attributes()
            .queue_url(queue_url)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .send()
            .await
            .map_err(|e| QueueError::connection("get_queue_attributes", e))?;

        Ok(result
            .attributes()
            .and_then(|attributes| attributes.get(&QueueAttributeName::ApproximateNumberOfMessages))
            .cloned())
    }
}

/// Queue transport backed by AWS SQS
pub struct SqsTransport<C = SqsClient> {
    sqs_client: Arc<C>,
    config: SqsConfig,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl SqsTransport<SqsClient> {
    /// Builds an SQS client for the configured region and endpoint
    pub async fn from_config(config: SqsConfig, shutdown: CancellationToken) -> Self {
        let sqs_client = SqsClient::new(&config.aws_config().await);

        info!(queue_url = %config.queue_url, "SQS transport initialized");

        Self::new(Arc::new(sqs_client), config, shutdown)
    }
}

impl<C: SqsApi> SqsTransport<C> {
    /// Creates a transport over a pre-configured SQS client
    ///
    /// The consume loop stops once `shutdown` is cancelled.
    #[must_use]
    pub const fn new(sqs_client: Arc<C>, config: SqsConfig, shutdown: CancellationToken) -> Self {
        Self {
            sqs_client,
            config,
            shutdown,
            closed: AtomicBool::new(false),
        }
    }

    /// Approximate number of visible messages in the queue
    ///
    /// The value is eventually consistent and only meant for monitoring.
    /// A missing or non-numeric attribute reads as zero.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Connection` if the attribute query fails
    pub async fn get_depth(&self) -> QueueResult<u64> {
        let depth = self
            .sqs_client
            .approximate_depth(&self.config.queue_url)
            .await?;

        Ok(depth
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(0))
    }

    /// Validates one received message, runs the handler and acknowledges it
    /// according to the delivery policy
    async fn process_message(&self, handler: &dyn MessageHandler, received: ReceivedMessage) {
        let message_id = received.message_id.as_deref().unwrap_or_default();
        let Some(receipt_handle) = received.receipt_handle.as_deref() else {
            warn!(message_id, "Received SQS message without receipt handle");
            return;
        };
        let body = received.body.as_deref().unwrap_or_default();

        let message = match QueueMessage::from_json(body) {
            Ok(message) => message,
            Err(e) => {
                warn!(message_id, error = %e, body = preview(body), "Discarding malformed SQS message");
                counter!("queue_messages_malformed", "transport" => "sqs").increment(1);
                self.ack_message(message_id, receipt_handle).await;
                return;
            }
        };

        debug!(message_id, message_type = %message.kind, "Processing SQS message");

        match invoke_handler(handler, message).await {
            Ok(()) => {
                self.ack_message(message_id, receipt_handle).await;
                counter!("queue_messages_processed", "transport" => "sqs").increment(1);
            }
            Err(e) => {
                // Left in the queue; visible again after the visibility timeout
                error!(message_id, error = %e, "Failed to process SQS message");
                counter!("queue_handler_failures", "transport" => "sqs").increment(1);
            }
        }
    }

    async fn ack_message(&self, message_id: &str, receipt_handle: &str) {
        if let Err(e) = self
            .sqs_client
            .delete(&self.config.queue_url, receipt_handle)
            .await
        {
            error!(message_id, error = %e, "Failed to delete SQS message");
        }
    }
}

#[async_trait]
impl<C: SqsApi> QueueTransport for SqsTransport<C> {
    fn kind(&self) -> TransportKind {
        TransportKind::Sqs
    }

    async fn publish(&self, message: &QueueMessage) -> QueueResult<()> {
        let body = message.to_json()?;
        self.sqs_client.send(&self.config.queue_url, body).await
    }

    async fn consume(&self, handler: &dyn MessageHandler) {
        info!(queue_url = %self.config.queue_url, "Starting SQS consumer");

        while !self.shutdown.is_cancelled() {
            let received = self
                .sqs_client
                .receive(
                    &self.config.queue_url,
                    self.config.max_messages,
                    self.config.wait_time_seconds,
                )
                .await;

            match received {
                Ok(messages) => {
                    for message in messages {
                        self.process_message(handler, message).await;
                    }
                }
                Err(e) => {
                    error!(error = %e, "SQS receive error");
                    backoff(&self.shutdown, self.config.receive_backoff).await;
                }
            }
        }

        info!(queue_url = %self.config.queue_url, "SQS consumer stopped");
    }

    async fn close(&self) -> QueueResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.shutdown.cancel();
        info!(queue_url = %self.config.queue_url, "SQS transport closed");
        Ok(())
    }
}

/// Scripted SQS client for tests
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
        time::Duration,
    };

    use async_trait::async_trait;

    use super::{ReceivedMessage, SqsApi};
    use crate::error::{QueueError, QueueResult};

    /// Pause of an empty receive, standing in for the long poll
    const EMPTY_RECEIVE_DELAY: Duration = Duration::from_millis(5);

    impl ReceivedMessage {
        /// Builds a message with receipt handle `receipt-{id}`
        #[must_use]
        pub fn new(id: &str, body: impl Into<String>) -> Self {
            Self {
                message_id: Some(id.to_string()),
                receipt_handle: Some(format!("receipt-{id}")),
                body: Some(body.into()),
            }
        }
    }

    /// SQS client that replays scripted receive results and records calls
    #[derive(Default)]
    pub struct MockSqsClient {
        receives: Mutex<VecDeque<QueueResult<Vec<ReceivedMessage>>>>,
        sent: Mutex<Vec<String>>,
        deleted: Mutex<Vec<String>>,
        receive_calls: AtomicUsize,
        depth_attribute: Mutex<Option<String>>,
    }

    impl MockSqsClient {
        /// Creates a client with nothing scripted
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Queues a batch for a later receive call
        ///
        /// # Panics
        ///
        /// Panics if the script lock is poisoned
        pub fn push_batch(&self, batch: Vec<ReceivedMessage>) {
            self.receives.lock().unwrap().push_back(Ok(batch));
        }

        /// Makes a later receive call fail with a connection error
        ///
        /// # Panics
        ///
        /// Panics if the script lock is poisoned
        pub fn push_receive_error(&self) {
            self.receives.lock().unwrap().push_back(Err(QueueError::connection(
                "receive_message",
                "simulated network outage",
            )));
        }

        /// Sets the reported `ApproximateNumberOfMessages`
        ///
        /// # Panics
        ///
        /// Panics if the attribute lock is poisoned
        pub fn set_depth_attribute(&self, value: Option<&str>) {
            *self.depth_attribute.lock().unwrap() = value.map(ToString::to_string);
        }

        /// Bodies passed to send, in order
        ///
        /// # Panics
        ///
        /// Panics if the lock is poisoned
        #[must_use]
        pub fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }

        /// Receipt handles passed to delete, in order
        ///
        /// # Panics
        ///
        /// Panics if the lock is poisoned
        #[must_use]
        pub fn deleted(&self) -> Vec<String> {
            self.deleted.lock().unwrap().clone()
        }

        /// Number of receive calls made so far
        #[must_use]
        pub fn receive_calls(&self) -> usize {
            self.receive_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SqsApi for MockSqsClient {
        async fn send(&self, _queue_url: &str, body: String) -> QueueResult<()> {
            self.sent.lock().unwrap().push(body);
            Ok(())
        }

        async fn receive(
            &self,
            _queue_url: &str,
            max_messages: i32,
            _wait_time_seconds: i32,
        ) -> QueueResult<Vec<ReceivedMessage>> {
            self.receive_calls.fetch_add(1, Ordering::SeqCst);

            let scripted = self.receives.lock().unwrap().pop_front();
            match scripted {
                Some(result) => result.map(|mut batch| {
                    batch.truncate(usize::try_from(max_messages).unwrap_or_default());
                    batch
                }),
                None => {
                    tokio::time::sleep(EMPTY_RECEIVE_DELAY).await;
                    Ok(Vec::new())
                }
            }
        }

        async fn delete(&self, _queue_url: &str, receipt_handle: &str) -> QueueResult<()> {
            self.deleted.lock().unwrap().push(receipt_handle.to_string());
            Ok(())
        }

        async fn approximate_depth(&self, _queue_url: &str) -> QueueResult<Option<String>> {
            Ok(self.depth_attribute.lock().unwrap().clone())
        }
    }
}
