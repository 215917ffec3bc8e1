//! Acknowledgement behaviour of the SQS transport against a scripted client

mod common;

use std::{sync::Arc, time::Duration};

use crate::common::{order_message, wait_until, RecordingHandler};
use pretty_assertions::assert_eq;
use queue::{
    sqs_transport::mock::MockSqsClient, validate, QueueTransport, ReceivedMessage, SqsConfig,
    SqsTransport, TransportKind,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

fn test_config() -> SqsConfig {
    SqsConfig {
        wait_time_seconds: 0,
        receive_backoff: Duration::from_millis(10),
        ..SqsConfig::new(
            "us-east-1",
            "http://localhost:4566/000000000000/notifications",
        )
    }
}

fn transport(client: &Arc<MockSqsClient>) -> Arc<SqsTransport<MockSqsClient>> {
    Arc::new(SqsTransport::new(
        client.clone(),
        test_config(),
        CancellationToken::new(),
    ))
}

fn body(order_id: f64) -> String {
    order_message(order_id).to_json().unwrap()
}

/// Runs the consumer until `batches` scripted receives have been fully processed
async fn consume_batches(
    transport: &Arc<SqsTransport<MockSqsClient>>,
    client: &Arc<MockSqsClient>,
    handler: &Arc<RecordingHandler>,
    batches: usize,
) {
    let consumer: JoinHandle<()> = {
        let transport = transport.clone();
        let handler = handler.clone();
        tokio::spawn(async move { transport.consume(handler.as_ref()).await })
    };

    // The receive after the last scripted batch starts only once that batch is done
    wait_until(|| client.receive_calls() > batches).await;
    transport.close().await.unwrap();
    consumer.await.unwrap();
}

#[tokio::test]
async fn test_successful_handler_deletes_message_once() {
    let client = Arc::new(MockSqsClient::new());
    let transport = transport(&client);
    let handler = Arc::new(RecordingHandler::new());

    client.push_batch(vec![ReceivedMessage::new("m-1", body(1.0))]);
    consume_batches(&transport, &client, &handler, 1).await;

    assert_eq!(handler.received(), vec![order_message(1.0)]);
    assert_eq!(client.deleted(), vec!["receipt-m-1".to_string()]);
}

#[tokio::test]
async fn test_failed_handler_leaves_message_in_queue() {
    let client = Arc::new(MockSqsClient::new());
    let transport = transport(&client);
    let handler = Arc::new(RecordingHandler::failing_on(&[1.0]));

    client.push_batch(vec![ReceivedMessage::new("m-1", body(1.0))]);
    consume_batches(&transport, &client, &handler, 1).await;

    assert_eq!(handler.calls(), 1);
    assert!(client.deleted().is_empty());
}

#[tokio::test]
async fn test_redelivered_message_reaches_handler_again() {
    let client = Arc::new(MockSqsClient::new());
    let transport = transport(&client);
    let handler = Arc::new(RecordingHandler::failing_on(&[1.0]));

    // The same message comes back after its visibility timeout
    client.push_batch(vec![ReceivedMessage::new("m-1", body(1.0))]);
    client.push_batch(vec![ReceivedMessage::new("m-1", body(1.0))]);
    consume_batches(&transport, &client, &handler, 2).await;

    assert_eq!(handler.received_order_ids(), vec![1.0, 1.0]);
    assert!(client.deleted().is_empty());
}

#[tokio::test]
async fn test_non_json_body_is_deleted_without_handler_call() {
    let client = Arc::new(MockSqsClient::new());
    let transport = transport(&client);
    let handler = Arc::new(RecordingHandler::new());

    client.push_batch(vec![ReceivedMessage::new("m-1", "not json")]);
    consume_batches(&transport, &client, &handler, 1).await;

    assert_eq!(handler.calls(), 0);
    assert_eq!(client.deleted(), vec!["receipt-m-1".to_string()]);
}

#[tokio::test]
async fn test_invalid_envelopes_and_missing_bodies_are_deleted() {
    let client = Arc::new(MockSqsClient::new());
    let transport = transport(&client);
    let handler = Arc::new(RecordingHandler::new());

    let missing_body = ReceivedMessage {
        body: None,
        ..ReceivedMessage::new("m-2", "")
    };
    client.push_batch(vec![
        ReceivedMessage::new("m-1", r#"{"type":"x"}"#),
        missing_body,
        ReceivedMessage::new("m-3", r#"{"type":"x","orderId":"1"}"#),
    ]);
    consume_batches(&transport, &client, &handler, 1).await;

    assert_eq!(handler.calls(), 0);
    assert_eq!(
        client.deleted(),
        vec![
            "receipt-m-1".to_string(),
            "receipt-m-2".to_string(),
            "receipt-m-3".to_string()
        ]
    );
}

#[tokio::test]
async fn test_batch_is_processed_in_order_with_per_message_acks() {
    let client = Arc::new(MockSqsClient::new());
    let transport = transport(&client);
    let handler = Arc::new(RecordingHandler::failing_on(&[2.0]));

    client.push_batch(vec![
        ReceivedMessage::new("m-1", body(1.0)),
        ReceivedMessage::new("m-2", body(2.0)),
        ReceivedMessage::new("m-3", body(3.0)),
    ]);
    consume_batches(&transport, &client, &handler, 1).await;

    assert_eq!(handler.received_order_ids(), vec![1.0, 2.0, 3.0]);
    assert_eq!(
        client.deleted(),
        vec!["receipt-m-1".to_string(), "receipt-m-3".to_string()]
    );
}

#[tokio::test]
async fn test_receive_error_backs_off_and_retries() {
    let client = Arc::new(MockSqsClient::new());
    let transport = transport(&client);
    let handler = Arc::new(RecordingHandler::new());

    client.push_receive_error();
    client.push_batch(vec![ReceivedMessage::new("m-1", body(1.0))]);
    consume_batches(&transport, &client, &handler, 2).await;

    assert_eq!(handler.received_order_ids(), vec![1.0]);
    assert_eq!(client.deleted(), vec!["receipt-m-1".to_string()]);
}

#[tokio::test]
async fn test_publish_sends_serialized_envelope() {
    let client = Arc::new(MockSqsClient::new());
    let transport = transport(&client);

    transport.publish(&order_message(4.0)).await.unwrap();

    let sent = client.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(validate(&sent[0]).unwrap(), order_message(4.0));
    assert_eq!(transport.kind(), TransportKind::Sqs);
}

#[tokio::test]
async fn test_get_depth_parses_reported_count() {
    let client = Arc::new(MockSqsClient::new());
    let transport = transport(&client);

    client.set_depth_attribute(Some("42"));
    assert_eq!(transport.get_depth().await.unwrap(), 42);

    client.set_depth_attribute(None);
    assert_eq!(transport.get_depth().await.unwrap(), 0);

    client.set_depth_attribute(Some("many"));
    assert_eq!(transport.get_depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_consume_with_cancelled_token_never_receives() {
    let client = Arc::new(MockSqsClient::new());
    let shutdown = CancellationToken::new();
    shutdown.cancel();
    let transport = SqsTransport::new(client.clone(), test_config(), shutdown);
    let handler = RecordingHandler::new();

    client.push_batch(vec![ReceivedMessage::new("m-1", body(1.0))]);
    transport.consume(&handler).await;

    assert_eq!(client.receive_calls(), 0);
    assert_eq!(handler.calls(), 0);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let client = Arc::new(MockSqsClient::new());
    let shutdown = CancellationToken::new();
    let transport = SqsTransport::new(client, test_config(), shutdown.clone());

    transport.close().await.unwrap();
    transport.close().await.unwrap();

    assert!(shutdown.is_cancelled());
}
