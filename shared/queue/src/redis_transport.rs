//! Redis list backend
//!
//! Producers `LPUSH` onto the list and the consumer `BRPOP`s from it, so items
//! come out in publish order. A popped item is gone from Redis: when the handler
//! fails the item is lost, not redelivered, unlike the SQS backend.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use metrics::counter;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    config::{RedisConfig, TransportKind},
    error::{QueueError, QueueResult},
    message::{preview, QueueMessage},
    transport::{backoff, invoke_handler, MessageHandler, QueueTransport},
};

/// List operations the Redis backend needs
#[async_trait]
pub trait ListStore: Send + Sync {
    /// Pushes `payload` onto the head of `queue`
    async fn push(&self, queue: &str, payload: String) -> QueueResult<()>;

    /// Pops from the tail of `queue`, waiting up to `timeout` for an item
    async fn blocking_pop(&self, queue: &str, timeout: Duration) -> QueueResult<Option<String>>;

    /// Releases the underlying connection
    async fn release(&self) -> QueueResult<()>;
}

/// Redis connections used by [`RedisTransport`]
///
/// `BRPOP` holds its connection until an item arrives or the timeout expires,
/// so pops get a connection of their own and publishes never queue behind them.
pub struct RedisListStore {
    commands: ConnectionManager,
    blocking: ConnectionManager,
}

impl RedisListStore {
    /// Opens the command and blocking connections
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Connection` if the URL is invalid or the server
    /// cannot be reached
    pub async fn connect(url: &str) -> QueueResult<Self> {
        let client = Client::open(url).map_err(|e| QueueError::connection("connect", e))?;
        let commands = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| QueueError::connection("connect", e))?;
        let blocking = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::connection("connect", e))?;

        Ok(Self { commands, blocking })
    }
}

async fn quit(mut conn: ConnectionManager) -> QueueResult<()> {
    let (): () = redis::cmd("QUIT")
        .query_async(&mut conn)
        .await
        .map_err(|e| QueueError::connection("quit", e))?;
    Ok(())
}

#[async_trait]
impl ListStore for RedisListStore {
    async fn push(&self, queue: &str, payload: String) -> QueueResult<()> {
        let mut conn = self.commands.clone();
        conn.lpush::<_, _, ()>(queue, payload)
            .await
            .map_err(|e| QueueError::connection("lpush", e))
    }

    async fn blocking_pop(&self, queue: &str, timeout: Duration) -> QueueResult<Option<String>> {
        let mut conn = self.blocking.clone();
        let popped: Option<(String, String)> = conn
            .brpop(queue, timeout.as_secs_f64())
            .await
            .map_err(|e| QueueError::connection("brpop", e))?;

        Ok(popped.map(|(_list, element)| element))
    }

    async fn release(&self) -> QueueResult<()> {
        let commands = quit(self.commands.clone()).await;
        let blocking = quit(self.blocking.clone()).await;
        commands.and(blocking)
    }
}

/// Queue transport backed by a Redis list
pub struct RedisTransport<S = RedisListStore> {
    store: Arc<S>,
    config: RedisConfig,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl RedisTransport<RedisListStore> {
    /// Connects to the Redis server described by `config`
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Connection` if the URL is invalid or the server
    /// cannot be reached
    pub async fn connect(config: RedisConfig, shutdown: CancellationToken) -> QueueResult<Self> {
        let store = RedisListStore::connect(&config.url()).await?;

        info!(host = %config.host, port = config.port, "Connected to Redis");

        Ok(Self::new(Arc::new(store), config, shutdown))
    }
}

impl<S: ListStore> RedisTransport<S> {
    /// Creates a transport over an existing list store
    ///
    /// The consume loop stops once `shutdown` is cancelled.
    #[must_use]
    pub const fn new(store: Arc<S>, config: RedisConfig, shutdown: CancellationToken) -> Self {
        Self {
            store,
            config,
            shutdown,
            closed: AtomicBool::new(false),
        }
    }

    /// Pops one item and runs the handler on it
    ///
    /// Malformed items are logged and dropped. Pop and handler errors are
    /// returned; in both cases the item, if any, is already out of the list.
    async fn pop_and_handle(&self, handler: &dyn MessageHandler) -> QueueResult<()> {
        let Some(raw) = self
            .store
            .blocking_pop(&self.config.queue_name, self.config.pop_timeout)
            .await?
        else {
            return Ok(());
        };

        let message = match QueueMessage::from_json(&raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, raw = preview(&raw), "Discarding malformed message from queue");
                counter!("queue_messages_malformed", "transport" => "redis").increment(1);
                return Ok(());
            }
        };

        invoke_handler(handler, message).await?;
        counter!("queue_messages_processed", "transport" => "redis").increment(1);

        Ok(())
    }
}

#[async_trait]
impl<S: ListStore> QueueTransport for RedisTransport<S> {
    fn kind(&self) -> TransportKind {
        TransportKind::Redis
    }

    async fn publish(&self, message: &QueueMessage) -> QueueResult<()> {
        let body = message.to_json()?;
        self.store.push(&self.config.queue_name, body).await
    }

    async fn consume(&self, handler: &dyn MessageHandler) {
        info!(queue = %self.config.queue_name, "Starting Redis consumer");

        while !self.shutdown.is_cancelled() {
            if let Err(e) = self.pop_and_handle(handler).await {
                if matches!(e, QueueError::Handler(_)) {
                    counter!("queue_handler_failures", "transport" => "redis").increment(1);
                }
                error!(error = %e, "Redis consumer error");
                backoff(&self.shutdown, self.config.error_backoff).await;
            }
        }

        info!(queue = %self.config.queue_name, "Redis consumer stopped");
    }

    async fn close(&self) -> QueueResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.shutdown.cancel();
        self.store.release().await
    }
}

/// In-memory list store for tests
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
    use tokio::sync::Notify;

    use super::ListStore;
    use crate::error::{QueueError, QueueResult};

    /// A single list held in memory, ignoring the list name
    #[derive(Default)]
    pub struct InMemoryListStore {
        items: Mutex<VecDeque<String>>,
        failing_pops: AtomicUsize,
        pop_calls: AtomicUsize,
        releases: AtomicUsize,
        pushed: Notify,
    }

    impl InMemoryListStore {
        /// Creates an empty store
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes the next `count` pops fail with a connection error
        pub fn fail_next_pops(&self, count: usize) {
            self.failing_pops.store(count, Ordering::SeqCst);
        }

        /// Items still in the list, head first
        ///
        /// # Panics
        ///
        /// Panics if the list lock is poisoned
        #[must_use]
        pub fn items(&self) -> Vec<String> {
            self.items.lock().unwrap().iter().cloned().collect()
        }

        /// Number of pop attempts, failed ones included
        #[must_use]
        pub fn pop_calls(&self) -> usize {
            self.pop_calls.load(Ordering::SeqCst)
        }

        /// Number of times the connection was released
        #[must_use]
        pub fn releases(&self) -> usize {
            self.releases.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ListStore for InMemoryListStore {
        async fn push(&self, _queue: &str, payload: String) -> QueueResult<()> {
            self.items.lock().unwrap().push_front(payload);
            self.pushed.notify_one();
            Ok(())
        }

        async fn blocking_pop(&self, _queue: &str, timeout: Duration) -> QueueResult<Option<String>> {
            self.pop_calls.fetch_add(1, Ordering::SeqCst);

            let failing = self
                .failing_pops
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(QueueError::connection("brpop", "simulated connection reset"));
            }

            let popped = self.items.lock().unwrap().pop_back();
            if popped.is_some() {
                return Ok(popped);
            }

            // Blocks like BRPOP: wakes on a push or gives up after `timeout`
            let _ = tokio::time::timeout(timeout, self.pushed.notified()).await;
            Ok(self.items.lock().unwrap().pop_back())
        }

        async fn release(&self) -> QueueResult<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
