use std::{env, time::Duration};

use aws_config::{retry::RetryConfig, timeout::TimeoutConfig, BehaviorVersion, Region};
use strum::{Display, EnumString};

use crate::error::{QueueError, QueueResult};

/// Name of the Redis list used as the local queue
pub const DEFAULT_REDIS_QUEUE: &str = "notifications";

/// Which backend carries the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TransportKind {
    /// Redis list, for local development
    Redis,
    /// AWS SQS, for deployed environments
    Sqs,
}

/// Settings for the Redis list backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    /// Redis host
    pub host: String,
    /// Redis port
    pub port: u16,
    /// List the messages are pushed to
    pub queue_name: String,
    /// How long a single blocking pop waits before the loop re-checks shutdown
    pub pop_timeout: Duration,
    /// Pause after a failed pop or handler
    pub error_backoff: Duration,
}

impl RedisConfig {
    /// Creates a config with the default list name and timings
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            queue_name: DEFAULT_REDIS_QUEUE.to_string(),
            pop_timeout: Duration::from_secs(1),
            error_backoff: Duration::from_secs(1),
        }
    }

    /// Connection URL for the Redis client
    #[must_use]
    pub fn url(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }
}

/// Settings for the SQS backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqsConfig {
    /// AWS region
    pub region: String,
    /// Endpoint override, e.g. `LocalStack`
    pub endpoint_url: Option<String>,
    /// Queue URL
    pub queue_url: String,
    /// Maximum number of messages to retrieve per receive call
    pub max_messages: i32,
    /// Long polling wait
    pub wait_time_seconds: i32,
    /// Pause after a failed receive call
    pub receive_backoff: Duration,
}

impl SqsConfig {
    /// Creates a config with the default batch size and timings
    #[must_use]
    pub fn new(region: impl Into<String>, queue_url: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            endpoint_url: None,
            queue_url: queue_url.into(),
            max_messages: 10,
            wait_time_seconds: 5,
            receive_backoff: Duration::from_secs(2),
        }
    }

    /// AWS configuration with region, endpoint override, retry and timeout settings
    pub async fn aws_config(&self) -> aws_config::SdkConfig {
        let retry_config = RetryConfig::standard()
            .with_max_attempts(3)
            .with_initial_backoff(Duration::from_millis(50));

        let timeout_config = TimeoutConfig::builder()
            .operation_timeout(Duration::from_secs(30))
            .build();

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(self.region.clone()))
            .retry_config(retry_config)
            .timeout_config(timeout_config);

        if let Some(endpoint_url) = &self.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }

        loader.load().await
    }
}

/// Backend selection plus the settings of the selected backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    /// Use the Redis list backend
    Redis(RedisConfig),
    /// Use the SQS backend
    Sqs(SqsConfig),
}

impl TransportConfig {
    /// Reads the transport configuration from the environment
    ///
    /// `QUEUE_TRANSPORT` selects the backend (`redis` by default). Redis reads
    /// `REDIS_HOST` and `REDIS_PORT`; SQS reads `AWS_REGION`, `SQS_ENDPOINT` and
    /// the required `SQS_QUEUE_URL`.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Configuration` if the backend name or port is
    /// invalid, or if SQS is selected without a queue URL
    pub fn from_env() -> QueueResult<Self> {
        let kind = match non_empty_var("QUEUE_TRANSPORT") {
            Some(value) => value.trim().parse::<TransportKind>().map_err(|_| {
                QueueError::Configuration(format!("Unknown QUEUE_TRANSPORT: {value}"))
            })?,
            None => TransportKind::Redis,
        };

        match kind {
            TransportKind::Redis => {
                let host = non_empty_var("REDIS_HOST").unwrap_or_else(|| "localhost".to_string());
                let port = match non_empty_var("REDIS_PORT") {
                    Some(value) => value.trim().parse().map_err(|_| {
                        QueueError::Configuration(format!("REDIS_PORT is not a valid port: {value}"))
                    })?,
                    None => 6379,
                };
                Ok(Self::Redis(RedisConfig::new(host, port)))
            }
            TransportKind::Sqs => {
                let queue_url = non_empty_var("SQS_QUEUE_URL").ok_or_else(|| {
                    QueueError::Configuration(
                        "SQS_QUEUE_URL environment variable is required".to_string(),
                    )
                })?;
                let region = non_empty_var("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string());

                let mut config = SqsConfig::new(region, queue_url);
                config.endpoint_url = non_empty_var("SQS_ENDPOINT");
                Ok(Self::Sqs(config))
            }
        }
    }

    /// Which backend this configuration selects
    #[must_use]
    pub const fn kind(&self) -> TransportKind {
        match self {
            Self::Redis(_) => TransportKind::Redis,
            Self::Sqs(_) => TransportKind::Sqs,
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}
