//! Environment configuration for different deployment stages

use std::env;

use queue::{QueueResult, TransportConfig};

/// Application environment configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    /// Production environment
    Production,
    /// Staging environment
    Staging,
    /// Development environment (local Redis or `LocalStack`)
    Development,
}

impl Environment {
    /// Creates an Environment from the `APP_ENV` environment variable
    ///
    /// # Panics
    ///
    /// Panics if `APP_ENV` contains an invalid value
    #[must_use]
    pub fn from_env() -> Self {
        let env = env::var("APP_ENV")
            .unwrap_or_else(|_| "development".to_string())
            .trim()
            .to_lowercase();

        match env.as_str() {
            "production" => Self::Production,
            "staging" => Self::Staging,
            "development" => Self::Development,
            _ => panic!("Invalid environment: {env}"),
        }
    }

    /// Lowercase name, as accepted in `APP_ENV`
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Staging => "staging",
            Self::Development => "development",
        }
    }

    /// Whether logs are emitted as JSON for the log pipeline
    #[must_use]
    pub const fn json_logs(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }

    /// Service name attached to traces
    #[must_use]
    pub fn service_name(&self) -> String {
        env::var("SERVICE_NAME").unwrap_or_else(|_| "notification-service".to_string())
    }

    /// OTLP collector endpoint, e.g. `http://jaeger:4317`
    ///
    /// Traces are only exported when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
    #[must_use]
    pub fn otlp_endpoint(&self) -> Option<String> {
        env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .ok()
            .filter(|endpoint| !endpoint.trim().is_empty())
    }

    /// Queue transport configuration
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Configuration` if the transport settings are
    /// invalid, e.g. SQS is selected without `SQS_QUEUE_URL`
    pub fn transport_config(&self) -> QueueResult<TransportConfig> {
        TransportConfig::from_env()
    }
}

#[cfg(test)]
mod tests {
    use queue::{QueueError, TransportKind};
    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn test_environment_from_env() {
        // Test development (default)
        env::remove_var("APP_ENV");
        assert_eq!(Environment::from_env(), Environment::Development);

        // Test explicit development
        env::set_var("APP_ENV", "development");
        assert_eq!(Environment::from_env(), Environment::Development);

        // Test staging
        env::set_var("APP_ENV", "staging");
        assert_eq!(Environment::from_env(), Environment::Staging);

        // Test production
        env::set_var("APP_ENV", "production");
        assert_eq!(Environment::from_env(), Environment::Production);

        // Cleanup
        env::remove_var("APP_ENV");
    }

    #[test]
    #[serial]
    #[should_panic(expected = "Invalid environment: invalid")]
    fn test_invalid_environment() {
        env::set_var("APP_ENV", "invalid");
        let _ = Environment::from_env();
    }

    #[test]
    fn test_json_logs_outside_development() {
        assert!(Environment::Production.json_logs());
        assert!(Environment::Staging.json_logs());
        assert!(!Environment::Development.json_logs());
    }

    #[test]
    #[serial]
    fn test_name_matches_app_env_value() {
        for stage in [
            Environment::Production,
            Environment::Staging,
            Environment::Development,
        ] {
            env::set_var("APP_ENV", stage.name());
            assert_eq!(Environment::from_env(), stage);
        }
        env::remove_var("APP_ENV");
    }

    #[test]
    #[serial]
    fn test_otlp_endpoint_from_env() {
        env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT");
        assert_eq!(Environment::Development.otlp_endpoint(), None);

        env::set_var("OTEL_EXPORTER_OTLP_ENDPOINT", " ");
        assert_eq!(Environment::Development.otlp_endpoint(), None);

        env::set_var("OTEL_EXPORTER_OTLP_ENDPOINT", "http://jaeger:4317");
        assert_eq!(
            Environment::Production.otlp_endpoint().as_deref(),
            Some("http://jaeger:4317")
        );

        env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT");
    }

    #[test]
    #[serial]
    fn test_transport_config_follows_queue_transport() {
        env::remove_var("QUEUE_TRANSPORT");
        env::remove_var("SQS_QUEUE_URL");
        let config = Environment::Development.transport_config().unwrap();
        assert_eq!(config.kind(), TransportKind::Redis);

        env::set_var("QUEUE_TRANSPORT", "sqs");
        let result = Environment::Production.transport_config();
        assert!(matches!(result, Err(QueueError::Configuration(_))));

        env::remove_var("QUEUE_TRANSPORT");
    }
}
