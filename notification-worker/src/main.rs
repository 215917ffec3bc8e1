use clap::{Parser, Subcommand};
use opentelemetry::trace::TraceContextExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use notification_worker::processor::NotificationProcessor;
use notification_worker::telemetry;
use notification_worker::types::environment::Environment;
use queue::{create_queue_transport, inject_trace_context, OrderEvent, QueueTransport};

#[derive(Parser)]
#[command(name = "notification-worker", about = "Order notification queue worker")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Consume notifications until interrupted (default)
    Consume,
    /// Publish a single `order_created` event and exit
    Publish {
        #[arg(long)]
        order_id: u32,
        #[arg(long, default_value_t = 1)]
        user_id: u32,
        #[arg(long, default_value = "customer")]
        user_name: String,
        #[arg(long, default_value_t = 0.0)]
        total: f64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env = Environment::from_env();
    telemetry::init(&env)?;

    let transport_config = env.transport_config().inspect_err(|e| {
        error!("Invalid queue configuration: {}", e);
    })?;
    info!(
        transport = %transport_config.kind(),
        "Starting notification worker in {:?} environment", env
    );

    let shutdown_token = CancellationToken::new();
    let transport = create_queue_transport(&transport_config, shutdown_token.clone()).await?;

    let result = match cli.command.unwrap_or(Command::Consume) {
        Command::Consume => {
            // Spawn signal handler
            let signal_shutdown = shutdown_token.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                info!("Received shutdown signal, initiating graceful shutdown...");
                signal_shutdown.cancel();
            });

            transport.consume(&NotificationProcessor::default()).await;
            Ok(())
        }
        Command::Publish {
            order_id,
            user_id,
            user_name,
            total,
        } => {
            let event = OrderEvent {
                kind: "order_created".to_string(),
                order_id: f64::from(order_id),
                user_id: f64::from(user_id),
                user_name,
                total,
                timestamp: chrono::Utc::now().to_rfc3339(),
            };
            publish_order(transport.as_ref(), event).await
        }
    };

    if let Err(e) = transport.close().await {
        error!("Failed to close queue transport: {}", e);
    }
    telemetry::shutdown();

    info!("Notification worker stopped");
    result
}

async fn publish_order(transport: &dyn QueueTransport, event: OrderEvent) -> anyhow::Result<()> {
    let span = info_span!("publish_order", order_id = event.order_id);
    let trace_id = span.context().span().span_context().trace_id();

    async move {
        let message = inject_trace_context(event);
        transport.publish(&message).await?;
        info!(%trace_id, "Order event published");
        Ok(())
    }
    .instrument(span)
    .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
