use clap::{Parser, Subcommand};
use log::{error, info};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use retry_worker::task::order_email::SendOrderEmail;
use retry_worker::transport::SqliteTransport;
use retry_worker::{Consumer, QueueTransport, TaskEnqueuer, WorkerConfig};

/// Order email worker and producer over a SQLite-backed queue.
#[derive(Debug, Parser)]
#[command(name = "retry-worker", version, about)]
struct Cli {
    /// Queue database (overrides RETRY_WORKER_DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    /// Queue topic (overrides RETRY_WORKER_TOPIC)
    #[arg(long)]
    topic: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Consume order emails until Ctrl-C
    Worker {
        /// Simulated time to send one email
        #[arg(long, default_value_t = 4000)]
        latency_ms: u64,
        /// Number of initial send attempts that fail
        #[arg(long, default_value_t = 0)]
        fail_first: usize,
        /// Probability (0.0 to 1.0) that any later send attempt fails
        #[arg(long, default_value_t = 0.0)]
        failure_rate: f64,
    },
    /// Publish order messages
    Enqueue {
        /// How many orders to publish
        #[arg(long, default_value_t = 1)]
        count: u64,
        /// Id of the first order; defaults to the current time in milliseconds
        #[arg(long)]
        order_id: Option<u64>,
        /// Simulated time to create each order before it is published
        #[arg(long, default_value_t = 2000)]
        create_delay_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = WorkerConfig::from_env()?;
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }
    if let Some(topic) = cli.topic {
        config.topic = topic;
    }

    let transport = Arc::new(SqliteTransport::new(&config.database_url).await?);
    if let Err(err) = transport.init().await {
        close_quietly(transport.as_ref()).await;
        return Err(err.into());
    }

    match cli.command {
        Command::Worker {
            latency_ms,
            fail_first,
            failure_rate,
        } => {
            // Claims younger than the lease may belong to a live worker.
            if let Err(err) = transport.recover(config.claim_lease).await {
                close_quietly(transport.as_ref()).await;
                return Err(err.into());
            }
            let action = SendOrderEmail::new(Duration::from_millis(latency_ms))
                .failing_first(fail_first)
                .with_failure_rate(failure_rate);
            let consumer = Consumer::new(transport, Arc::new(action), config.consumer_options());

            consumer
                .run(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Failed to listen for Ctrl-C: {}", e);
                        std::future::pending::<()>().await;
                    }
                })
                .await?;
        }
        Command::Enqueue {
            count,
            order_id,
            create_delay_ms,
        } => {
            let first = order_id.unwrap_or_else(|| {
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|elapsed| elapsed.as_millis() as u64)
                    .unwrap_or_default()
            });
            let enqueuer = TaskEnqueuer::new(transport, config.topic.clone());
            let queued = enqueuer
                .enqueue_orders(
                    first..first.saturating_add(count),
                    Duration::from_millis(create_delay_ms),
                )
                .await?;
            info!("{} order(s) queued on '{}'", queued, config.topic);
        }
    }

    Ok(())
}

async fn close_quietly(transport: &SqliteTransport) {
    if let Err(err) = transport.close().await {
        error!("Failed to close transport: {}", err);
    }
}
