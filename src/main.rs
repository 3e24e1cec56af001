//! Batch aggregator service.
//!
//! Reads deliveries as JSON lines on stdin, writes batch-ready notifications as JSON lines on
//! stdout, and serves metrics and health endpoints over HTTP. Configured from the environment.
//!
//! ```bash
//! BATCH_SIZE=3 LOCAL_CACHE_PATH=/tmp/cache batch-aggregator < deliveries.jsonl
//! ```

use std::{process::ExitCode, sync::Arc};

use anyhow::Context;
use batch_aggregator::{
    broker::{connect_with_retry, run_consumer, RetryPolicy},
    line_broker::LineConnector,
    memory::MemoryCache,
    server::{self, ServerState},
    sink::{BatchSink, CacheSink, MetadataCache, ObjectStore, ObjectStoreSink},
    Aggregator, AggregatorConfig, BrokerConfig, FsObjectStore, Metrics, ServiceConfig,
};
use tokio::io::{stdin, stdout, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("AGGREGATOR_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout carries notifications.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> anyhow::Result<()> {
    let config = AggregatorConfig::from_env().context("invalid aggregator configuration")?;
    let service = ServiceConfig::from_env().context("invalid service configuration")?;
    let broker_config = BrokerConfig::from_env(config.batch_size());

    info!(
        %config,
        ?broker_config,
        "Starting batch aggregator v{}",
        env!("CARGO_PKG_VERSION")
    );

    let metrics = Metrics::new().context("registering metrics")?;
    let state = ServerState::new(metrics.clone());
    let server = tokio::spawn({
        let state = state.clone();
        let port = service.metrics_port;
        async move {
            if let Err(err) = server::serve(port, state).await {
                error!("Metrics server failed: {err}");
            }
        }
    });

    let connector = LineConnector::new(BufReader::new(stdin()), stdout());
    let connection =
        connect_with_retry(&connector, &broker_config, &RetryPolicy::from(&service)).await?;
    state.set_connected(true);

    let cache: Option<Arc<dyn MetadataCache>> = service
        .metadata_cache_enabled
        .then(|| Arc::new(MemoryCache::new()) as Arc<dyn MetadataCache>);
    let object_store: Option<Arc<dyn ObjectStore>> = service.object_store_enabled.then(|| {
        Arc::new(FsObjectStore::new(&service.local_cache_path, config.namespace()))
            as Arc<dyn ObjectStore>
    });
    let sinks: Vec<Arc<dyn BatchSink>> = vec![
        Arc::new(CacheSink::new(cache)),
        Arc::new(ObjectStoreSink::new(object_store.clone())),
    ];

    let aggregator = Aggregator::builder()
        .config(config)
        .acknowledger(connection.acknowledger)
        .notifier(connection.notifier)
        .sinks(sinks)
        .maybe_object_store(object_store)
        .metrics(metrics)
        .build();

    let signalled = tokio::select! {
        result = run_consumer(&aggregator, connection.deliveries) => {
            match result {
                Ok(summary) => info!(
                    "Broker stream ended: {} items admitted, {} malformed",
                    summary.admitted, summary.malformed
                ),
                Err(err) => error!("Consuming stopped: {err}"),
            }
            false
        }
        _ = shutdown_signal() => true,
    };
    state.set_connected(false);

    let worker = aggregator.worker_handle();
    worker.shut_down().await;
    worker.wait_for_shutdown().await;

    if !signalled {
        warn!("No broker connection, idling until signalled");
        shutdown_signal().await;
    }

    info!("Shutting down");
    server.abort();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("Unable to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
