//! Consumes every shard of a Kinesis stream with a bounded pool of shard workers.
//!
//! The [scheduler::Scheduler] ticks a [poller::Poller] that lists the shards and admits
//! unleased ones into the [lease::LeaseTable] up to the pool size. Each admitted shard gets a
//! [worker::ShardWorker] that fetches batches from where the [cursor::CursorStore] left off,
//! decodes them against the schema resolved at startup and hands them to an
//! [codec::Observer]. A worker that fails releases its lease so the shard is picked up again on
//! a later tick.
use std::path::PathBuf;
use std::sync::Arc;

use shardflow_glue::codec::GlueAvroCodec;
use shardflow_glue::registry::{GlueRegistry, GlueRegistryBuilder, SchemaVersion};
use shardflow_kinesis::sink::KinesisSinkBuilder;
use shardflow_kinesis::source::KinesisSourceBuilder;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod error;
pub use crate::error::{Error, Result};

pub mod codec;
pub mod config;
pub mod cursor;
pub mod lease;
pub mod poller;
pub mod producer;
pub mod scheduler;
pub mod schema;
pub mod upstream;
pub mod worker;

mod idle;

#[cfg(test)]
mod test_utils;

use crate::codec::{LogObserver, SchemaRegistry};
use crate::config::Settings;
use crate::producer::{DEMO_SCHEMA, Producer};
use crate::scheduler::{Scheduler, SchedulerConfig};

/// Consumes the stream until SIGINT or SIGTERM.
pub async fn consume(settings: &Settings) -> Result<()> {
    let cancel = CancellationToken::new();
    let shutdown_handle = spawn_shutdown_listener(cancel.clone());

    let result = start_scheduler(settings, cancel).await;
    if !shutdown_handle.is_finished() {
        shutdown_handle.abort();
    }
    if let Err(e) = &result {
        error!(?e, "Consumer failed");
        return result;
    }

    info!("Gracefully Exiting...");
    Ok(())
}

async fn start_scheduler(settings: &Settings, cancel: CancellationToken) -> Result<()> {
    let source = KinesisSourceBuilder::new(settings.kinesis_config())
        .build()
        .await?;
    let registry = registry(settings).await?;

    // resolved once, every record is decoded against this version
    let schema = SchemaRegistry::latest(&registry, &settings.schema_name).await?;
    info!(
        schema_name = settings.schema_name,
        version_id = %schema.version_id,
        "Resolved reader schema"
    );
    let codec = GlueAvroCodec::new(registry).with_schema(&SchemaVersion::from(&schema))?;

    let scheduler = Scheduler::new(
        source,
        codec,
        schema,
        Arc::new(LogObserver),
        SchedulerConfig::from(settings),
    );
    scheduler.run(cancel).await?;
    Ok(())
}

/// Writes demo records to the stream until SIGINT or SIGTERM, registering the demo schema
/// first if needed.
pub async fn produce(settings: &Settings) -> Result<()> {
    let cancel = CancellationToken::new();
    let shutdown_handle = spawn_shutdown_listener(cancel.clone());

    let registry = registry(settings).await?;
    let schema =
        SchemaRegistry::get_or_register(&registry, &settings.schema_name, DEMO_SCHEMA).await?;
    let codec = GlueAvroCodec::new(registry).with_schema(&SchemaVersion::from(&schema))?;
    let sink = KinesisSinkBuilder::new(settings.kinesis_config(), &settings.stream_name)
        .build()
        .await?;

    let producer = Producer::new(sink, codec, schema, settings.produce_interval);
    let result = producer.run(cancel).await;
    if !shutdown_handle.is_finished() {
        shutdown_handle.abort();
    }
    result?;

    info!("Gracefully Exiting...");
    Ok(())
}

/// Prints the latest definition of the configured schema, saving it to `output` if given.
pub async fn print_schema(settings: &Settings, output: Option<PathBuf>) -> Result<()> {
    let registry = registry(settings).await?;
    let definition =
        schema::fetch_latest(&registry, &settings.schema_name, output.as_deref()).await?;
    println!("{definition}");
    Ok(())
}

async fn registry(settings: &Settings) -> Result<GlueRegistry> {
    Ok(
        GlueRegistryBuilder::new(settings.glue_config(), &settings.registry_name)
            .build()
            .await?,
    )
}

/// Cancels `cancel` on SIGINT or SIGTERM.
fn spawn_shutdown_listener(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel();
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => {
                error!(?e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received terminate signal");
            }
            Err(e) => {
                error!(?e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
