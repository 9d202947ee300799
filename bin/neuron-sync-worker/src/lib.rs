use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::Result;
use neuron_indexer::worker::{RpcSourceFactory, SourceFactory, SyncWorker, WorkerConfig, WorkerMessage};
use neuron_indexer::SyncConfig;
use neuron_sdk::networks::NetworkRegistry;
use neuron_sdk::DatabaseLocation;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct WorkerArgs {
    /// Database location for wallet databases, one of "memory" or a path to a directory
    #[arg(long, env)]
    pub database_location: DatabaseLocation,

    /// Sleep between tip polls once the wallet is synced
    #[arg(long, env, default_value = "5000")]
    pub poll_interval_ms: u64,

    /// Number of blocks scanned before polling the tip again
    #[arg(long, env, default_value = "100")]
    pub block_batch_size: u64,

    /// Wait before retrying after the node could not be reached
    #[arg(long, env, default_value = "5000")]
    pub retry_interval_ms: u64,

    /// Page size for indexer queries
    #[arg(long, env, default_value = "200")]
    pub indexer_page_size: u32,

    /// JSON file with extra networks, merged over the built-in ones
    #[arg(long, env)]
    pub networks_file: Option<PathBuf>,
}

impl WorkerArgs {
    pub fn worker_config(&self) -> Result<WorkerConfig> {
        let networks = match &self.networks_file {
            Some(path) => NetworkRegistry::load(path)?,
            None => NetworkRegistry::builtin()?,
        };
        Ok(WorkerConfig {
            database_location: self.database_location.clone(),
            sync: SyncConfig {
                poll_interval: Duration::from_millis(self.poll_interval_ms),
                block_batch_size: self.block_batch_size.max(1),
                retry_interval: Duration::from_millis(self.retry_interval_ms),
                indexer_page_size: self.indexer_page_size.max(1),
            },
            networks,
        })
    }
}

/// Speaks the worker protocol as JSON lines over `reader`/`writer` until a kill message
/// arrives or the input ends. All responses are flushed before this returns.
pub async fn serve<R, W>(args: WorkerArgs, reader: R, writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    serve_with_sources(args.worker_config()?, Arc::new(RpcSourceFactory), reader, writer).await
}

pub async fn serve_with_sources<R, W>(
    config: WorkerConfig,
    sources: Arc<dyn SourceFactory>,
    reader: R,
    writer: W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (inbox_tx, inbox_rx) = mpsc::channel(64);
    let (outbox_tx, outbox_rx) = mpsc::channel(64);

    let worker = SyncWorker::new(config, sources);
    let reader_handle = tokio::spawn(read_messages(reader, inbox_tx, worker.kill_switch()));
    let writer_handle = tokio::spawn(write_messages(writer, outbox_rx));

    info!("Sync worker ready");
    let worker_result = worker.run(inbox_rx, outbox_tx).await;
    reader_handle.abort();
    writer_handle.await??;
    worker_result
}

/// Forwards parsed messages to the worker. A kill also trips `kill` right away so it
/// does not wait behind calls already queued.
async fn read_messages<R>(
    reader: R,
    inbox: mpsc::Sender<WorkerMessage>,
    kill: CancellationToken,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<WorkerMessage>(&line) {
            Ok(message) => {
                if message == WorkerMessage::Kill {
                    kill.cancel();
                    break;
                }
                if inbox.send(message).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!(error = %e, "Dropping unparsable message"),
        }
    }
    debug!("Input closed");
    Ok(())
}

async fn write_messages<W>(mut writer: W, mut outbox: mpsc::Receiver<WorkerMessage>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbox.recv().await {
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
    }
    writer.shutdown().await?;
    Ok(())
}
