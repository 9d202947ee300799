//! The sync worker: a message driven actor owning at most one running sync.
//!
//! Callers talk to it with [`WorkerMessage`]s. Every `call` gets exactly one `response`
//! echoing its id and channel, and calls are answered in the order they arrive.

use std::sync::Arc;

use neuron_core::{Script, H256};
use neuron_sdk::indexer::{collect_live_cells, IndexerSource, SearchKey};
use neuron_sdk::networks::{ChainType, Network, NetworkRegistry, NetworkType};
use neuron_sdk::rpc::{ChainSource, CkbRpcClient};
use neuron_sdk::DatabaseLocation;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_rusqlite::Connection;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::chain_info::ChainInfoLoader;
use crate::checkpoint::SyncCheckpoint;
use crate::db;
use crate::engine::{SyncConfig, SyncEngine};
use crate::error::{IndexerError, WorkerError};
use crate::models::{AddressMeta, ChainContext, LiveCell, SyncStatus, WalletLocks};

pub const START_CHANNEL: &str = "start";
pub const QUERY_INDEXER_CHANNEL: &str = "queryIndexer";
pub const UNMOUNT_CHANNEL: &str = "unmount";
pub const SYNC_STATUS_CHANNEL: &str = "syncStatus";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerMessage {
    Call(CallMessage),
    Response(ResponseMessage),
    Kill,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallMessage {
    pub id: u64,
    pub channel: String,
    #[serde(default)]
    pub message: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub id: u64,
    pub channel: String,
    pub message: ResponsePayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "content", rename_all = "lowercase")]
pub enum ResponsePayload {
    Ok(Value),
    Error(ErrorDetail),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl From<&WorkerError> for ErrorDetail {
    fn from(err: &WorkerError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartParams {
    /// Genesis the caller expects the node to be on.
    pub genesis_hash: H256,
    #[serde(alias = "url")]
    pub remote_url: String,
    #[serde(alias = "addressMetas")]
    pub wallet_address_metas: Vec<AddressMeta>,
    #[serde(default)]
    pub indexer_url: Option<String>,
    #[serde(default)]
    pub start_block_number: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryIndexerParams {
    pub script: Script,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerRequest {
    Start(StartParams),
    QueryIndexer(Script),
    Unmount,
    SyncStatus,
}

impl WorkerRequest {
    pub fn parse(channel: &str, message: Value) -> Result<Self, WorkerError> {
        match channel {
            START_CHANNEL => Ok(WorkerRequest::Start(params(channel, message)?)),
            QUERY_INDEXER_CHANNEL => {
                let query: QueryIndexerParams = params(channel, message)?;
                Ok(WorkerRequest::QueryIndexer(query.script))
            }
            UNMOUNT_CHANNEL => Ok(WorkerRequest::Unmount),
            SYNC_STATUS_CHANNEL => Ok(WorkerRequest::SyncStatus),
            other => Err(WorkerError::UnknownChannel(other.to_string())),
        }
    }
}

fn params<T: DeserializeOwned>(channel: &str, message: Value) -> Result<T, WorkerError> {
    serde_json::from_value(message).map_err(|e| WorkerError::InvalidMessage {
        channel: channel.to_string(),
        reason: e.to_string(),
    })
}

/// Builds the node and indexer clients for a `start` call.
pub trait SourceFactory: Send + Sync {
    fn chain(&self, url: &str) -> neuron_sdk::Result<Arc<dyn ChainSource>>;
    fn indexer(&self, url: &str) -> neuron_sdk::Result<Arc<dyn IndexerSource>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RpcSourceFactory;

impl SourceFactory for RpcSourceFactory {
    fn chain(&self, url: &str) -> neuron_sdk::Result<Arc<dyn ChainSource>> {
        Ok(Arc::new(CkbRpcClient::new(url)?))
    }

    fn indexer(&self, url: &str) -> neuron_sdk::Result<Arc<dyn IndexerSource>> {
        Ok(Arc::new(CkbRpcClient::new(url)?))
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_location: DatabaseLocation,
    pub sync: SyncConfig,
    pub networks: NetworkRegistry,
}

struct ActiveSync {
    cancel: CancellationToken,
    handle: JoinHandle<crate::error::Result<()>>,
    status: watch::Receiver<SyncStatus>,
    conn: Arc<Connection>,
    indexer: Option<Arc<dyn IndexerSource>>,
}

pub struct SyncWorker {
    config: WorkerConfig,
    sources: Arc<dyn SourceFactory>,
    active: Option<ActiveSync>,
    kill: CancellationToken,
}

impl SyncWorker {
    pub fn new(config: WorkerConfig, sources: Arc<dyn SourceFactory>) -> Self {
        Self {
            config,
            sources,
            active: None,
            kill: CancellationToken::new(),
        }
    }

    /// Cancelling the returned token kills the worker without waiting for the call in
    /// progress or for messages queued before the kill.
    pub fn kill_switch(&self) -> CancellationToken {
        self.kill.clone()
    }

    /// Serves messages from `inbox` until a `kill` arrives or the inbox closes. A closed
    /// inbox stops the running sync gracefully; `kill` aborts it.
    pub async fn run(
        mut self,
        mut inbox: mpsc::Receiver<WorkerMessage>,
        outbox: mpsc::Sender<WorkerMessage>,
    ) -> eyre::Result<()> {
        let kill = self.kill.clone();
        loop {
            let message = tokio::select! {
                biased;
                _ = kill.cancelled() => WorkerMessage::Kill,
                message = inbox.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            match message {
                WorkerMessage::Call(call) => {
                    let dispatched = tokio::select! {
                        biased;
                        _ = kill.cancelled() => None,
                        payload = self.dispatch(call.channel.as_str(), call.message) => Some(payload),
                    };
                    let Some(payload) = dispatched else {
                        info!(id = call.id, channel = %call.channel, "Killed during call");
                        self.abort();
                        return Ok(());
                    };
                    let response = WorkerMessage::Response(ResponseMessage {
                        id: call.id,
                        channel: call.channel,
                        message: payload,
                    });
                    outbox
                        .send(response)
                        .await
                        .map_err(|_| eyre::eyre!("Response channel closed"))?;
                }
                WorkerMessage::Response(response) => {
                    warn!(id = response.id, channel = %response.channel, "Ignoring unexpected response");
                }
                WorkerMessage::Kill => {
                    info!("Kill received");
                    self.abort();
                    return Ok(());
                }
            }
        }
        self.stop().await;
        Ok(())
    }

    pub async fn dispatch(&mut self, channel: &str, message: Value) -> ResponsePayload {
        let result = match WorkerRequest::parse(channel, message) {
            Ok(request) => self.handle(request).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(content) => ResponsePayload::Ok(content),
            Err(e) => {
                warn!(channel, error = %e, "Call failed");
                ResponsePayload::Error(ErrorDetail::from(&e))
            }
        }
    }

    pub async fn handle(&mut self, request: WorkerRequest) -> Result<Value, WorkerError> {
        match request {
            WorkerRequest::Start(params) => self.start(params).await,
            WorkerRequest::QueryIndexer(script) => self.query_indexer(script).await,
            WorkerRequest::Unmount => {
                self.stop().await;
                Ok(Value::Bool(true))
            }
            WorkerRequest::SyncStatus => {
                let active = self.active.as_ref().ok_or(WorkerError::NotStarted)?;
                let status = *active.status.borrow();
                Ok(serde_json::to_value(status)?)
            }
        }
    }

    async fn start(&mut self, params: StartParams) -> Result<Value, WorkerError> {
        self.stop().await;

        let network = self.resolve_network(&params);
        let chain = self.sources.chain(&params.remote_url)?;
        let indexer = params
            .indexer_url
            .as_deref()
            .map(|url| self.sources.indexer(url))
            .transpose()?;

        let loaded = ChainInfoLoader::new(self.config.database_location.clone())
            .load(chain.as_ref(), &network)
            .await?;
        let locks = WalletLocks::from_address_metas(&params.wallet_address_metas)?;
        SyncCheckpoint::new(loaded.conn.clone())
            .register_lock_hashes(
                locks.hashes().iter().copied().collect(),
                params.start_block_number.unwrap_or(0),
            )
            .await?;

        let context = ChainContext {
            prefix: network.address_prefix(),
            dao_type_hash: loaded.info.system_scripts.dao_type_hash,
            node_url: params.remote_url.clone(),
        };
        let engine = SyncEngine::new(
            loaded.conn.clone(),
            chain,
            indexer.clone(),
            context,
            locks,
            self.config.sync.clone(),
        )
        .await?;
        let status = engine.subscribe();
        let cancel = CancellationToken::new();
        let span = info_span!("sync", network = %network.id, genesis = %loaded.info.genesis_hash);
        let handle = tokio::spawn(engine.run(cancel.clone()).instrument(span));

        self.active = Some(ActiveSync {
            cancel,
            handle,
            status,
            conn: loaded.conn,
            indexer,
        });
        Ok(json!({
            "genesisHash": loaded.info.genesis_hash,
            "matchesNetwork": loaded.matches_network,
        }))
    }

    /// Live cells of `script`. Without a running sync there is no data, which answers
    /// an empty list.
    async fn query_indexer(&self, script: Script) -> Result<Value, WorkerError> {
        let Some(active) = self.active.as_ref() else {
            return Ok(json!([]));
        };
        let cells: Vec<LiveCell> = match &active.indexer {
            Some(indexer) => collect_live_cells(
                indexer.as_ref(),
                &SearchKey::lock(script),
                self.config.sync.indexer_page_size,
            )
            .await
            .map_err(IndexerError::from)?
            .into_iter()
            .map(LiveCell::from)
            .collect(),
            None => db::get_live_cells_by_lock_hash(&active.conn, script.compute_hash()).await?,
        };
        Ok(serde_json::to_value(cells)?)
    }

    /// Known network by remote url, then by genesis; otherwise an ad hoc devnet entry.
    /// The expected genesis is always the caller's.
    fn resolve_network(&self, params: &StartParams) -> Network {
        let registry = &self.config.networks;
        let known = registry.find_by_remote(&params.remote_url).or_else(|| {
            registry
                .networks()
                .iter()
                .find(|n| n.genesis_hash == params.genesis_hash)
        });
        let mut network = match known {
            Some(network) => network.clone(),
            None => Network {
                id: params.genesis_hash.to_hex(),
                name: "Devnet".to_string(),
                remote: params.remote_url.clone(),
                genesis_hash: params.genesis_hash,
                chain: ChainType::Devnet,
                network_type: NetworkType::Normal,
            },
        };
        network.genesis_hash = params.genesis_hash;
        network
    }

    /// Cancels the running sync and waits for the block in flight to be committed.
    async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.cancel.cancel();
        match active.handle.await {
            Ok(Ok(())) => info!("Sync stopped"),
            Ok(Err(e)) => warn!(error = %e, "Sync had already stopped on error"),
            Err(e) => error!(error = %e, "Sync task did not finish cleanly"),
        }
    }

    fn abort(&mut self) {
        if let Some(active) = self.active.take() {
            active.handle.abort();
        }
    }
}
