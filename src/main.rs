//! Stakechain node
//!
//! Opens the ledger, connects to peers and runs the node until interrupted.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use stakechain::{
    config::USAGE,
    consensus::{BlockProducer, BlockProducerConfig, ConsensusParams},
    crypto::Keypair,
    network::{BroadcastRelay, Message, Network, NetworkEvent, PeerId},
    node::{Ledger, Node},
    storage::open_database,
    types::{now_secs, timestamp_to_datetime, Address, SignedBlock},
    NodeConfig,
};

/// Pending network events before readers wait
const EVENT_CAPACITY: usize = 1024;

fn load_genesis(path: &Path) -> anyhow::Result<SignedBlock> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read genesis {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid genesis {}", path.display()))
}

fn open_ledger(config: &NodeConfig) -> anyhow::Result<(sled::Db, Ledger)> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("cannot create {}", config.data_dir.display()))?;
    let db = open_database(&config.data_dir.join("db"))?;
    let mut ledger = Ledger::open(&db, ConsensusParams::default())?;
    match &config.genesis_path {
        Some(path) => ledger.insert_genesis(&load_genesis(path)?)?,
        None if ledger.chain().length() == 0 => {
            bail!("empty database and no genesis configured, pass --genesis <PATH>")
        }
        None => {}
    }
    Ok((db, ledger))
}

fn deliver(outboxes: &HashMap<PeerId, mpsc::Sender<Message>>, outgoing: Vec<(PeerId, Message)>) {
    for (peer, message) in outgoing {
        let Some(outbox) = outboxes.get(&peer) else {
            continue;
        };
        if outbox.try_send(message).is_err() {
            warn!(peer, "outbox full, message dropped");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Some(config) = NodeConfig::from_args(std::env::args().skip(1))? else {
        println!("{USAGE}");
        return Ok(());
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))?;
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(version = stakechain::VERSION, "starting stakechain node");

    let keypair = if let Some(keypair) = config.keypair()? {
        keypair
    } else {
        warn!("no key seed configured, using an ephemeral key");
        Keypair::generate()
    };
    info!(address = %Address::from_public_key(keypair.public_key()), "node key");

    let (db, ledger) = open_ledger(&config)?;
    let tip = ledger.tip()?;
    info!(
        height = tip.header.block_number,
        c_sum = tip.header.c_sum,
        signed = ?timestamp_to_datetime(tip.header.time_signed),
        "chain loaded"
    );

    let producer = config
        .mine
        .then(|| BlockProducer::new(keypair, BlockProducerConfig::default()));
    if producer.is_some() {
        info!("block production enabled");
    }
    let mut node = Node::new(
        ledger,
        producer,
        BroadcastRelay::with_echoes(config.broadcast_echoes),
    );

    let (network, mut events) = Network::new(EVENT_CAPACITY);
    network.listen(&config.listen_addr).await?;
    for addr in &config.peers {
        if let Err(error) = network.dial(addr).await {
            warn!(addr = %addr, error = %error, "dial failed");
        }
    }

    let mut outboxes: HashMap<PeerId, mpsc::Sender<Message>> = HashMap::new();
    let mut ticker = tokio::time::interval(config.tick_interval());
    loop {
        let outgoing = tokio::select! {
            Some(event) = events.recv() => match event {
                NetworkEvent::PeerConnected { peer, addr, outbox } => {
                    info!(peer, addr = %addr, "peer connected");
                    outboxes.insert(peer, outbox);
                    node.peer_connected(peer);
                    vec![(peer, Message::SyncRequest)]
                }
                NetworkEvent::Message { peer, message } => {
                    node.handle_message(peer, message, now_secs())
                }
                NetworkEvent::PeerDisconnected(peer) => {
                    info!(peer, "peer disconnected");
                    outboxes.remove(&peer);
                    node.peer_disconnected(peer);
                    Vec::new()
                }
            },
            _ = ticker.tick() => node.tick(now_secs()),
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        };
        deliver(&outboxes, outgoing);
    }

    db.flush_async().await?;
    Ok(())
}
