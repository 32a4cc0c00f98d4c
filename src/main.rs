// # QuorumKV simulation driver
//
// Boots an in-process cluster on the in-memory transport, drives the tick
// loop, issues sample CRUD traffic partway through, and dumps the event log
// as JSON lines on exit.
//
// Usage: quorum-kv-sim [--peers N] [--ticks T] [--interval-ms M]

use quorum_kv::event::MemoryEventLog;
use quorum_kv::net::{MemoryNetwork, SimClock};
use quorum_kv::{Address, Peer, PeerConfig, Result, VERSION};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

struct SimOptions {
    peers: u32,
    ticks: u32,
    interval: Duration,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            peers: 10,
            ticks: 120,
            interval: Duration::from_millis(10),
        }
    }
}

fn parse_options() -> Result<SimOptions> {
    let mut options = SimOptions::default();
    let mut args = std::env::args().skip(1);
    while let Some(flag) = args.next() {
        let value = args.next().ok_or_else(|| {
            quorum_kv::KvError::Configuration(format!("missing value for {flag}"))
        })?;
        match flag.as_str() {
            "--peers" => {
                options.peers = value.parse().map_err(|_| {
                    quorum_kv::KvError::Configuration(format!("invalid peer count {value}"))
                })?
            }
            "--ticks" => {
                options.ticks = value.parse().map_err(|_| {
                    quorum_kv::KvError::Configuration(format!("invalid tick count {value}"))
                })?
            }
            "--interval-ms" => {
                let ms: u64 = value.parse().map_err(|_| {
                    quorum_kv::KvError::Configuration(format!("invalid interval {value}"))
                })?;
                options.interval = Duration::from_millis(ms);
            }
            other => {
                return Err(quorum_kv::KvError::Configuration(format!(
                    "unknown flag {other}"
                )))
            }
        }
    }
    if options.peers == 0 {
        return Err(quorum_kv::KvError::Configuration(
            "at least one peer is required".to_string(),
        ));
    }
    Ok(options)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let options = parse_options()?;
    info!(version = VERSION, peers = options.peers, ticks = options.ticks, "starting simulation");

    let network = Arc::new(MemoryNetwork::new());
    let clock = Arc::new(SimClock::new());
    let log = Arc::new(MemoryEventLog::new());

    let mut peers: Vec<Peer> = (1..=options.peers)
        .map(|id| {
            Peer::new(
                Address::new(id, 0),
                PeerConfig::default(),
                network.clone(),
                clock.clone(),
                log.clone(),
            )
        })
        .collect::<Result<_>>()?;

    // CRUD traffic starts once the membership has had time to converge.
    let warmup = 30.min(options.ticks / 2);
    let sample_keys = ["alpha", "beta", "gamma"];

    let mut interval = tokio::time::interval(options.interval);
    for round in 0..options.ticks {
        interval.tick().await;
        clock.advance();
        for peer in peers.iter_mut() {
            peer.tick();
        }

        if round == warmup {
            let peer_count = peers.len();
            for (i, key) in sample_keys.iter().enumerate() {
                let value = format!("value-{key}");
                peers[i % peer_count].create(key, &value);
            }
        }
        if round == warmup + 10 {
            let peer_count = peers.len();
            for (i, key) in sample_keys.iter().enumerate() {
                peers[(i + 1) % peer_count].read(key);
            }
        }
    }

    let member_counts: Vec<usize> = peers.iter().map(|p| p.live_peers().len()).collect();
    info!(?member_counts, events = log.len(), "simulation finished");

    print!("{}", log.to_json_lines());
    Ok(())
}
