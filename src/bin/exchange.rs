// src/bin/exchange.rs
//! Exchange process: order gateway -> FIFO sequencer -> matching engine ->
//! market-data publisher -> snapshot synthesizer, one pinned thread each,
//! wired with SPSC rings. Runs with stock parameters when no config file
//! is given; SIGINT drops the run flag for a clean teardown.

use anyhow::Context;
use log::{error, info};
use std::net::SocketAddrV4;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tickex::config::ExchangeConfig;
use tickex::engine::MatchingEngine;
use tickex::gateway::OrderGateway;
use tickex::messages::{ClientRequest, ClientResponse, MarketUpdate};
use tickex::publisher::MarketDataPublisher;
use tickex::spsc::SpscQueue;
use tickex::synthesizer::SnapshotSynthesizer;
use tickex::types::{MAX_CLIENT_UPDATES, MAX_MARKET_UPDATES};
use tickex::util::{init_logging, pin_to_core_if_set, RunFlag};
use tickex::{metrics, net};

fn main() -> anyhow::Result<()> {
    let cfg = match std::env::args().nth(1).map(PathBuf::from) {
        Some(p) => ExchangeConfig::from_file(&p)?,
        None => ExchangeConfig::default(),
    };
    init_logging(cfg.general.json_logs);
    info!("exchange starting: {cfg:?}");

    let run = Arc::new(RunFlag::default());
    {
        let r = run.clone();
        ctrlc::set_handler(move || r.stop()).context("install signal handler")?;
    }

    let metrics_handle = cfg.metrics.as_ref().map(|m| metrics::spawn_http(m.bind.clone()));

    // rings between the pipeline stages
    let q_requests: Arc<SpscQueue<ClientRequest>> = Arc::new(SpscQueue::new(MAX_CLIENT_UPDATES));
    let q_responses: Arc<SpscQueue<ClientResponse>> = Arc::new(SpscQueue::new(MAX_CLIENT_UPDATES));
    let q_updates: Arc<SpscQueue<MarketUpdate>> = Arc::new(SpscQueue::new(MAX_MARKET_UPDATES));
    let q_snapshot: Arc<SpscQueue<(u64, MarketUpdate)>> =
        Arc::new(SpscQueue::new(MAX_MARKET_UPDATES));

    let listener = net::tcp_listener(&cfg.order_gateway.bind)?;
    let inc_socket = net::mcast_send_socket(cfg.market_data.iface_addr)?;
    let snap_socket = net::mcast_send_socket(cfg.market_data.iface_addr)?;
    let inc_dest = SocketAddrV4::new(cfg.market_data.incremental_group, cfg.market_data.incremental_port);
    let snap_dest = SocketAddrV4::new(cfg.market_data.snapshot_group, cfg.market_data.snapshot_port);

    let spin = cfg.general.spin_loops_per_yield;

    let t_gateway = {
        let run = run.clone();
        let mut gw = OrderGateway::new(listener, q_requests.clone(), q_responses.clone());
        let core = cfg.cpu.gateway_core;
        thread::Builder::new().name("gateway".into()).spawn(move || {
            pin_to_core_if_set(core);
            gw.run(&run, spin);
        })?
    };

    let t_engine = {
        let run = run.clone();
        let mut engine = MatchingEngine::new(q_requests, q_responses, q_updates.clone());
        let core = cfg.cpu.engine_core;
        thread::Builder::new().name("engine".into()).spawn(move || {
            pin_to_core_if_set(core);
            engine.run(&run);
        })?
    };

    let t_publisher = {
        let run = run.clone();
        let mut publisher =
            MarketDataPublisher::new(q_updates, q_snapshot.clone(), inc_socket, inc_dest);
        let core = cfg.cpu.publisher_core;
        thread::Builder::new().name("publisher".into()).spawn(move || {
            pin_to_core_if_set(core);
            publisher.run(&run, spin);
        })?
    };

    let t_synthesizer = {
        let run = run.clone();
        let mut synth = SnapshotSynthesizer::new(
            q_snapshot,
            snap_socket,
            snap_dest,
            Duration::from_secs(cfg.market_data.snapshot_interval_secs),
        );
        let core = cfg.cpu.synthesizer_core;
        thread::Builder::new().name("synthesizer".into()).spawn(move || {
            pin_to_core_if_set(core);
            synth.run(&run, spin);
        })?
    };

    if t_gateway.join().is_err() {
        error!("gateway thread panicked");
        run.stop();
    }
    if t_engine.join().is_err() {
        error!("engine thread panicked");
        run.stop();
    }
    if t_publisher.join().is_err() {
        error!("publisher thread panicked");
        run.stop();
    }
    if t_synthesizer.join().is_err() {
        error!("synthesizer thread panicked");
    }

    if let Some(m) = &cfg.metrics {
        metrics::request_http_shutdown(&m.bind);
    }
    if let Some(h) = metrics_handle {
        let _ = h.join();
    }
    info!("clean shutdown");
    Ok(())
}
