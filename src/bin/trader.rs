// src/bin/trader.rs
//! Participant process: market-data consumer and order-gateway client on
//! their own threads, with the main thread applying coherent updates to
//! the local books and (in random mode) driving randomized order flow
//! through the full stack.
//!
//! Usage: trader <client_id> <algo> [config.toml]   (algo: random | none)

use anyhow::{bail, Context};
use log::{info, warn};
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tickex::config::TraderConfig;
use tickex::consumer::MarketDataConsumer;
use tickex::gw_client::OrderGatewayClient;
use tickex::market_book::MarketOrderBook;
use tickex::messages::{ClientRequest, ClientRequestType, ClientResponse, MarketUpdate};
use tickex::spsc::SpscQueue;
use tickex::types::*;
use tickex::util::{init_logging, pin_to_core_if_set, spin_wait, RunFlag};
use tickex::{metrics, util};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Algo {
    /// Randomized NEW/CANCEL flow; exercises the full participant stack.
    Random,
    /// Consume market data only.
    None,
}

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let client_id: ClientId = args
        .next()
        .context("usage: trader <client_id> <algo> [config.toml]")?
        .parse()
        .context("client_id must be an integer")?;
    let algo = match args.next().as_deref() {
        Some("random") => Algo::Random,
        Some("none") | None => Algo::None,
        Some(other) => bail!("unknown algo {other:?} (expected: random | none)"),
    };
    let cfg = match args.next().map(PathBuf::from) {
        Some(p) => TraderConfig::from_file(&p)?,
        None => TraderConfig::default(),
    };
    init_logging(cfg.general.json_logs);
    info!("trader starting: client {client_id} algo {algo:?} {cfg:?}");

    let run = Arc::new(RunFlag::default());
    {
        let r = run.clone();
        ctrlc::set_handler(move || r.stop()).context("install signal handler")?;
    }
    let metrics_handle = cfg.metrics.as_ref().map(|m| metrics::spawn_http(m.bind.clone()));

    let q_md: Arc<SpscQueue<MarketUpdate>> = Arc::new(SpscQueue::new(MAX_MARKET_UPDATES));
    let q_requests: Arc<SpscQueue<ClientRequest>> = Arc::new(SpscQueue::new(MAX_CLIENT_UPDATES));
    let q_responses: Arc<SpscQueue<ClientResponse>> = Arc::new(SpscQueue::new(MAX_CLIENT_UPDATES));

    let spin = cfg.general.spin_loops_per_yield;

    let t_consumer = {
        let run = run.clone();
        let mut consumer = MarketDataConsumer::new(cfg.market_data.clone(), q_md.clone())?;
        let core = cfg.cpu.consumer_core;
        thread::Builder::new().name("md-consumer".into()).spawn(move || {
            pin_to_core_if_set(core);
            consumer.run(&run, spin);
        })?
    };

    let t_gw_client = {
        let run = run.clone();
        let mut client = OrderGatewayClient::connect(
            &cfg.order_gateway.connect,
            client_id,
            q_requests.clone(),
            q_responses.clone(),
        )?;
        let core = cfg.cpu.gateway_core;
        thread::Builder::new().name("order-gw".into()).spawn(move || {
            pin_to_core_if_set(core);
            client.run(&run, spin);
        })?
    };

    trade_loop(&run, algo, spin, &q_md, &q_requests, &q_responses);

    if t_consumer.join().is_err() {
        warn!("consumer thread panicked");
    }
    if t_gw_client.join().is_err() {
        warn!("order gateway client thread panicked");
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

fn trade_loop(
    run: &RunFlag,
    algo: Algo,
    spin: u32,
    q_md: &SpscQueue<MarketUpdate>,
    q_requests: &SpscQueue<ClientRequest>,
    q_responses: &SpscQueue<ClientResponse>,
) {
    let mut book = MarketOrderBook::new();
    let mut rng = rand::thread_rng();
    let mut next_order_id: OrderId = 1;
    let mut open_orders: Vec<(OrderId, TickerId)> = Vec::new();
    let mut last_send = Instant::now();
    let mut last_stats = Instant::now();

    while run.is_running() {
        let mut moved = false;

        while let Some(upd) = q_md.pop() {
            if let Some(ticker) = book.apply(&upd) {
                log::debug!("ticker {ticker} bbo {}", book.bbo(ticker));
            }
            moved = true;
        }

        while let Some(resp) = q_responses.pop() {
            info!("response {resp:?}");
            moved = true;
        }

        if algo == Algo::Random && last_send.elapsed() >= Duration::from_millis(100) {
            last_send = Instant::now();
            let cancel = !open_orders.is_empty() && rng.gen_bool(0.25);
            let req = if cancel {
                let (order_id, ticker_id) =
                    open_orders.swap_remove(rng.gen_range(0..open_orders.len()));
                ClientRequest {
                    kind: ClientRequestType::Cancel,
                    order_id,
                    ticker_id,
                    ..ClientRequest::default()
                }
            } else {
                let order_id = next_order_id;
                next_order_id += 1;
                let ticker_id = rng.gen_range(0..MAX_TICKERS as TickerId);
                open_orders.push((order_id, ticker_id));
                ClientRequest {
                    kind: ClientRequestType::New,
                    client_id: CLIENT_ID_INVALID, // stamped by the gateway client
                    ticker_id,
                    order_id,
                    side: if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell },
                    price: rng.gen_range(90..=110),
                    qty: rng.gen_range(1..=10),
                }
            };
            if q_requests.push(req).is_err() {
                warn!("request ring full, randomized order skipped");
            }
            moved = true;
        }

        if last_stats.elapsed() >= Duration::from_secs(5) {
            last_stats = Instant::now();
            info!(
                "live_orders={} bbo[0]={} t={}ns",
                book.live_orders(),
                book.bbo(0),
                util::now_nanos()
            );
        }

        if !moved {
            spin_wait(spin);
        }
    }
    info!("trade loop stopped");
}
