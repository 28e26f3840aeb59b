// src/metrics.rs
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::thread;

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

macro_rules! counter {
    ($name:ident, $metric:expr, $help:expr) => {
        static $name: Lazy<IntCounter> = Lazy::new(|| {
            let c = IntCounter::new($metric, $help).expect($metric);
            REGISTRY.register(Box::new(c.clone())).ok();
            c
        });
    };
}

counter!(GATEWAY_REQUESTS, "gateway_requests", "Client requests accepted by the order gateway");
counter!(GATEWAY_SEQ_DROPS, "gateway_seq_drops", "Client requests dropped for a bad per-client sequence");
counter!(GATEWAY_SOCKET_REJECTS, "gateway_socket_rejects", "Client requests dropped for a client id bound to another socket");
counter!(GATEWAY_RESPONSES, "gateway_responses", "Responses written back to clients");
counter!(ENGINE_REQUESTS, "engine_requests", "Requests processed by the matching engine");
counter!(ENGINE_TRADES, "engine_trades", "Trade updates emitted by the matching engine");
counter!(MD_PUBLISHED, "md_published", "Incremental market updates multicast");
counter!(MD_SNAPSHOT_ROUNDS, "md_snapshot_rounds", "Full snapshot rounds multicast");
counter!(CONSUMER_GAPS, "consumer_gaps", "Incremental sequence gaps observed by the consumer");
counter!(CONSUMER_RECOVERIES, "consumer_recoveries", "Snapshot recoveries completed by the consumer");
counter!(CONSUMER_UPDATES, "consumer_updates", "Market updates delivered to the participant book");

static LIVE_ORDERS: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new("live_orders", "Live orders across all instruments").expect("live_orders");
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

pub fn inc_gateway_requests() {
    GATEWAY_REQUESTS.inc();
}
pub fn inc_gateway_seq_drops() {
    GATEWAY_SEQ_DROPS.inc();
}
pub fn inc_gateway_socket_rejects() {
    GATEWAY_SOCKET_REJECTS.inc();
}
pub fn inc_gateway_responses() {
    GATEWAY_RESPONSES.inc();
}
pub fn inc_engine_requests() {
    ENGINE_REQUESTS.inc();
}
pub fn inc_engine_trades() {
    ENGINE_TRADES.inc();
}
pub fn inc_md_published() {
    MD_PUBLISHED.inc();
}
pub fn inc_md_snapshot_rounds() {
    MD_SNAPSHOT_ROUNDS.inc();
}
pub fn inc_consumer_gaps() {
    CONSUMER_GAPS.inc();
}
pub fn inc_consumer_recoveries() {
    CONSUMER_RECOVERIES.inc();
}
pub fn inc_consumer_updates(n: u64) {
    CONSUMER_UPDATES.inc_by(n);
}
pub fn set_live_orders(n: usize) {
    LIVE_ORDERS.set(n as i64);
}

/// Prometheus text exporter. Serves /metrics and /healthz until /shutdown.
pub fn spawn_http(addr: String) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("metrics-http".into())
        .spawn(move || {
            let server = match tiny_http::Server::http(&addr) {
                Ok(s) => s,
                Err(e) => {
                    log::error!("metrics exporter failed to bind {addr}: {e}");
                    return;
                }
            };
            log::info!("prometheus metrics listening on http://{addr}/metrics");
            let encoder = TextEncoder::new();
            loop {
                if let Ok(req) = server.recv() {
                    let url = req.url().to_string();
                    if url == "/metrics" {
                        let metric_families = REGISTRY.gather();
                        let mut buf = Vec::with_capacity(16 * 1024);
                        encoder.encode(&metric_families, &mut buf).ok();
                        let resp = tiny_http::Response::from_data(buf)
                            .with_status_code(200)
                            .with_header(
                                tiny_http::Header::from_bytes(
                                    &b"Content-Type"[..],
                                    &b"text/plain; version=0.0.4"[..],
                                )
                                .unwrap(),
                            );
                        let _ = req.respond(resp);
                    } else if url == "/live" || url == "/healthz" {
                        let _ = req
                            .respond(tiny_http::Response::from_string("OK").with_status_code(200));
                    } else if url == "/shutdown" {
                        let _ = req
                            .respond(tiny_http::Response::from_string("BYE").with_status_code(200));
                        break;
                    } else {
                        let _ = req.respond(tiny_http::Response::empty(404));
                    }
                }
            }
        })
        .expect("spawn metrics http")
}

/// Poke the exporter's /shutdown endpoint during teardown.
pub fn request_http_shutdown(addr: &str) {
    use std::io::Write;
    if let Ok(mut s) = std::net::TcpStream::connect(addr) {
        let _ = s.write_all(b"GET /shutdown HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        let _ = s.flush();
    }
}
