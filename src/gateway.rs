// src/gateway.rs
//! Order-gateway TCP server: sequenced, ordered ingress for client
//! requests and sequenced egress for engine responses.
//!
//! Single thread. Each poll cycle accepts new connections, drains every
//! socket, validates per-client sequencing, hands timestamped requests to
//! the FIFO sequencer, flushes the sequencer into the engine ring, and
//! writes pending responses back out.
//!
//! A client id binds to the first socket it appears on; records for a bound
//! id arriving on any other socket are dropped. Sequence gaps and malformed
//! records are dropped with a log line and never reach the engine.

use crate::messages::{ClientRequest, ClientRequestType, ClientResponse};
use crate::metrics;
use crate::sequencer::FifoSequencer;
use crate::spsc::SpscQueue;
use crate::types::*;
use crate::util::{now_nanos, spin_wait, RunFlag};
use crate::wire::{OmClientRequest, OmClientResponse, OM_CLIENT_REQUEST_SIZE};
use bytes::{Buf, BytesMut};
use hashbrown::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use zerocopy::{AsBytes, FromBytes};

struct Conn {
    stream: TcpStream,
    rx: BytesMut,
    tx: BytesMut,
    dead: bool,
}

pub struct OrderGateway {
    listener: TcpListener,
    conns: HashMap<u64, Conn>,
    next_token: u64,
    /// client id -> connection token bound on first message
    cid_conn: Vec<Option<u64>>,
    cid_next_exp_seq: Vec<u64>,
    cid_next_out_seq: Vec<u64>,
    sequencer: FifoSequencer,
    rx_responses: Arc<SpscQueue<ClientResponse>>,
}

impl OrderGateway {
    pub fn new(
        listener: TcpListener,
        tx_requests: Arc<SpscQueue<ClientRequest>>,
        rx_responses: Arc<SpscQueue<ClientResponse>>,
    ) -> Self {
        Self {
            listener,
            conns: HashMap::new(),
            next_token: 1,
            cid_conn: vec![None; MAX_CLIENTS],
            cid_next_exp_seq: vec![1; MAX_CLIENTS],
            cid_next_out_seq: vec![1; MAX_CLIENTS],
            sequencer: FifoSequencer::new(tx_requests),
            rx_responses,
        }
    }

    pub fn run(&mut self, run: &RunFlag, spin_loops_per_yield: u32) {
        log::info!(
            "order gateway listening on {}",
            self.listener.local_addr().map(|a| a.to_string()).unwrap_or_default()
        );
        while run.is_running() {
            if !self.poll_once() {
                spin_wait(spin_loops_per_yield);
            }
        }
        log::info!("order gateway stopped");
    }

    /// One full poll cycle. Returns whether any work was done.
    pub fn poll_once(&mut self) -> bool {
        let mut moved = self.accept_new();
        moved |= self.service_reads();
        self.sequencer.flush();
        moved |= self.drain_responses();
        self.service_writes();
        self.reap_dead();
        moved
    }

    fn accept_new(&mut self) -> bool {
        let mut moved = false;
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(true).ok();
                    stream.set_nodelay(true).ok();
                    let token = self.next_token;
                    self.next_token += 1;
                    log::info!("accepted connection from {peer} (token {token})");
                    self.conns.insert(
                        token,
                        Conn {
                            stream,
                            rx: BytesMut::with_capacity(16 * 1024),
                            tx: BytesMut::with_capacity(16 * 1024),
                            dead: false,
                        },
                    );
                    moved = true;
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::error!("accept failed: {e}");
                    break;
                }
            }
        }
        moved
    }

    fn service_reads(&mut self) -> bool {
        let mut moved = false;
        let tokens: Vec<u64> = self.conns.keys().copied().collect();
        let mut records: Vec<OmClientRequest> = Vec::new();
        for token in tokens {
            records.clear();
            let rx_time = {
                let conn = self.conns.get_mut(&token).expect("token just listed");
                let rx_time = Self::fill_rx(conn);
                while conn.rx.len() >= OM_CLIENT_REQUEST_SIZE {
                    let rec = OmClientRequest::read_from(&conn.rx[..OM_CLIENT_REQUEST_SIZE])
                        .expect("fixed-size record");
                    records.push(rec);
                    conn.rx.advance(OM_CLIENT_REQUEST_SIZE);
                }
                rx_time
            };
            for rec in &records {
                self.handle_record(token, rx_time, rec);
                moved = true;
            }
        }
        moved
    }

    /// Read everything currently available on the socket. Returns the
    /// receive timestamp stamped on this batch.
    fn fill_rx(conn: &mut Conn) -> Nanos {
        let mut buf = [0u8; 4096];
        loop {
            match conn.stream.read(&mut buf) {
                Ok(0) => {
                    conn.dead = true;
                    break;
                }
                Ok(n) => conn.rx.extend_from_slice(&buf[..n]),
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("read failed, dropping connection: {e}");
                    conn.dead = true;
                    break;
                }
            }
        }
        now_nanos()
    }

    fn handle_record(&mut self, token: u64, rx_time: Nanos, rec: &OmClientRequest) {
        let (seq, req) = rec.decode();

        // Malformed enum bytes never reach the engine: the wire boundary is
        // where remote garbage stops being a venue problem.
        if req.kind == ClientRequestType::Invalid
            || (req.kind == ClientRequestType::New && req.side == Side::Invalid)
        {
            log::warn!("malformed request dropped: {req:?}");
            return;
        }
        let cid = req.client_id as usize;
        if cid >= MAX_CLIENTS {
            log::warn!("client id {} out of range, dropped", req.client_id);
            return;
        }

        match self.cid_conn[cid] {
            None => {
                self.cid_conn[cid] = Some(token);
                log::info!("client {} bound to token {token}", req.client_id);
            }
            Some(bound) if bound != token => {
                log::warn!(
                    "client {} sent on token {token} but is bound to {bound}, dropped",
                    req.client_id
                );
                metrics::inc_gateway_socket_rejects();
                return;
            }
            Some(_) => {}
        }

        let expected = &mut self.cid_next_exp_seq[cid];
        if seq != *expected {
            log::warn!(
                "client {} bad sequence: expected {} received {seq}, dropped",
                req.client_id,
                *expected
            );
            metrics::inc_gateway_seq_drops();
            return;
        }
        *expected += 1;

        metrics::inc_gateway_requests();
        self.sequencer.push(rx_time, req);
    }

    fn drain_responses(&mut self) -> bool {
        let mut moved = false;
        while let Some(resp) = self.rx_responses.pop() {
            moved = true;
            let cid = resp.client_id as usize;
            if cid >= MAX_CLIENTS {
                log::error!("response for out-of-range client {}: {resp:?}", resp.client_id);
                continue;
            }
            let conn = self
                .cid_conn[cid]
                .and_then(|token| self.conns.get_mut(&token));
            let conn = match conn {
                Some(c) if !c.dead => c,
                _ => {
                    log::warn!("no live socket for client {}, response dropped", resp.client_id);
                    continue;
                }
            };
            let seq = self.cid_next_out_seq[cid];
            self.cid_next_out_seq[cid] += 1;
            let rec = OmClientResponse::encode(seq, &resp);
            conn.tx.extend_from_slice(rec.as_bytes());
            metrics::inc_gateway_responses();
        }
        moved
    }

    fn service_writes(&mut self) {
        for conn in self.conns.values_mut() {
            while !conn.tx.is_empty() {
                match conn.stream.write(&conn.tx) {
                    Ok(0) => {
                        conn.dead = true;
                        break;
                    }
                    Ok(n) => conn.tx.advance(n),
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        log::warn!("write failed, dropping connection: {e}");
                        conn.dead = true;
                        break;
                    }
                }
            }
        }
    }

    /// Tokens are never reused, so a dead connection's client bindings stay
    /// pointing at the dead token and that client's traffic stops cold
    /// rather than leaking onto a stranger's socket.
    fn reap_dead(&mut self) {
        self.conns.retain(|token, conn| {
            if conn.dead {
                log::info!("connection {token} closed");
            }
            !conn.dead
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::tcp_listener;
    use std::time::{Duration, Instant};

    struct Rig {
        gw: OrderGateway,
        requests: Arc<SpscQueue<ClientRequest>>,
        responses: Arc<SpscQueue<ClientResponse>>,
        addr: std::net::SocketAddr,
    }

    fn rig() -> Rig {
        let listener = tcp_listener("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(SpscQueue::new(1024));
        let responses = Arc::new(SpscQueue::new(1024));
        Rig {
            gw: OrderGateway::new(listener, requests.clone(), responses.clone()),
            requests,
            responses,
            addr,
        }
    }

    fn connect(addr: std::net::SocketAddr) -> TcpStream {
        let s = TcpStream::connect(addr).unwrap();
        s.set_nodelay(true).unwrap();
        s
    }

    fn send(sock: &mut TcpStream, seq: u64, client_id: ClientId, order_id: OrderId) {
        let req = ClientRequest {
            kind: ClientRequestType::New,
            client_id,
            ticker_id: 0,
            order_id,
            side: Side::Buy,
            price: 100,
            qty: 1,
        };
        let rec = OmClientRequest::encode(seq, &req);
        sock.write_all(rec.as_bytes()).unwrap();
    }

    /// Poll the gateway until `pred` holds or the deadline passes.
    fn poll_until(gw: &mut OrderGateway, mut pred: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !pred() {
            gw.poll_once();
            assert!(Instant::now() < deadline, "gateway test timed out");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn sequenced_requests_reach_the_engine_queue() {
        let mut r = rig();
        let mut sock = connect(r.addr);
        send(&mut sock, 1, 5, 10);
        send(&mut sock, 2, 5, 11);

        let requests = r.requests.clone();
        poll_until(&mut r.gw, || requests.len() == 2);
        assert_eq!(r.requests.pop().unwrap().order_id, 10);
        assert_eq!(r.requests.pop().unwrap().order_id, 11);
    }

    #[test]
    fn sequence_gap_is_dropped_and_stream_continues() {
        let mut r = rig();
        let mut sock = connect(r.addr);
        send(&mut sock, 1, 5, 10);
        send(&mut sock, 3, 5, 11); // gap: dropped
        send(&mut sock, 2, 5, 12); // expected: delivered

        let requests = r.requests.clone();
        poll_until(&mut r.gw, || requests.len() == 2);
        assert_eq!(r.requests.pop().unwrap().order_id, 10);
        assert_eq!(r.requests.pop().unwrap().order_id, 12);
    }

    #[test]
    fn client_id_is_bound_to_first_socket() {
        let mut r = rig();
        let mut sock_x = connect(r.addr);
        let mut sock_y = connect(r.addr);

        send(&mut sock_x, 1, 5, 10);
        let requests = r.requests.clone();
        poll_until(&mut r.gw, || requests.len() == 1);
        assert_eq!(r.requests.pop().unwrap().order_id, 10);

        // same client id on a different socket: discarded
        send(&mut sock_y, 2, 5, 11);
        // the bound socket keeps flowing
        send(&mut sock_x, 2, 5, 12);
        poll_until(&mut r.gw, || requests.len() == 1);
        assert_eq!(r.requests.pop().unwrap().order_id, 12);
    }

    #[test]
    fn responses_are_written_with_outgoing_sequence() {
        let mut r = rig();
        let mut sock = connect(r.addr);
        send(&mut sock, 1, 5, 10);
        let requests = r.requests.clone();
        poll_until(&mut r.gw, || requests.len() == 1);

        r.responses
            .push(ClientResponse {
                kind: crate::messages::ClientResponseType::Accepted,
                client_id: 5,
                ticker_id: 0,
                client_order_id: 10,
                market_order_id: 1,
                side: Side::Buy,
                price: 100,
                exec_qty: 0,
                leaves_qty: 1,
            })
            .unwrap();

        sock.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut buf = [0u8; crate::wire::OM_CLIENT_RESPONSE_SIZE];
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut read = 0;
        while read < buf.len() {
            r.gw.poll_once();
            match sock.read(&mut buf[read..]) {
                Ok(n) => read += n,
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => panic!("read: {e}"),
            }
            assert!(Instant::now() < deadline, "no response on the wire");
        }
        let rec = OmClientResponse::read_from(&buf[..]).unwrap();
        let (seq, resp) = rec.decode();
        assert_eq!(seq, 1);
        assert_eq!(resp.market_order_id, 1);
        assert_eq!(resp.client_order_id, 10);
    }
}
