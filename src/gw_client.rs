// src/gw_client.rs
//! Participant-side order gateway: TCP client to the exchange's order
//! server. Stamps outgoing requests with the per-client sequence, checks
//! the per-client sequence on responses, and bridges both directions onto
//! the participant's rings.

use crate::messages::{ClientRequest, ClientResponse};
use crate::spsc::SpscQueue;
use crate::types::ClientId;
use crate::util::{spin_wait, RunFlag};
use crate::wire::{OmClientRequest, OmClientResponse, OM_CLIENT_RESPONSE_SIZE};
use anyhow::Context;
use bytes::{Buf, BytesMut};
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use zerocopy::{AsBytes, FromBytes};

pub struct OrderGatewayClient {
    client_id: ClientId,
    stream: TcpStream,
    rx: BytesMut,
    tx: BytesMut,
    rx_requests: Arc<SpscQueue<ClientRequest>>,
    tx_responses: Arc<SpscQueue<ClientResponse>>,
    next_outgoing_seq: u64,
    next_exp_seq: u64,
}

impl OrderGatewayClient {
    pub fn connect(
        addr: &str,
        client_id: ClientId,
        rx_requests: Arc<SpscQueue<ClientRequest>>,
        tx_responses: Arc<SpscQueue<ClientResponse>>,
    ) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).with_context(|| format!("connect {addr}"))?;
        stream.set_nodelay(true).ok();
        stream.set_nonblocking(true).context("set_nonblocking")?;
        log::info!("client {client_id} connected to order gateway at {addr}");
        Ok(Self {
            client_id,
            stream,
            rx: BytesMut::with_capacity(16 * 1024),
            tx: BytesMut::with_capacity(16 * 1024),
            rx_requests,
            tx_responses,
            next_outgoing_seq: 1,
            next_exp_seq: 1,
        })
    }

    pub fn run(&mut self, run: &RunFlag, spin_loops_per_yield: u32) {
        while run.is_running() {
            if !self.poll_once() {
                spin_wait(spin_loops_per_yield);
            }
        }
        log::info!("order gateway client stopped");
    }

    pub fn poll_once(&mut self) -> bool {
        let mut moved = self.stage_requests();
        self.flush_tx();
        moved |= self.read_responses();
        moved
    }

    fn stage_requests(&mut self) -> bool {
        let mut moved = false;
        while let Some(mut req) = self.rx_requests.pop() {
            // the gateway binds this connection to our client id; anything
            // else on this socket would be discarded over there
            req.client_id = self.client_id;
            let rec = OmClientRequest::encode(self.next_outgoing_seq, &req);
            self.next_outgoing_seq += 1;
            self.tx.extend_from_slice(rec.as_bytes());
            log::debug!("staged request {req:?}");
            moved = true;
        }
        moved
    }

    fn flush_tx(&mut self) {
        while !self.tx.is_empty() {
            match self.stream.write(&self.tx) {
                Ok(0) => {
                    log::error!("order gateway closed the connection");
                    return;
                }
                Ok(n) => self.tx.advance(n),
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::error!("order gateway write failed: {e}");
                    return;
                }
            }
        }
    }

    fn read_responses(&mut self) -> bool {
        let mut buf = [0u8; 4096];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    log::error!("order gateway closed the connection");
                    break;
                }
                Ok(n) => self.rx.extend_from_slice(&buf[..n]),
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::error!("order gateway read failed: {e}");
                    break;
                }
            }
        }

        let mut moved = false;
        while self.rx.len() >= OM_CLIENT_RESPONSE_SIZE {
            let rec = OmClientResponse::read_from(&self.rx[..OM_CLIENT_RESPONSE_SIZE])
                .expect("fixed-size record");
            self.rx.advance(OM_CLIENT_RESPONSE_SIZE);
            let (seq, resp) = rec.decode();

            if resp.client_id != self.client_id {
                log::warn!(
                    "response for client {} on client {}'s connection, dropped",
                    resp.client_id,
                    self.client_id
                );
                continue;
            }
            if seq != self.next_exp_seq {
                // TCP cannot reorder; a mismatch means the venue restarted
                // its counter or we missed a close. Resync and carry on.
                log::warn!(
                    "response seq {} while expecting {}, resyncing",
                    seq,
                    self.next_exp_seq
                );
            }
            self.next_exp_seq = seq + 1;

            log::debug!("response {resp:?}");
            assert!(
                self.tx_responses.push(resp).is_ok(),
                "participant response queue full"
            );
            moved = true;
        }
        moved
    }
}
