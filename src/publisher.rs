// src/publisher.rs
//! Market-data publisher: assigns the global incremental sequence, sends
//! one datagram per update on the incremental group, and forwards a copy
//! to the snapshot synthesizer's ring.

use crate::messages::MarketUpdate;
use crate::metrics;
use crate::spsc::SpscQueue;
use crate::util::{spin_wait, RunFlag};
use crate::wire::MdpMarketUpdate;
use std::net::{SocketAddrV4, UdpSocket};
use std::sync::Arc;
use zerocopy::AsBytes;

pub struct MarketDataPublisher {
    rx_updates: Arc<SpscQueue<MarketUpdate>>,
    tx_snapshot: Arc<SpscQueue<(u64, MarketUpdate)>>,
    socket: UdpSocket,
    dest: SocketAddrV4,
    next_seq: u64,
}

impl MarketDataPublisher {
    pub fn new(
        rx_updates: Arc<SpscQueue<MarketUpdate>>,
        tx_snapshot: Arc<SpscQueue<(u64, MarketUpdate)>>,
        socket: UdpSocket,
        dest: SocketAddrV4,
    ) -> Self {
        Self {
            rx_updates,
            tx_snapshot,
            socket,
            dest,
            next_seq: 1,
        }
    }

    pub fn run(&mut self, run: &RunFlag, spin_loops_per_yield: u32) {
        log::info!("market-data publisher sending to {}", self.dest);
        while run.is_running() {
            if !self.publish_pending() {
                spin_wait(spin_loops_per_yield);
            }
        }
        log::info!("market-data publisher stopped");
    }

    /// Drain the engine's update ring. Returns whether anything went out.
    pub fn publish_pending(&mut self) -> bool {
        let mut moved = false;
        while let Some(upd) = self.rx_updates.pop() {
            let seq = self.next_seq;
            let rec = MdpMarketUpdate::encode(seq, &upd);
            if let Err(e) = self.socket.send_to(rec.as_bytes(), self.dest) {
                // transient: the update still reaches the synthesizer so the
                // wire gap is recoverable from the next snapshot round
                log::error!("incremental send failed at seq {seq}: {e}");
            }
            assert!(
                self.tx_snapshot.push((seq, upd)).is_ok(),
                "snapshot-synthesizer queue full"
            );
            self.next_seq += 1;
            metrics::inc_md_published();
            moved = true;
        }
        moved
    }

    #[inline]
    pub fn last_seq(&self) -> u64 {
        self.next_seq - 1
    }
}
