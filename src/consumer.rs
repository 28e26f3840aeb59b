// src/consumer.rs
//! Participant market-data consumer.
//!
//! Normal path: forward incrementals whose sequence matches the expected
//! counter. On any mismatch the consumer joins the snapshot group and
//! buffers both streams until one complete snapshot round plus a dense run
//! of incrementals past the round's alignment point can be spliced into a
//! coherent stream.
//!
//! The gap/recovery logic lives in [`StreamSync`], a socket-free state
//! machine; the thread wrapper owns the sockets and the output ring.

use crate::config::MarketData;
use crate::messages::{MarketUpdate, MarketUpdateType};
use crate::metrics;
use crate::net;
use crate::spsc::SpscQueue;
use crate::util::{spin_wait, RunFlag};
use crate::wire::{MdpMarketUpdate, MDP_MARKET_UPDATE_SIZE};
use std::collections::BTreeMap;
use std::net::UdpSocket;
use std::sync::Arc;
use zerocopy::FromBytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    Incremental,
    Snapshot,
}

/// Socket operation the caller must perform after an update is absorbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    None,
    SubscribeSnapshot,
    UnsubscribeSnapshot,
}

pub struct StreamSync {
    next_exp_inc_seq: u64,
    in_recovery: bool,
    snap: BTreeMap<u64, MarketUpdate>,
    inc: BTreeMap<u64, MarketUpdate>,
}

impl StreamSync {
    pub fn new() -> Self {
        Self {
            next_exp_inc_seq: 1,
            in_recovery: false,
            snap: BTreeMap::new(),
            inc: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn in_recovery(&self) -> bool {
        self.in_recovery
    }

    #[inline]
    pub fn next_expected(&self) -> u64 {
        self.next_exp_inc_seq
    }

    /// Absorb one datagram's update. Coherent updates are appended to
    /// `emit` in the order the participant's book must apply them.
    pub fn on_update(
        &mut self,
        feed: Feed,
        seq: u64,
        upd: MarketUpdate,
        emit: &mut Vec<MarketUpdate>,
    ) -> SyncAction {
        match feed {
            Feed::Snapshot => {
                if !self.in_recovery {
                    log::warn!("snapshot datagram while synchronized, ignored (seq {seq})");
                    return SyncAction::None;
                }
                if self.snap.contains_key(&seq) {
                    // a repeated round seq means the previous round was
                    // incomplete; restart the snapshot buffer on this round
                    log::warn!("snapshot seq {seq} seen twice, restarting snapshot buffer");
                    self.snap.clear();
                }
                self.snap.insert(seq, upd);
                self.try_recover(emit)
            }
            Feed::Incremental => {
                if self.in_recovery {
                    self.inc.insert(seq, upd);
                    return self.try_recover(emit);
                }
                if seq == self.next_exp_inc_seq {
                    self.next_exp_inc_seq += 1;
                    emit.push(upd);
                    SyncAction::None
                } else {
                    log::warn!(
                        "incremental gap: expected {} received {seq}, entering recovery",
                        self.next_exp_inc_seq
                    );
                    metrics::inc_consumer_gaps();
                    self.in_recovery = true;
                    self.snap.clear();
                    self.inc.clear();
                    self.inc.insert(seq, upd);
                    SyncAction::SubscribeSnapshot
                }
            }
        }
    }

    /// Attempt to splice a coherent stream out of the buffers. Emits and
    /// returns `UnsubscribeSnapshot` on success.
    fn try_recover(&mut self, emit: &mut Vec<MarketUpdate>) -> SyncAction {
        let first = match self.snap.iter().next() {
            Some((seq, upd)) => (*seq, *upd),
            None => return SyncAction::None,
        };
        if first.0 != 0 || first.1.kind != MarketUpdateType::SnapshotStart {
            // joined mid-round; nothing here is usable
            self.snap.clear();
            return SyncAction::None;
        }

        let mut spliced: Vec<MarketUpdate> = Vec::with_capacity(self.snap.len());
        let mut next_snap_seq = 0u64;
        let mut snap_complete = true;
        for (seq, upd) in &self.snap {
            if *seq != next_snap_seq {
                log::warn!(
                    "snapshot stream gap: expected {next_snap_seq} found {seq}, waiting for next round"
                );
                snap_complete = false;
                break;
            }
            if upd.kind != MarketUpdateType::SnapshotStart
                && upd.kind != MarketUpdateType::SnapshotEnd
            {
                spliced.push(*upd);
            }
            next_snap_seq += 1;
        }
        if !snap_complete {
            self.snap.clear();
            return SyncAction::None;
        }

        let last = *self.snap.values().next_back().expect("non-empty");
        if last.kind != MarketUpdateType::SnapshotEnd {
            // round still in flight
            return SyncAction::None;
        }

        // SNAPSHOT_END carries the incremental seq this round aligns with
        let align = last.order_id;
        let mut next_exp = align + 1;
        let mut spliced_inc = 0usize;
        for (seq, upd) in &self.inc {
            if *seq < next_exp {
                continue;
            }
            if *seq != next_exp {
                log::warn!(
                    "incremental gap behind snapshot: expected {next_exp} found {seq}, waiting for next round"
                );
                self.snap.clear();
                return SyncAction::None;
            }
            spliced.push(*upd);
            next_exp += 1;
            spliced_inc += 1;
        }

        log::info!(
            "recovered {} snapshot and {spliced_inc} incremental updates, resuming at seq {next_exp}",
            self.snap.len() - 2
        );
        emit.append(&mut spliced);
        self.next_exp_inc_seq = next_exp;
        self.snap.clear();
        self.inc.clear();
        self.in_recovery = false;
        metrics::inc_consumer_recoveries();
        SyncAction::UnsubscribeSnapshot
    }
}

impl Default for StreamSync {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MarketDataConsumer {
    sync: StreamSync,
    tx_updates: Arc<SpscQueue<MarketUpdate>>,
    inc_socket: UdpSocket,
    snap_socket: Option<UdpSocket>,
    md: MarketData,
    emit: Vec<MarketUpdate>,
}

impl MarketDataConsumer {
    pub fn new(md: MarketData, tx_updates: Arc<SpscQueue<MarketUpdate>>) -> anyhow::Result<Self> {
        let inc_socket = net::mcast_recv_socket(
            md.incremental_group,
            md.incremental_port,
            md.iface_addr,
            md.recv_buffer_bytes,
        )?;
        Ok(Self {
            sync: StreamSync::new(),
            tx_updates,
            inc_socket,
            snap_socket: None,
            md,
            emit: Vec::with_capacity(1024),
        })
    }

    pub fn run(&mut self, run: &RunFlag, spin_loops_per_yield: u32) {
        log::info!(
            "market-data consumer joined {}:{}",
            self.md.incremental_group,
            self.md.incremental_port
        );
        while run.is_running() {
            let mut moved = self.drain_socket(Feed::Incremental);
            if self.snap_socket.is_some() {
                moved |= self.drain_socket(Feed::Snapshot);
            }
            if !moved {
                spin_wait(spin_loops_per_yield);
            }
        }
        log::info!("market-data consumer stopped");
    }

    fn drain_socket(&mut self, feed: Feed) -> bool {
        let mut moved = false;
        let mut buf = [0u8; MDP_MARKET_UPDATE_SIZE];
        loop {
            let sock = match feed {
                Feed::Incremental => &self.inc_socket,
                Feed::Snapshot => match &self.snap_socket {
                    Some(s) => s,
                    None => return moved,
                },
            };
            match sock.recv(&mut buf) {
                Ok(n) if n == MDP_MARKET_UPDATE_SIZE => {
                    let (seq, upd) = MdpMarketUpdate::read_from(&buf[..])
                        .expect("fixed-size record")
                        .decode();
                    let action = self.sync.on_update(feed, seq, upd, &mut self.emit);
                    self.flush_emitted();
                    match action {
                        SyncAction::SubscribeSnapshot => self.subscribe_snapshot(),
                        SyncAction::UnsubscribeSnapshot => {
                            log::info!("leaving snapshot group");
                            self.snap_socket = None;
                        }
                        SyncAction::None => {}
                    }
                    moved = true;
                }
                Ok(n) => {
                    log::warn!("runt market-data datagram of {n} bytes dropped");
                    moved = true;
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::error!("market-data recv failed: {e}");
                    break;
                }
            }
        }
        moved
    }

    fn flush_emitted(&mut self) {
        if self.emit.is_empty() {
            return;
        }
        metrics::inc_consumer_updates(self.emit.len() as u64);
        for upd in self.emit.drain(..) {
            assert!(
                self.tx_updates.push(upd).is_ok(),
                "participant book queue full"
            );
        }
    }

    fn subscribe_snapshot(&mut self) {
        match net::mcast_recv_socket(
            self.md.snapshot_group,
            self.md.snapshot_port,
            self.md.iface_addr,
            self.md.recv_buffer_bytes,
        ) {
            Ok(sock) => {
                log::info!(
                    "joined snapshot group {}:{}",
                    self.md.snapshot_group,
                    self.md.snapshot_port
                );
                self.snap_socket = Some(sock);
            }
            Err(e) => {
                // recovery retries on every subsequent datagram; the next
                // gap check will attempt the join again
                log::error!("snapshot join failed: {e:?}");
            }
        }
    }
}
