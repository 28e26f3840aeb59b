// src/synthesizer.rs
//! Snapshot synthesizer: keeps a compact live-order image per instrument
//! off the publisher's critical path and multicasts a full snapshot round
//! on a second group at a fixed cadence.
//!
//! Snapshot rounds are re-sequenced from 0: SNAPSHOT_START, then per ticker
//! a CLEAR followed by one ADD-style record per live order, then
//! SNAPSHOT_END. Start and end overload `order_id` with the incremental
//! sequence number the round aligns with.

use crate::messages::{MarketUpdate, MarketUpdateType};
use crate::metrics;
use crate::spsc::SpscQueue;
use crate::types::*;
use crate::util::{spin_wait, RunFlag};
use crate::wire::MdpMarketUpdate;
use hashbrown::HashMap;
use std::net::{SocketAddrV4, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};
use zerocopy::AsBytes;

/// Live-order image derived from the incremental stream. Pure state, no
/// sockets: the thread wrapper below owns the I/O.
pub struct SnapshotLedger {
    tickers: Vec<HashMap<OrderId, MarketUpdate>>,
    last_inc_seq: u64,
}

impl SnapshotLedger {
    pub fn new() -> Self {
        Self {
            tickers: (0..MAX_TICKERS).map(|_| HashMap::new()).collect(),
            last_inc_seq: 0,
        }
    }

    /// Fold one published update into the image. The input arrives over an
    /// in-process ring, so a sequence gap here is a publisher bug, not
    /// network loss, and aborts.
    pub fn absorb(&mut self, seq: u64, upd: &MarketUpdate) {
        assert!(
            seq == self.last_inc_seq + 1,
            "incremental seq gap feeding synthesizer: expected {} got {seq}",
            self.last_inc_seq + 1
        );
        self.last_inc_seq = seq;

        let ticker = upd.ticker_id as usize;
        match upd.kind {
            MarketUpdateType::Add => {
                let prev = self.tickers[ticker].insert(upd.order_id, *upd);
                assert!(
                    prev.is_none(),
                    "ADD for live order {}: {upd:?}",
                    upd.order_id
                );
            }
            MarketUpdateType::Modify => {
                let entry = self.tickers[ticker]
                    .get_mut(&upd.order_id)
                    .unwrap_or_else(|| panic!("MODIFY for unknown order {}", upd.order_id));
                assert!(entry.side == upd.side, "MODIFY flips side: {upd:?}");
                // qty and price change; the stored entry keeps its ADD marker
                entry.qty = upd.qty;
                entry.price = upd.price;
            }
            MarketUpdateType::Cancel => {
                let prev = self.tickers[ticker].remove(&upd.order_id);
                assert!(
                    prev.is_some(),
                    "CANCEL for unknown order {}",
                    upd.order_id
                );
            }
            // trades do not change the live-order image; snapshot control
            // types never appear on the incremental stream
            MarketUpdateType::Trade
            | MarketUpdateType::Clear
            | MarketUpdateType::SnapshotStart
            | MarketUpdateType::SnapshotEnd
            | MarketUpdateType::Invalid => {}
        }
    }

    #[inline]
    pub fn last_inc_seq(&self) -> u64 {
        self.last_inc_seq
    }

    #[inline]
    pub fn live_orders(&self) -> usize {
        self.tickers.iter().map(HashMap::len).sum()
    }

    /// One full snapshot round, re-sequenced from 0.
    pub fn build_snapshot(&self) -> Vec<(u64, MarketUpdate)> {
        let mut out = Vec::with_capacity(2 + MAX_TICKERS + self.live_orders());
        let mut seq = 0u64;

        out.push((
            seq,
            MarketUpdate {
                kind: MarketUpdateType::SnapshotStart,
                order_id: self.last_inc_seq,
                ..MarketUpdate::default()
            },
        ));
        seq += 1;

        for (ticker_id, orders) in self.tickers.iter().enumerate() {
            out.push((
                seq,
                MarketUpdate {
                    kind: MarketUpdateType::Clear,
                    ticker_id: ticker_id as TickerId,
                    ..MarketUpdate::default()
                },
            ));
            seq += 1;
            for upd in orders.values() {
                out.push((seq, *upd));
                seq += 1;
            }
        }

        out.push((
            seq,
            MarketUpdate {
                kind: MarketUpdateType::SnapshotEnd,
                order_id: self.last_inc_seq,
                ..MarketUpdate::default()
            },
        ));
        out
    }
}

impl Default for SnapshotLedger {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SnapshotSynthesizer {
    rx_updates: Arc<SpscQueue<(u64, MarketUpdate)>>,
    socket: UdpSocket,
    dest: SocketAddrV4,
    interval: Duration,
    ledger: SnapshotLedger,
}

impl SnapshotSynthesizer {
    pub fn new(
        rx_updates: Arc<SpscQueue<(u64, MarketUpdate)>>,
        socket: UdpSocket,
        dest: SocketAddrV4,
        interval: Duration,
    ) -> Self {
        Self {
            rx_updates,
            socket,
            dest,
            interval,
            ledger: SnapshotLedger::new(),
        }
    }

    pub fn run(&mut self, run: &RunFlag, spin_loops_per_yield: u32) {
        log::info!(
            "snapshot synthesizer sending to {} every {:?}",
            self.dest,
            self.interval
        );
        let mut last_round = Instant::now();
        while run.is_running() {
            let mut moved = false;
            while let Some((seq, upd)) = self.rx_updates.pop() {
                self.ledger.absorb(seq, &upd);
                moved = true;
            }
            if last_round.elapsed() >= self.interval {
                last_round = Instant::now();
                self.publish_snapshot();
            }
            if !moved {
                spin_wait(spin_loops_per_yield);
            }
        }
        log::info!("snapshot synthesizer stopped");
    }

    fn publish_snapshot(&mut self) {
        let round = self.ledger.build_snapshot();
        for (seq, upd) in &round {
            let rec = MdpMarketUpdate::encode(*seq, upd);
            if let Err(e) = self.socket.send_to(rec.as_bytes(), self.dest) {
                log::error!("snapshot send failed at round seq {seq}: {e}");
            }
        }
        metrics::inc_md_snapshot_rounds();
        log::info!(
            "published snapshot of {} live orders aligned to inc seq {}",
            self.ledger.live_orders(),
            self.ledger.last_inc_seq()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;

    fn add(oid: OrderId, ticker: TickerId, qty: Qty) -> MarketUpdate {
        MarketUpdate {
            kind: MarketUpdateType::Add,
            order_id: oid,
            ticker_id: ticker,
            side: Side::Buy,
            price: 100,
            qty,
            priority: 1,
        }
    }

    #[test]
    fn image_tracks_add_modify_cancel() {
        let mut ledger = SnapshotLedger::new();
        ledger.absorb(1, &add(1, 0, 10));
        ledger.absorb(
            2,
            &MarketUpdate {
                kind: MarketUpdateType::Modify,
                order_id: 1,
                ticker_id: 0,
                side: Side::Buy,
                price: 101,
                qty: 6,
                priority: 1,
            },
        );
        assert_eq!(ledger.live_orders(), 1);

        let round = ledger.build_snapshot();
        let entry = round
            .iter()
            .find(|(_, u)| u.order_id == 1 && u.kind == MarketUpdateType::Add)
            .expect("modified order keeps its ADD marker");
        assert_eq!((entry.1.qty, entry.1.price), (6, 101));

        ledger.absorb(
            3,
            &MarketUpdate {
                kind: MarketUpdateType::Cancel,
                order_id: 1,
                ticker_id: 0,
                side: Side::Buy,
                ..MarketUpdate::default()
            },
        );
        assert_eq!(ledger.live_orders(), 0);
    }

    #[test]
    fn trades_advance_seq_without_touching_image() {
        let mut ledger = SnapshotLedger::new();
        ledger.absorb(1, &add(1, 0, 10));
        ledger.absorb(
            2,
            &MarketUpdate {
                kind: MarketUpdateType::Trade,
                ticker_id: 0,
                qty: 4,
                ..MarketUpdate::default()
            },
        );
        assert_eq!(ledger.last_inc_seq(), 2);
        assert_eq!(ledger.live_orders(), 1);
    }

    #[test]
    fn snapshot_round_shape() {
        let mut ledger = SnapshotLedger::new();
        ledger.absorb(1, &add(1, 0, 10));
        ledger.absorb(2, &add(2, 3, 5));

        let round = ledger.build_snapshot();
        // start + one clear per ticker + two orders + end
        assert_eq!(round.len(), 2 + MAX_TICKERS + 2);

        // round sequence is dense from 0
        for (i, (seq, _)) in round.iter().enumerate() {
            assert_eq!(*seq, i as u64);
        }

        let (first_seq, first) = round.first().unwrap();
        assert_eq!(*first_seq, 0);
        assert_eq!(first.kind, MarketUpdateType::SnapshotStart);
        assert_eq!(first.order_id, 2); // aligned incremental seq

        let (_, last) = round.last().unwrap();
        assert_eq!(last.kind, MarketUpdateType::SnapshotEnd);
        assert_eq!(last.order_id, 2);

        // every ticker gets a CLEAR even when empty
        let clears = round
            .iter()
            .filter(|(_, u)| u.kind == MarketUpdateType::Clear)
            .count();
        assert_eq!(clears, MAX_TICKERS);
    }

    #[test]
    #[should_panic(expected = "ADD for live order")]
    fn duplicate_add_is_a_publisher_bug() {
        let mut ledger = SnapshotLedger::new();
        ledger.absorb(1, &add(1, 0, 10));
        ledger.absorb(2, &add(1, 0, 10));
    }

    #[test]
    #[should_panic(expected = "seq gap")]
    fn in_process_seq_gap_is_fatal() {
        let mut ledger = SnapshotLedger::new();
        ledger.absorb(1, &add(1, 0, 10));
        ledger.absorb(3, &add(2, 0, 10));
    }
}
