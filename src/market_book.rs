// src/market_book.rs
//! Participant-side order books, rebuilt from the market-data stream.
//!
//! Mirrors the exchange book structure but is keyed by market order id
//! only: slab arena, prev/next FIFO linkage, BTreeMap price levels, plus a
//! top-of-book (BBO) derivation per instrument. The consumer guarantees the
//! applied stream is gap-free, so an inconsistent update here is a venue
//! bug and aborts.

use crate::messages::{MarketUpdate, MarketUpdateType};
use crate::types::*;
use hashbrown::HashMap;
use slab::Slab;
use std::collections::BTreeMap;
use std::fmt;

type Handle = usize;

#[derive(Debug)]
struct Node {
    order_id: OrderId,
    side: Side,
    price: Price,
    qty: Qty,
    priority: Priority,
    prev: Option<Handle>,
    next: Option<Handle>,
}

#[derive(Debug, Default)]
struct Level {
    head: Option<Handle>,
    tail: Option<Handle>,
    count: usize,
    total_qty: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bbo {
    pub bid: Option<(Price, u64)>,
    pub ask: Option<(Price, u64)>,
}

impl fmt::Display for Bbo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bid {
            Some((p, q)) => write!(f, "{q}@{p}")?,
            None => write!(f, "-")?,
        }
        write!(f, " x ")?;
        match self.ask {
            Some((p, q)) => write!(f, "{q}@{p}"),
            None => write!(f, "-"),
        }
    }
}

#[derive(Default)]
struct InstrumentBook {
    bids: BTreeMap<Price, Level>,
    asks: BTreeMap<Price, Level>,
    orders: Slab<Node>,
    index: HashMap<OrderId, Handle>,
}

impl InstrumentBook {
    fn levels_mut(&mut self, side: Side) -> &mut BTreeMap<Price, Level> {
        match side {
            Side::Buy => &mut self.bids,
            _ => &mut self.asks,
        }
    }

    fn add(&mut self, order_id: OrderId, side: Side, price: Price, qty: Qty, priority: Priority) {
        let prev_tail = {
            let lvl = self.levels_mut(side).entry(price).or_default();
            lvl.tail
        };
        let h = self.orders.insert(Node {
            order_id,
            side,
            price,
            qty,
            priority,
            prev: prev_tail,
            next: None,
        });
        if let Some(t) = prev_tail {
            self.orders[t].next = Some(h);
        }
        {
            let lvl = self.levels_mut(side).entry(price).or_default();
            if prev_tail.is_none() {
                lvl.head = Some(h);
            }
            lvl.tail = Some(h);
            lvl.count += 1;
            lvl.total_qty += u64::from(qty);
        }
        let prev = self.index.insert(order_id, h);
        assert!(prev.is_none(), "ADD for live order {order_id}");
    }

    fn set_qty(&mut self, order_id: OrderId, qty: Qty) {
        let h = *self
            .index
            .get(&order_id)
            .unwrap_or_else(|| panic!("MODIFY for unknown order {order_id}"));
        let (side, price, old_qty) = {
            let n = &mut self.orders[h];
            let old = n.qty;
            n.qty = qty;
            (n.side, n.price, old)
        };
        let lvl = self
            .levels_mut(side)
            .get_mut(&price)
            .expect("level missing for live order");
        lvl.total_qty = lvl.total_qty - u64::from(old_qty) + u64::from(qty);
    }

    fn remove(&mut self, order_id: OrderId) {
        let h = self
            .index
            .remove(&order_id)
            .unwrap_or_else(|| panic!("CANCEL for unknown order {order_id}"));
        let (side, price, qty, prev, next) = {
            let n = &self.orders[h];
            (n.side, n.price, n.qty, n.prev, n.next)
        };
        if let Some(p) = prev {
            self.orders[p].next = next;
        }
        if let Some(nx) = next {
            self.orders[nx].prev = prev;
        }
        let empty = {
            let lvl = self
                .levels_mut(side)
                .get_mut(&price)
                .expect("level missing for live order");
            if prev.is_none() {
                lvl.head = next;
            }
            if next.is_none() {
                lvl.tail = prev;
            }
            lvl.count -= 1;
            lvl.total_qty -= u64::from(qty);
            lvl.count == 0
        };
        if empty {
            self.levels_mut(side).remove(&price);
        }
        self.orders.remove(h);
    }

    fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.orders.clear();
        self.index.clear();
    }

    fn bbo(&self) -> Bbo {
        Bbo {
            bid: self.bids.iter().next_back().map(|(p, l)| (*p, l.total_qty)),
            ask: self.asks.iter().next().map(|(p, l)| (*p, l.total_qty)),
        }
    }
}

pub struct MarketOrderBook {
    books: Vec<InstrumentBook>,
}

impl MarketOrderBook {
    pub fn new() -> Self {
        Self {
            books: (0..MAX_TICKERS).map(|_| InstrumentBook::default()).collect(),
        }
    }

    /// Apply one coherent update from the consumer's output stream.
    /// Returns the instrument it touched, if any.
    pub fn apply(&mut self, upd: &MarketUpdate) -> Option<TickerId> {
        let ticker = upd.ticker_id as usize;
        if ticker >= self.books.len()
            && !matches!(
                upd.kind,
                MarketUpdateType::SnapshotStart
                    | MarketUpdateType::SnapshotEnd
                    | MarketUpdateType::Invalid
            )
        {
            log::warn!("update for unknown instrument dropped: {upd:?}");
            return None;
        }
        match upd.kind {
            MarketUpdateType::Add => {
                self.books[ticker].add(upd.order_id, upd.side, upd.price, upd.qty, upd.priority);
            }
            MarketUpdateType::Modify => {
                self.books[ticker].set_qty(upd.order_id, upd.qty);
            }
            MarketUpdateType::Cancel => {
                self.books[ticker].remove(upd.order_id);
            }
            MarketUpdateType::Clear => {
                self.books[ticker].clear();
            }
            // trades carry no resting-order deltas on this feed; the
            // paired MODIFY/CANCEL does the book work
            MarketUpdateType::Trade => {}
            MarketUpdateType::SnapshotStart
            | MarketUpdateType::SnapshotEnd
            | MarketUpdateType::Invalid => return None,
        }
        Some(upd.ticker_id)
    }

    #[inline]
    pub fn bbo(&self, ticker_id: TickerId) -> Bbo {
        self.books[ticker_id as usize].bbo()
    }

    #[inline]
    pub fn live_orders(&self) -> usize {
        self.books.iter().map(|b| b.index.len()).sum()
    }

    /// (order_id, price, qty) of every live order on an instrument,
    /// sorted by order id. Recovery equivalence checks use this.
    pub fn orders_of(&self, ticker_id: TickerId) -> Vec<(OrderId, Price, Qty)> {
        let b = &self.books[ticker_id as usize];
        let mut v: Vec<_> = b
            .index
            .iter()
            .map(|(oid, &h)| (*oid, b.orders[h].price, b.orders[h].qty))
            .collect();
        v.sort_unstable();
        v
    }
}

impl Default for MarketOrderBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(oid: OrderId, side: Side, price: Price, qty: Qty) -> MarketUpdate {
        MarketUpdate {
            kind: MarketUpdateType::Add,
            order_id: oid,
            ticker_id: 0,
            side,
            price,
            qty,
            priority: oid,
        }
    }

    #[test]
    fn bbo_follows_best_levels() {
        let mut book = MarketOrderBook::new();
        book.apply(&add(1, Side::Buy, 100, 10));
        book.apply(&add(2, Side::Buy, 100, 5));
        book.apply(&add(3, Side::Sell, 102, 7));
        let bbo = book.bbo(0);
        assert_eq!(bbo.bid, Some((100, 15)));
        assert_eq!(bbo.ask, Some((102, 7)));
    }

    #[test]
    fn modify_adjusts_level_qty() {
        let mut book = MarketOrderBook::new();
        book.apply(&add(1, Side::Buy, 100, 10));
        book.apply(&MarketUpdate {
            kind: MarketUpdateType::Modify,
            order_id: 1,
            ticker_id: 0,
            side: Side::Buy,
            price: 100,
            qty: 6,
            priority: 1,
        });
        assert_eq!(book.bbo(0).bid, Some((100, 6)));
    }

    #[test]
    fn cancel_removes_order_and_empty_level() {
        let mut book = MarketOrderBook::new();
        book.apply(&add(1, Side::Sell, 101, 4));
        book.apply(&MarketUpdate {
            kind: MarketUpdateType::Cancel,
            order_id: 1,
            ticker_id: 0,
            side: Side::Sell,
            price: 101,
            qty: 4,
            priority: 1,
        });
        assert_eq!(book.bbo(0), Bbo::default());
        assert_eq!(book.live_orders(), 0);
    }

    #[test]
    fn clear_wipes_one_instrument_only() {
        let mut book = MarketOrderBook::new();
        book.apply(&add(1, Side::Buy, 100, 10));
        book.apply(&MarketUpdate {
            kind: MarketUpdateType::Add,
            order_id: 2,
            ticker_id: 1,
            side: Side::Buy,
            price: 50,
            qty: 1,
            priority: 1,
        });
        book.apply(&MarketUpdate {
            kind: MarketUpdateType::Clear,
            ticker_id: 0,
            ..MarketUpdate::default()
        });
        assert_eq!(book.bbo(0), Bbo::default());
        assert_eq!(book.bbo(1).bid, Some((50, 1)));
    }

    #[test]
    fn trades_do_not_mutate_the_book() {
        let mut book = MarketOrderBook::new();
        book.apply(&add(1, Side::Buy, 100, 10));
        book.apply(&MarketUpdate {
            kind: MarketUpdateType::Trade,
            ticker_id: 0,
            side: Side::Sell,
            price: 100,
            qty: 4,
            ..MarketUpdate::default()
        });
        assert_eq!(book.bbo(0).bid, Some((100, 10)));
    }

    #[test]
    fn display_formats_both_sides() {
        let mut book = MarketOrderBook::new();
        book.apply(&add(1, Side::Buy, 100, 10));
        assert_eq!(book.bbo(0).to_string(), "10@100 x -");
    }
}
