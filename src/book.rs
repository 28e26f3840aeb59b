// src/book.rs
//! Exchange-side limit order book, one per instrument.
//!
//! Orders live in a slab arena; FIFO linkage within a price level goes
//! through `prev`/`next` handles. Levels sit in per-side BTreeMaps so the
//! most aggressive price is the first (asks) or last (bids) key. Matching
//! is strict price-time priority: best level first, head of level first.

use crate::messages::*;
use crate::types::*;
use hashbrown::HashMap;
use slab::Slab;
use std::collections::BTreeMap;

type Handle = usize;

/// Slab slots reserved up front per instrument. Orders beyond this grow the
/// arena amortized; MAX_ORDER_IDS is the hard protocol ceiling, not the
/// resident footprint.
const ORDERS_PREALLOC: usize = 1 << 16;

#[derive(Debug)]
struct Order {
    client_id: ClientId,
    client_order_id: OrderId,
    market_order_id: OrderId,
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
    last_priority: Priority,
}

impl Level {
    #[inline]
    fn next_priority(&mut self) -> Priority {
        self.last_priority += 1;
        self.last_priority
    }
}

/// Responses and market updates produced while processing one request.
/// The engine drains this into its egress queues after each dispatch.
#[derive(Debug, Default)]
pub struct BookOutput {
    pub responses: Vec<ClientResponse>,
    pub updates: Vec<MarketUpdate>,
}

impl BookOutput {
    pub fn clear(&mut self) {
        self.responses.clear();
        self.updates.clear();
    }
}

pub struct OrderBook {
    ticker_id: TickerId,
    orders: Slab<Order>,
    bids: BTreeMap<Price, Level>,
    asks: BTreeMap<Price, Level>,
    by_market_oid: HashMap<OrderId, Handle>,
    by_client: HashMap<(ClientId, OrderId), Handle>,
    next_market_order_id: OrderId,
}

impl OrderBook {
    pub fn new(ticker_id: TickerId) -> Self {
        Self {
            ticker_id,
            orders: Slab::with_capacity(ORDERS_PREALLOC),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            by_market_oid: HashMap::with_capacity(ORDERS_PREALLOC),
            by_client: HashMap::with_capacity(ORDERS_PREALLOC),
            next_market_order_id: 1,
        }
    }

    #[inline]
    pub fn best_bid(&self) -> Option<Price> {
        self.bids.keys().next_back().copied()
    }

    #[inline]
    pub fn best_ask(&self) -> Option<Price> {
        self.asks.keys().next().copied()
    }

    #[inline]
    pub fn live_orders(&self) -> usize {
        self.by_market_oid.len()
    }

    /// Process a NEW request: accept, cross against the opposite side, rest
    /// any residual.
    pub fn add(
        &mut self,
        client_id: ClientId,
        client_order_id: OrderId,
        side: Side,
        price: Price,
        qty: Qty,
        out: &mut BookOutput,
    ) {
        let market_order_id = self.next_market_order_id;
        self.next_market_order_id += 1;

        out.responses.push(ClientResponse {
            kind: ClientResponseType::Accepted,
            client_id,
            ticker_id: self.ticker_id,
            client_order_id,
            market_order_id,
            side,
            price,
            exec_qty: 0,
            leaves_qty: qty,
        });

        let leaves = self.cross(client_id, client_order_id, market_order_id, side, price, qty, out);
        if leaves > 0 {
            let priority = self.rest(client_id, client_order_id, market_order_id, side, price, leaves);
            out.updates.push(MarketUpdate {
                kind: MarketUpdateType::Add,
                order_id: market_order_id,
                ticker_id: self.ticker_id,
                side,
                price,
                qty: leaves,
                priority,
            });
        }
        debug_assert!(self.uncrossed());
    }

    /// Process a CANCEL request. Unknown (client, order) pairs get a
    /// CANCEL_REJECTED and leave the book untouched.
    pub fn cancel(&mut self, client_id: ClientId, client_order_id: OrderId, out: &mut BookOutput) {
        let handle = match self.by_client.get(&(client_id, client_order_id)) {
            Some(&h) => h,
            None => {
                out.responses.push(ClientResponse {
                    kind: ClientResponseType::CancelRejected,
                    client_id,
                    ticker_id: self.ticker_id,
                    client_order_id,
                    ..ClientResponse::default()
                });
                return;
            }
        };

        let (market_order_id, side, price, qty, priority) = {
            let o = &self.orders[handle];
            (o.market_order_id, o.side, o.price, o.qty, o.priority)
        };

        out.responses.push(ClientResponse {
            kind: ClientResponseType::Canceled,
            client_id,
            ticker_id: self.ticker_id,
            client_order_id,
            market_order_id,
            side,
            price,
            exec_qty: QTY_INVALID,
            leaves_qty: qty,
        });
        out.updates.push(MarketUpdate {
            kind: MarketUpdateType::Cancel,
            order_id: market_order_id,
            ticker_id: self.ticker_id,
            side,
            price,
            qty,
            priority,
        });
        self.unlink(handle);
    }

    /// Match the incoming order against the opposite side while prices
    /// cross, best level first, FIFO within a level. Returns leaves.
    fn cross(
        &mut self,
        client_id: ClientId,
        client_order_id: OrderId,
        market_order_id: OrderId,
        side: Side,
        price: Price,
        qty: Qty,
        out: &mut BookOutput,
    ) -> Qty {
        let mut leaves = qty;
        while leaves > 0 {
            let best = match side {
                Side::Buy => self.best_ask(),
                Side::Sell => self.best_bid(),
                Side::Invalid => unreachable!("invalid side reached matching"),
            };
            let best_px = match best {
                Some(p) => p,
                None => break,
            };
            let crosses = match side {
                Side::Buy => price >= best_px,
                Side::Sell => price <= best_px,
                Side::Invalid => false,
            };
            if !crosses {
                break;
            }

            let head = {
                let lvl = self.level(side.opposite(), best_px);
                lvl.head.expect("non-empty level without head")
            };
            let (m_oid, m_client, m_coid, m_side, m_qty, m_prio) = {
                let o = &self.orders[head];
                (o.market_order_id, o.client_id, o.client_order_id, o.side, o.qty, o.priority)
            };

            let fill = leaves.min(m_qty);
            leaves -= fill;
            let m_left = m_qty - fill;

            // aggressor first, then the resting owner
            out.responses.push(ClientResponse {
                kind: ClientResponseType::Filled,
                client_id,
                ticker_id: self.ticker_id,
                client_order_id,
                market_order_id,
                side,
                price: best_px,
                exec_qty: fill,
                leaves_qty: leaves,
            });
            out.responses.push(ClientResponse {
                kind: ClientResponseType::Filled,
                client_id: m_client,
                ticker_id: self.ticker_id,
                client_order_id: m_coid,
                market_order_id: m_oid,
                side: m_side,
                price: best_px,
                exec_qty: fill,
                leaves_qty: m_left,
            });
            out.updates.push(MarketUpdate {
                kind: MarketUpdateType::Trade,
                order_id: ORDER_ID_INVALID,
                ticker_id: self.ticker_id,
                side,
                price: best_px,
                qty: fill,
                priority: PRIORITY_INVALID,
            });

            if m_left == 0 {
                out.updates.push(MarketUpdate {
                    kind: MarketUpdateType::Cancel,
                    order_id: m_oid,
                    ticker_id: self.ticker_id,
                    side: m_side,
                    price: best_px,
                    qty: m_qty,
                    priority: PRIORITY_INVALID,
                });
                self.unlink(head);
            } else {
                self.orders[head].qty = m_left;
                self.level(m_side, best_px).total_qty -= u64::from(fill);
                out.updates.push(MarketUpdate {
                    kind: MarketUpdateType::Modify,
                    order_id: m_oid,
                    ticker_id: self.ticker_id,
                    side: m_side,
                    price: best_px,
                    qty: m_left,
                    priority: m_prio,
                });
            }
        }
        leaves
    }

    /// Rest the residual at the tail of its price level; the level is
    /// created on first use. Returns the assigned FIFO priority.
    fn rest(
        &mut self,
        client_id: ClientId,
        client_order_id: OrderId,
        market_order_id: OrderId,
        side: Side,
        price: Price,
        qty: Qty,
    ) -> Priority {
        let (priority, prev_tail) = {
            let lvl = self.levels_mut(side).entry(price).or_default();
            (lvl.next_priority(), lvl.tail)
        };
        let handle = self.orders.insert(Order {
            client_id,
            client_order_id,
            market_order_id,
            side,
            price,
            qty,
            priority,
            prev: prev_tail,
            next: None,
        });
        if let Some(t) = prev_tail {
            self.orders[t].next = Some(handle);
        }
        {
            let lvl = self.level(side, price);
            if prev_tail.is_none() {
                lvl.head = Some(handle);
            }
            lvl.tail = Some(handle);
            lvl.count += 1;
            lvl.total_qty += u64::from(qty);
        }
        self.by_market_oid.insert(market_order_id, handle);
        self.by_client.insert((client_id, client_order_id), handle);
        priority
    }

    /// Remove an order from its level list, both indexes and the arena.
    /// An emptied level is dropped from its side map.
    fn unlink(&mut self, handle: Handle) {
        let (client_id, client_order_id, market_order_id, side, price, qty, prev, next) = {
            let o = &self.orders[handle];
            (
                o.client_id,
                o.client_order_id,
                o.market_order_id,
                o.side,
                o.price,
                o.qty,
                o.prev,
                o.next,
            )
        };
        if let Some(p) = prev {
            self.orders[p].next = next;
        }
        if let Some(n) = next {
            self.orders[n].prev = prev;
        }
        let empty = {
            let lvl = self.level(side, price);
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
        self.by_market_oid.remove(&market_order_id);
        self.by_client.remove(&(client_id, client_order_id));
        self.orders.remove(handle);
    }

    #[inline]
    fn levels_mut(&mut self, side: Side) -> &mut BTreeMap<Price, Level> {
        match side {
            Side::Buy => &mut self.bids,
            _ => &mut self.asks,
        }
    }

    #[inline]
    fn level(&mut self, side: Side, price: Price) -> &mut Level {
        self.levels_mut(side)
            .get_mut(&price)
            .expect("level missing for live order")
    }

    fn uncrossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => b < a,
            _ => true,
        }
    }

    /// Market order ids resting at a price, FIFO head to tail.
    #[cfg(test)]
    fn orders_at(&self, side: Side, price: Price) -> Vec<OrderId> {
        let lvl = match side {
            Side::Buy => self.bids.get(&price),
            _ => self.asks.get(&price),
        };
        let mut out = Vec::new();
        let mut cur = lvl.and_then(|l| l.head);
        while let Some(h) = cur {
            out.push(self.orders[h].market_order_id);
            cur = self.orders[h].next;
        }
        out
    }

    #[cfg(test)]
    fn qty_of(&self, market_order_id: OrderId) -> Option<Qty> {
        self.by_market_oid
            .get(&market_order_id)
            .map(|&h| self.orders[h].qty)
    }
}
