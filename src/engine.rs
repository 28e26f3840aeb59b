// src/engine.rs
//! Matching-engine thread: single consumer of the gateway's ingress ring,
//! single producer on the response and market-update rings.

use crate::book::{BookOutput, OrderBook};
use crate::messages::*;
use crate::metrics;
use crate::spsc::SpscQueue;
use crate::types::*;
use crate::util::{spin_wait, RunFlag};
use std::sync::Arc;

pub struct MatchingEngine {
    books: Vec<OrderBook>,
    rx_requests: Arc<SpscQueue<ClientRequest>>,
    tx_responses: Arc<SpscQueue<ClientResponse>>,
    tx_updates: Arc<SpscQueue<MarketUpdate>>,
    out: BookOutput,
}

impl MatchingEngine {
    pub fn new(
        rx_requests: Arc<SpscQueue<ClientRequest>>,
        tx_responses: Arc<SpscQueue<ClientResponse>>,
        tx_updates: Arc<SpscQueue<MarketUpdate>>,
    ) -> Self {
        let books = (0..MAX_TICKERS as TickerId).map(OrderBook::new).collect();
        Self {
            books,
            rx_requests,
            tx_responses,
            tx_updates,
            out: BookOutput::default(),
        }
    }

    pub fn run(&mut self, run: &RunFlag) {
        log::info!("matching engine running, {} instruments", self.books.len());
        while run.is_running() {
            if let Some(req) = self.rx_requests.pop() {
                self.process(&req);
            } else {
                spin_wait(64);
            }
        }
        log::info!("matching engine stopped");
    }

    /// Dispatch one request and flush the book's emissions. A request with
    /// an unknown type or out-of-range ticker is a protocol bug upstream
    /// of this queue and aborts.
    pub fn process(&mut self, req: &ClientRequest) {
        let ticker = req.ticker_id as usize;
        assert!(
            ticker < self.books.len(),
            "request for unknown ticker {}: {:?}",
            req.ticker_id,
            req
        );
        self.out.clear();
        let book = &mut self.books[ticker];
        match req.kind {
            ClientRequestType::New => {
                book.add(req.client_id, req.order_id, req.side, req.price, req.qty, &mut self.out);
            }
            ClientRequestType::Cancel => {
                book.cancel(req.client_id, req.order_id, &mut self.out);
            }
            ClientRequestType::Invalid => {
                panic!("invalid client-request type: {:?}", req);
            }
        }
        metrics::inc_engine_requests();
        metrics::set_live_orders(self.books.iter().map(|b| b.live_orders()).sum());
        for resp in self.out.responses.drain(..) {
            log::debug!("engine response {:?}", resp);
            assert!(
                self.tx_responses.push(resp).is_ok(),
                "client-response queue full"
            );
        }
        for upd in self.out.updates.drain(..) {
            if upd.kind == MarketUpdateType::Trade {
                metrics::inc_engine_trades();
            }
            log::debug!("engine update {:?}", upd);
            assert!(self.tx_updates.push(upd).is_ok(), "market-update queue full");
        }
    }

    #[inline]
    pub fn live_orders(&self) -> usize {
        self.books.iter().map(|b| b.live_orders()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Rig {
        engine: MatchingEngine,
        responses: Arc<SpscQueue<ClientResponse>>,
        updates: Arc<SpscQueue<MarketUpdate>>,
    }

    fn rig() -> Rig {
        let requests = Arc::new(SpscQueue::new(256));
        let responses = Arc::new(SpscQueue::new(256));
        let updates = Arc::new(SpscQueue::new(256));
        Rig {
            engine: MatchingEngine::new(requests, responses.clone(), updates.clone()),
            responses,
            updates,
        }
    }

    fn new_order(
        client_id: ClientId,
        order_id: OrderId,
        ticker_id: TickerId,
        side: Side,
        price: Price,
        qty: Qty,
    ) -> ClientRequest {
        ClientRequest {
            kind: ClientRequestType::New,
            client_id,
            ticker_id,
            order_id,
            side,
            price,
            qty,
        }
    }

    fn drain<T>(q: &SpscQueue<T>) -> Vec<T> {
        let mut v = Vec::new();
        while let Some(x) = q.pop() {
            v.push(x);
        }
        v
    }

    #[test]
    fn single_instrument_match_flow() {
        let mut r = rig();
        r.engine.process(&new_order(1, 100, 0, Side::Buy, 100, 10));
        r.engine.process(&new_order(2, 200, 0, Side::Sell, 99, 4));

        let resps = drain(&r.responses);
        let upds = drain(&r.updates);

        let resp_kinds: Vec<_> = resps.iter().map(|x| x.kind).collect();
        assert_eq!(
            resp_kinds,
            vec![
                ClientResponseType::Accepted, // A
                ClientResponseType::Accepted, // B
                ClientResponseType::Filled,   // B, aggressor
                ClientResponseType::Filled,   // A, resting
            ]
        );
        assert_eq!(resps[0].market_order_id, 1);
        assert_eq!(resps[1].market_order_id, 2);
        assert_eq!((resps[2].exec_qty, resps[2].leaves_qty), (4, 0));
        assert_eq!((resps[3].exec_qty, resps[3].leaves_qty), (4, 6));
        // trade happens at the resting price
        assert_eq!(resps[2].price, 100);

        let upd_kinds: Vec<_> = upds.iter().map(|x| x.kind).collect();
        assert_eq!(
            upd_kinds,
            vec![
                MarketUpdateType::Add,    // A rests
                MarketUpdateType::Trade,  // B crosses
                MarketUpdateType::Modify, // A reduced to 6
            ]
        );
        assert_eq!(upds[0].order_id, 1);
        assert_eq!(upds[0].priority, 1);
        assert_eq!((upds[1].price, upds[1].qty), (100, 4));
        assert_eq!(upds[1].order_id, ORDER_ID_INVALID);
        assert_eq!((upds[2].order_id, upds[2].qty), (1, 6));

        assert_eq!(r.engine.live_orders(), 1);
    }

    #[test]
    fn residuals_rest_in_fifo_order() {
        let mut r = rig();
        r.engine.process(&new_order(1, 1, 0, Side::Buy, 100, 5));
        r.engine.process(&new_order(2, 2, 0, Side::Buy, 100, 3));

        let upds = drain(&r.updates);
        assert_eq!(upds.len(), 2);
        assert_eq!((upds[0].order_id, upds[0].priority), (1, 1));
        assert_eq!((upds[1].order_id, upds[1].priority), (2, 2));
    }

    #[test]
    fn cancel_of_unknown_order_only_rejects() {
        let mut r = rig();
        r.engine.process(&ClientRequest {
            kind: ClientRequestType::Cancel,
            client_id: 1,
            ticker_id: 0,
            order_id: 777,
            ..ClientRequest::default()
        });
        let resps = drain(&r.responses);
        assert_eq!(resps.len(), 1);
        assert_eq!(resps[0].kind, ClientResponseType::CancelRejected);
        assert!(drain(&r.updates).is_empty());
        assert_eq!(r.engine.live_orders(), 0);
    }

    #[test]
    fn instruments_are_independent() {
        let mut r = rig();
        r.engine.process(&new_order(1, 1, 0, Side::Buy, 100, 5));
        r.engine.process(&new_order(2, 2, 1, Side::Sell, 90, 5));
        // crossing prices on different tickers must not trade
        let upds = drain(&r.updates);
        assert!(upds.iter().all(|u| u.kind == MarketUpdateType::Add));
        assert_eq!(r.engine.live_orders(), 2);
    }

    #[test]
    #[should_panic(expected = "unknown ticker")]
    fn out_of_range_ticker_is_fatal() {
        let mut r = rig();
        r.engine.process(&new_order(1, 1, MAX_TICKERS as TickerId, Side::Buy, 100, 5));
    }

    #[test]
    fn filled_quantities_conserve_per_market_order() {
        let mut r = rig();
        r.engine.process(&new_order(1, 1, 0, Side::Sell, 100, 7));
        r.engine.process(&new_order(2, 2, 0, Side::Buy, 100, 3));
        r.engine.process(&new_order(3, 3, 0, Side::Buy, 100, 9));

        let resps = drain(&r.responses);
        let filled_for = |moid: OrderId| -> u64 {
            resps
                .iter()
                .filter(|x| x.kind == ClientResponseType::Filled && x.market_order_id == moid)
                .map(|x| u64::from(x.exec_qty))
                .sum()
        };
        // moid 1 sold 7 total across two aggressors, then left the book
        assert_eq!(filled_for(1), 7);
        assert_eq!(r.engine.live_orders(), 1); // moid 3's residual of 5
    }
}
