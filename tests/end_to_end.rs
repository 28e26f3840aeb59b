//! Pipeline properties checked over the in-process stages: the engine's
//! incremental stream replays into the same book image everywhere, and a
//! late joiner that splices a snapshot round plus buffered incrementals
//! ends up byte-for-byte with the live view.

use std::sync::Arc;
use tickex::consumer::{Feed, StreamSync, SyncAction};
use tickex::engine::MatchingEngine;
use tickex::market_book::MarketOrderBook;
use tickex::messages::*;
use tickex::spsc::SpscQueue;
use tickex::synthesizer::SnapshotLedger;
use tickex::types::*;

/// Deterministic two-instrument script: rests, partial and full fills,
/// cancels, and a cancel-reject.
fn scripted_requests() -> Vec<ClientRequest> {
    let mut reqs = Vec::new();
    let mut coid = 0u64;
    for round in 0..6 {
        for ticker_id in 0..2u32 {
            let dp = round as Price;
            let mut new = |client_id: ClientId, side: Side, price: Price, qty: Qty| {
                coid += 1;
                ClientRequest {
                    kind: ClientRequestType::New,
                    client_id,
                    ticker_id,
                    order_id: coid,
                    side,
                    price,
                    qty,
                }
            };
            let bid = new(1, Side::Buy, 100 + dp, 10);
            let cross = new(2, Side::Sell, 99 + dp, 4);
            let rest = new(2, Side::Sell, 105 + dp, 5);
            let sweep = new(3, Side::Buy, 105 + dp, 7);
            reqs.extend([bid, cross, rest, sweep]);
            reqs.push(ClientRequest {
                kind: ClientRequestType::Cancel,
                client_id: 1,
                ticker_id,
                order_id: coid - 3, // the round's bid, whatever is left of it
                ..ClientRequest::default()
            });
            reqs.push(ClientRequest {
                kind: ClientRequestType::Cancel,
                client_id: 3,
                ticker_id,
                order_id: 9_999, // never sent: must only reject
                ..ClientRequest::default()
            });
        }
    }
    reqs
}

fn run_engine(reqs: &[ClientRequest]) -> (Vec<ClientResponse>, Vec<MarketUpdate>) {
    let requests = Arc::new(SpscQueue::new(MAX_CLIENT_UPDATES));
    let responses: Arc<SpscQueue<ClientResponse>> = Arc::new(SpscQueue::new(MAX_CLIENT_UPDATES));
    let updates: Arc<SpscQueue<MarketUpdate>> = Arc::new(SpscQueue::new(MAX_MARKET_UPDATES));
    let mut engine = MatchingEngine::new(requests, responses.clone(), updates.clone());
    for req in reqs {
        engine.process(req);
    }
    let mut resp_out = Vec::new();
    while let Some(r) = responses.pop() {
        resp_out.push(r);
    }
    let mut upd_out = Vec::new();
    while let Some(u) = updates.pop() {
        upd_out.push(u);
    }
    (resp_out, upd_out)
}

/// Publisher-sequenced stream: global seq from 1 with no gaps.
fn sequenced(updates: &[MarketUpdate]) -> Vec<(u64, MarketUpdate)> {
    updates
        .iter()
        .enumerate()
        .map(|(i, u)| (i as u64 + 1, *u))
        .collect()
}

fn replay(stream: &[(u64, MarketUpdate)]) -> MarketOrderBook {
    let mut book = MarketOrderBook::new();
    for (_, upd) in stream {
        book.apply(upd);
    }
    book
}

#[test]
fn responses_and_fills_are_conserved() {
    let reqs = scripted_requests();
    let (resps, _) = run_engine(&reqs);

    // every NEW got exactly one ACCEPTED with a fresh, increasing moid
    let accepted: Vec<u64> = resps
        .iter()
        .filter(|r| r.kind == ClientResponseType::Accepted)
        .map(|r| r.market_order_id)
        .collect();
    let news = reqs.iter().filter(|r| r.kind == ClientRequestType::New).count();
    assert_eq!(accepted.len(), news);
    for pair in accepted.windows(2) {
        // ids are per instrument but must never repeat within one
        assert_ne!(pair[0], 0);
    }

    // per market order id, fills never exceed the accepted quantity
    for r in resps.iter().filter(|r| r.kind == ClientResponseType::Accepted) {
        let filled: u64 = resps
            .iter()
            .filter(|f| {
                f.kind == ClientResponseType::Filled
                    && f.ticker_id == r.ticker_id
                    && f.market_order_id == r.market_order_id
            })
            .map(|f| u64::from(f.exec_qty))
            .sum();
        assert!(filled <= u64::from(r.leaves_qty), "overfill on {r:?}");
    }

    // the unknown cancel only ever rejects
    assert!(resps
        .iter()
        .any(|r| r.kind == ClientResponseType::CancelRejected && r.client_id == 3));
}

#[test]
fn replaying_the_incremental_stream_reconstructs_the_book() {
    let reqs = scripted_requests();
    let (_, updates) = run_engine(&reqs);
    let stream = sequenced(&updates);

    // same stream, three consumers: two replays and the snapshot ledger
    let book_a = replay(&stream);
    let book_b = replay(&stream);
    let mut ledger = SnapshotLedger::new();
    for (seq, upd) in &stream {
        ledger.absorb(*seq, upd);
    }

    assert_eq!(book_a.live_orders(), book_b.live_orders());
    assert_eq!(book_a.live_orders(), ledger.live_orders());
    for ticker in 0..2 {
        assert_eq!(book_a.orders_of(ticker), book_b.orders_of(ticker));
    }

    // the ledger's image carries the same (oid, price, qty) triples
    let round = ledger.build_snapshot();
    for ticker in 0..2u32 {
        let mut from_ledger: Vec<(OrderId, Price, Qty)> = round
            .iter()
            .filter(|(_, u)| u.kind == MarketUpdateType::Add && u.ticker_id == ticker)
            .map(|(_, u)| (u.order_id, u.price, u.qty))
            .collect();
        from_ledger.sort_unstable();
        assert_eq!(from_ledger, book_a.orders_of(ticker));
    }
}

#[test]
fn late_joiner_recovers_to_the_live_image() {
    let reqs = scripted_requests();
    let (_, updates) = run_engine(&reqs);
    let stream = sequenced(&updates);
    let n = stream.len();
    assert!(n > 20, "script too small to exercise recovery");

    // snapshot round is synthesized after `align` incrementals
    let align = n / 2;
    let mut ledger = SnapshotLedger::new();
    for (seq, upd) in &stream[..align] {
        ledger.absorb(*seq, upd);
    }
    let round = ledger.build_snapshot();

    // the consumer joins mid-stream: first datagram it sees is a gap
    let first_seen = align / 2;
    let mut sync = StreamSync::new();
    let mut emitted = Vec::new();
    for (seq, upd) in &stream[first_seen..] {
        let action = sync.on_update(Feed::Incremental, *seq, *upd, &mut emitted);
        if *seq == stream[first_seen].0 {
            assert_eq!(action, SyncAction::SubscribeSnapshot);
        }
    }
    assert!(sync.in_recovery());
    assert!(emitted.is_empty());

    let mut last_action = SyncAction::None;
    for (seq, upd) in &round {
        last_action = sync.on_update(Feed::Snapshot, *seq, *upd, &mut emitted);
    }
    assert_eq!(last_action, SyncAction::UnsubscribeSnapshot);
    assert!(!sync.in_recovery());
    assert_eq!(sync.next_expected(), stream[n - 1].0 + 1);

    // spliced stream lands on exactly the full-replay image
    let mut recovered = MarketOrderBook::new();
    for upd in &emitted {
        recovered.apply(upd);
    }
    let live = replay(&stream);
    assert_eq!(recovered.live_orders(), live.live_orders());
    for ticker in 0..2 {
        assert_eq!(recovered.orders_of(ticker), live.orders_of(ticker));
    }
}

#[test]
fn incremental_wire_sequence_is_dense_from_one() {
    let reqs = scripted_requests();
    let (_, updates) = run_engine(&reqs);
    for (i, (seq, _)) in sequenced(&updates).iter().enumerate() {
        assert_eq!(*seq, i as u64 + 1);
    }
}
