// src/sequencer.rs
//! FIFO sequencer: establishes arrival order across TCP sockets.
//!
//! Requests read from different sockets within one gateway poll cycle are
//! buffered with their receive timestamps and published to the engine in
//! timestamp order on `flush()`. Draining socket A before socket B must not
//! grant A's client priority over a B request that actually arrived first.

use crate::messages::ClientRequest;
use crate::spsc::SpscQueue;
use crate::types::Nanos;
use smallvec::SmallVec;
use std::sync::Arc;

const BATCH_INLINE: usize = 64;

pub struct FifoSequencer {
    tx_requests: Arc<SpscQueue<ClientRequest>>,
    pending: SmallVec<[(Nanos, ClientRequest); BATCH_INLINE]>,
}

impl FifoSequencer {
    pub fn new(tx_requests: Arc<SpscQueue<ClientRequest>>) -> Self {
        Self {
            tx_requests,
            pending: SmallVec::new(),
        }
    }

    #[inline]
    pub fn push(&mut self, rx_nanos: Nanos, request: ClientRequest) {
        self.pending.push((rx_nanos, request));
    }

    /// Publish the batch in receive-timestamp order and clear it. The sort
    /// is stable, so equal timestamps keep their insertion order.
    pub fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        self.pending.sort_by_key(|(ts, _)| *ts);
        for (_, req) in self.pending.drain(..) {
            assert!(
                self.tx_requests.push(req).is_ok(),
                "matching-engine ingress queue full"
            );
        }
    }

    #[inline]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ClientRequestType;
    use crate::types::*;

    fn req(order_id: OrderId) -> ClientRequest {
        ClientRequest {
            kind: ClientRequestType::New,
            order_id,
            ..ClientRequest::default()
        }
    }

    fn drain(q: &SpscQueue<ClientRequest>) -> Vec<OrderId> {
        let mut v = Vec::new();
        while let Some(r) = q.pop() {
            v.push(r.order_id);
        }
        v
    }

    #[test]
    fn publishes_in_timestamp_order_not_drain_order() {
        let q = Arc::new(SpscQueue::new(16));
        let mut seq = FifoSequencer::new(q.clone());
        // socket S1 drained first at t=200, S2 second at t=100
        seq.push(200, req(1));
        seq.push(100, req(2));
        seq.flush();
        assert_eq!(drain(&q), vec![2, 1]);
    }

    #[test]
    fn equal_timestamps_keep_insertion_order() {
        let q = Arc::new(SpscQueue::new(16));
        let mut seq = FifoSequencer::new(q.clone());
        seq.push(50, req(1));
        seq.push(50, req(2));
        seq.push(50, req(3));
        seq.flush();
        assert_eq!(drain(&q), vec![1, 2, 3]);
    }

    #[test]
    fn flush_clears_the_batch() {
        let q = Arc::new(SpscQueue::new(16));
        let mut seq = FifoSequencer::new(q.clone());
        seq.push(10, req(1));
        seq.flush();
        assert_eq!(seq.pending_len(), 0);
        seq.flush(); // no-op
        assert_eq!(drain(&q), vec![1]);
    }
}
