//! tickex: a low-latency electronic trading venue and participant stack.
//!
//! Two processes cooperate over a local network. The exchange accepts
//! sequenced orders over TCP, matches them in per-instrument price-time
//! priority books, and publishes every book mutation on a sequenced
//! incremental multicast stream plus periodic full snapshots on a second
//! group. Participants rebuild their own books from the incremental
//! stream and splice in a snapshot round whenever they detect a gap.
//!
//! Threads communicate exclusively through SPSC rings; see the `exchange`
//! and `trader` binaries for the wiring.

pub mod book;
pub mod config;
pub mod consumer;
pub mod engine;
pub mod gateway;
pub mod gw_client;
pub mod market_book;
pub mod messages;
pub mod metrics;
pub mod net;
pub mod publisher;
pub mod sequencer;
pub mod spsc;
pub mod synthesizer;
pub mod types;
pub mod util;
pub mod wire;
