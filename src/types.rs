// src/types.rs
//! Semantic primitives shared by the exchange and participant processes.
//!
//! Identifiers are dense unsigned integers; the max value of each width is
//! reserved as the INVALID sentinel so messages can travel as flat structs
//! with no optional fields.

pub type OrderId = u64;
pub const ORDER_ID_INVALID: OrderId = OrderId::MAX;

pub type TickerId = u32;
pub const TICKER_ID_INVALID: TickerId = TickerId::MAX;

pub type ClientId = u32;
pub const CLIENT_ID_INVALID: ClientId = ClientId::MAX;

/// Price in ticks. Negative values are legal.
pub type Price = i64;
pub const PRICE_INVALID: Price = Price::MAX;

pub type Qty = u32;
pub const QTY_INVALID: Qty = Qty::MAX;

/// FIFO position of a resting order within its price level.
pub type Priority = u64;
pub const PRIORITY_INVALID: Priority = Priority::MAX;

/// Monotonic nanoseconds, see [`crate::util::now_nanos`].
pub type Nanos = u64;

/// Distinct instruments the venue supports.
pub const MAX_TICKERS: usize = 8;
/// Concurrent client identities.
pub const MAX_CLIENTS: usize = 256;
/// Live orders per instrument.
pub const MAX_ORDER_IDS: usize = 1 << 20;
/// Price-level slot capacity per side.
pub const MAX_PRICE_LEVELS: usize = 256;
/// Depth of the request/response queues.
pub const MAX_CLIENT_UPDATES: usize = 1 << 18;
/// Depth of the market-update queues.
pub const MAX_MARKET_UPDATES: usize = 1 << 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Buy,
    Sell,
    Invalid,
}

impl Side {
    #[inline]
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
            Side::Invalid => Side::Invalid,
        }
    }

    /// Wire encoding: +1 buy, -1 sell, 0 invalid.
    #[inline]
    pub fn to_wire(self) -> i8 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
            Side::Invalid => 0,
        }
    }

    #[inline]
    pub fn from_wire(v: i8) -> Side {
        match v {
            1 => Side::Buy,
            -1 => Side::Sell,
            _ => Side::Invalid,
        }
    }
}

impl Default for Side {
    fn default() -> Self {
        Side::Invalid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_wire_codes() {
        assert_eq!(Side::from_wire(Side::Buy.to_wire()), Side::Buy);
        assert_eq!(Side::from_wire(Side::Sell.to_wire()), Side::Sell);
        assert_eq!(Side::from_wire(0), Side::Invalid);
        assert_eq!(Side::from_wire(42), Side::Invalid);
    }

    #[test]
    fn sentinels_are_max() {
        assert_eq!(ORDER_ID_INVALID, u64::MAX);
        assert_eq!(TICKER_ID_INVALID, u32::MAX);
        assert_eq!(PRICE_INVALID, i64::MAX);
    }
}
