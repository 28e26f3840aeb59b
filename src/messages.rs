// src/messages.rs
//! In-process message types flowing over the SPSC rings.
//!
//! These are the unpacked forms; `wire.rs` holds the packed little-endian
//! records that frame them with sequence numbers on the network.

use crate::types::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRequestType {
    Invalid,
    New,
    Cancel,
}

impl ClientRequestType {
    #[inline]
    pub fn to_wire(self) -> u8 {
        match self {
            ClientRequestType::Invalid => 0,
            ClientRequestType::New => 1,
            ClientRequestType::Cancel => 2,
        }
    }

    #[inline]
    pub fn from_wire(v: u8) -> ClientRequestType {
        match v {
            1 => ClientRequestType::New,
            2 => ClientRequestType::Cancel,
            _ => ClientRequestType::Invalid,
        }
    }
}

/// An order request as the matching engine consumes it. `order_id` is the
/// client's own id for the order, not the market order id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientRequest {
    pub kind: ClientRequestType,
    pub client_id: ClientId,
    pub ticker_id: TickerId,
    pub order_id: OrderId,
    pub side: Side,
    pub price: Price,
    pub qty: Qty,
}

impl Default for ClientRequest {
    fn default() -> Self {
        Self {
            kind: ClientRequestType::Invalid,
            client_id: CLIENT_ID_INVALID,
            ticker_id: TICKER_ID_INVALID,
            order_id: ORDER_ID_INVALID,
            side: Side::Invalid,
            price: PRICE_INVALID,
            qty: QTY_INVALID,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientResponseType {
    Invalid,
    Accepted,
    Canceled,
    Filled,
    CancelRejected,
}

impl ClientResponseType {
    #[inline]
    pub fn to_wire(self) -> u8 {
        match self {
            ClientResponseType::Invalid => 0,
            ClientResponseType::Accepted => 1,
            ClientResponseType::Canceled => 2,
            ClientResponseType::Filled => 3,
            ClientResponseType::CancelRejected => 4,
        }
    }

    #[inline]
    pub fn from_wire(v: u8) -> ClientResponseType {
        match v {
            1 => ClientResponseType::Accepted,
            2 => ClientResponseType::Canceled,
            3 => ClientResponseType::Filled,
            4 => ClientResponseType::CancelRejected,
            _ => ClientResponseType::Invalid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientResponse {
    pub kind: ClientResponseType,
    pub client_id: ClientId,
    pub ticker_id: TickerId,
    pub client_order_id: OrderId,
    pub market_order_id: OrderId,
    pub side: Side,
    pub price: Price,
    pub exec_qty: Qty,
    pub leaves_qty: Qty,
}

impl Default for ClientResponse {
    fn default() -> Self {
        Self {
            kind: ClientResponseType::Invalid,
            client_id: CLIENT_ID_INVALID,
            ticker_id: TICKER_ID_INVALID,
            client_order_id: ORDER_ID_INVALID,
            market_order_id: ORDER_ID_INVALID,
            side: Side::Invalid,
            price: PRICE_INVALID,
            exec_qty: QTY_INVALID,
            leaves_qty: QTY_INVALID,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketUpdateType {
    Invalid,
    Clear,
    Add,
    Modify,
    Cancel,
    Trade,
    SnapshotStart,
    SnapshotEnd,
}

impl MarketUpdateType {
    #[inline]
    pub fn to_wire(self) -> u8 {
        match self {
            MarketUpdateType::Invalid => 0,
            MarketUpdateType::Clear => 1,
            MarketUpdateType::Add => 2,
            MarketUpdateType::Modify => 3,
            MarketUpdateType::Cancel => 4,
            MarketUpdateType::Trade => 5,
            MarketUpdateType::SnapshotStart => 6,
            MarketUpdateType::SnapshotEnd => 7,
        }
    }

    #[inline]
    pub fn from_wire(v: u8) -> MarketUpdateType {
        match v {
            1 => MarketUpdateType::Clear,
            2 => MarketUpdateType::Add,
            3 => MarketUpdateType::Modify,
            4 => MarketUpdateType::Cancel,
            5 => MarketUpdateType::Trade,
            6 => MarketUpdateType::SnapshotStart,
            7 => MarketUpdateType::SnapshotEnd,
            _ => MarketUpdateType::Invalid,
        }
    }
}

/// A single book mutation as published on the incremental stream.
///
/// `SnapshotStart` and `SnapshotEnd` overload `order_id` to carry the
/// incremental sequence number the snapshot round aligns with; it is not an
/// order identifier there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketUpdate {
    pub kind: MarketUpdateType,
    pub order_id: OrderId,
    pub ticker_id: TickerId,
    pub side: Side,
    pub price: Price,
    pub qty: Qty,
    pub priority: Priority,
}

impl Default for MarketUpdate {
    fn default() -> Self {
        Self {
            kind: MarketUpdateType::Invalid,
            order_id: ORDER_ID_INVALID,
            ticker_id: TICKER_ID_INVALID,
            side: Side::Invalid,
            price: PRICE_INVALID,
            qty: QTY_INVALID,
            priority: PRIORITY_INVALID,
        }
    }
}
