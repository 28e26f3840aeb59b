// src/wire.rs
// Packed little-endian wire records, 1-byte alignment, no length prefix:
// every record is fixed-size with a leading sequence number.
// - TCP order gateway: OmClientRequest / OmClientResponse, per-client seq
// - UDP market data:   MdpMarketUpdate, one record per datagram

use crate::messages::{
    ClientRequest, ClientRequestType, ClientResponse, ClientResponseType, MarketUpdate,
    MarketUpdateType,
};
use crate::types::Side;
use zerocopy::byteorder::{LittleEndian, I64, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

type U32le = U32<LittleEndian>;
type U64le = U64<LittleEndian>;
type I64le = I64<LittleEndian>;

#[derive(Clone, Copy, FromZeroes, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct OmClientRequest {
    pub seq: U64le,
    pub kind: u8,
    pub client_id: U32le,
    pub ticker_id: U32le,
    pub order_id: U64le,
    pub side: i8,
    pub price: I64le,
    pub qty: U32le,
}

pub const OM_CLIENT_REQUEST_SIZE: usize = std::mem::size_of::<OmClientRequest>();
const _: () = assert!(OM_CLIENT_REQUEST_SIZE == 38);

impl OmClientRequest {
    pub fn encode(seq: u64, req: &ClientRequest) -> Self {
        Self {
            seq: U64le::new(seq),
            kind: req.kind.to_wire(),
            client_id: U32le::new(req.client_id),
            ticker_id: U32le::new(req.ticker_id),
            order_id: U64le::new(req.order_id),
            side: req.side.to_wire(),
            price: I64le::new(req.price),
            qty: U32le::new(req.qty),
        }
    }

    pub fn decode(&self) -> (u64, ClientRequest) {
        (
            self.seq.get(),
            ClientRequest {
                kind: ClientRequestType::from_wire(self.kind),
                client_id: self.client_id.get(),
                ticker_id: self.ticker_id.get(),
                order_id: self.order_id.get(),
                side: Side::from_wire(self.side),
                price: self.price.get(),
                qty: self.qty.get(),
            },
        )
    }
}

#[derive(Clone, Copy, FromZeroes, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct OmClientResponse {
    pub seq: U64le,
    pub kind: u8,
    pub client_id: U32le,
    pub ticker_id: U32le,
    pub client_order_id: U64le,
    pub market_order_id: U64le,
    pub side: i8,
    pub price: I64le,
    pub exec_qty: U32le,
    pub leaves_qty: U32le,
}

pub const OM_CLIENT_RESPONSE_SIZE: usize = std::mem::size_of::<OmClientResponse>();
const _: () = assert!(OM_CLIENT_RESPONSE_SIZE == 50);

impl OmClientResponse {
    pub fn encode(seq: u64, resp: &ClientResponse) -> Self {
        Self {
            seq: U64le::new(seq),
            kind: resp.kind.to_wire(),
            client_id: U32le::new(resp.client_id),
            ticker_id: U32le::new(resp.ticker_id),
            client_order_id: U64le::new(resp.client_order_id),
            market_order_id: U64le::new(resp.market_order_id),
            side: resp.side.to_wire(),
            price: I64le::new(resp.price),
            exec_qty: U32le::new(resp.exec_qty),
            leaves_qty: U32le::new(resp.leaves_qty),
        }
    }

    pub fn decode(&self) -> (u64, ClientResponse) {
        (
            self.seq.get(),
            ClientResponse {
                kind: ClientResponseType::from_wire(self.kind),
                client_id: self.client_id.get(),
                ticker_id: self.ticker_id.get(),
                client_order_id: self.client_order_id.get(),
                market_order_id: self.market_order_id.get(),
                side: Side::from_wire(self.side),
                price: self.price.get(),
                exec_qty: self.exec_qty.get(),
                leaves_qty: self.leaves_qty.get(),
            },
        )
    }
}

#[derive(Clone, Copy, FromZeroes, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct MdpMarketUpdate {
    pub seq: U64le,
    pub kind: u8,
    pub order_id: U64le,
    pub ticker_id: U32le,
    pub side: i8,
    pub price: I64le,
    pub qty: U32le,
    pub priority: U64le,
}

pub const MDP_MARKET_UPDATE_SIZE: usize = std::mem::size_of::<MdpMarketUpdate>();
const _: () = assert!(MDP_MARKET_UPDATE_SIZE == 42);

impl MdpMarketUpdate {
    pub fn encode(seq: u64, upd: &MarketUpdate) -> Self {
        Self {
            seq: U64le::new(seq),
            kind: upd.kind.to_wire(),
            order_id: U64le::new(upd.order_id),
            ticker_id: U32le::new(upd.ticker_id),
            side: upd.side.to_wire(),
            price: I64le::new(upd.price),
            qty: U32le::new(upd.qty),
            priority: U64le::new(upd.priority),
        }
    }

    pub fn decode(&self) -> (u64, MarketUpdate) {
        (
            self.seq.get(),
            MarketUpdate {
                kind: MarketUpdateType::from_wire(self.kind),
                order_id: self.order_id.get(),
                ticker_id: self.ticker_id.get(),
                side: Side::from_wire(self.side),
                price: self.price.get(),
                qty: self.qty.get(),
                priority: self.priority.get(),
            },
        )
    }
}
