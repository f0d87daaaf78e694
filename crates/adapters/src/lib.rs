#![deny(unsafe_code)]

pub mod auth;
pub mod enrich;
pub mod http;
pub mod packet_filter;
pub mod sink;
pub mod storage;
pub mod transport;
pub mod udp;
