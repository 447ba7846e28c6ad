//! ## Wire framing for the radio's UDP control/serial/audio protocol
//!
//! This crate builds and parses the fixed-layout datagrams exchanged with a
//! networked amateur-radio transceiver: the session handshake and keepalive
//! packets shared by all three streams, the CAT serial framing, and the
//! two-packet audio fragmentation. It performs no I/O and holds no state;
//! callers own sockets, sequence counters and buffers.

pub mod audio;
pub mod control;
pub mod packet;
pub mod seq;
pub mod serial;

#[derive(Debug)]
pub enum Error {
    Desync(&'static str),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Desync(msg) => write!(f, "protocol desync: {msg}"),
        }
    }
}
