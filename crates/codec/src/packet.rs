//! Session-substrate packet framing: pkt3/4/5/6 (handshake/disconnect),
//! pkt7 (keepalive) and pkt0 (tracked idle + retransmit request).
//!
//! Multi-byte fields are little-endian except the two session ids, which the
//! radio expects big-endian.

use bytes::{Buf, BufMut, BytesMut};

use crate::Error;

/// Packs an IPv4 address and local UDP port into the client's session id.
pub fn local_sid(ipv4: [u8; 4], port: u16) -> u32 {
    let ip = u32::from_be_bytes(ipv4);
    (ip << 16) | port as u32
}

fn put_sids(buf: &mut BytesMut, local_sid: u32, remote_sid: u32) {
    buf.put_u32(local_sid);
    buf.put_u32(remote_sid);
}

/// Builds a pkt3 session request.
pub fn build_pkt3(local_sid: u32) -> BytesMut {
    let mut buf = BytesMut::with_capacity(16);
    buf.put_slice(&[0x10, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00]);
    put_sids(&mut buf, local_sid, 0);
    buf
}

/// Returns `true` if `data` looks like a pkt4 session reply.
pub fn is_pkt4(data: &[u8]) -> bool {
    data.len() >= 16 && data[0..6] == [0x10, 0x00, 0x00, 0x00, 0x04, 0x00]
}

/// Extracts the remote session id carried by a pkt4 reply.
pub fn parse_pkt4_remote_sid(data: &[u8]) -> Result<u32, Error> {
    if !is_pkt4(data) {
        return Err(Error::Desync("not a pkt4"));
    }
    Ok(u32::from_be_bytes(data[8..12].try_into().unwrap()))
}

/// Builds a pkt6 ready packet.
pub fn build_pkt6(local_sid: u32, remote_sid: u32) -> BytesMut {
    let mut buf = BytesMut::with_capacity(18);
    buf.put_slice(&[0x10, 0x00, 0x00, 0x00, 0x06, 0x00, 0x01, 0x00]);
    put_sids(&mut buf, local_sid, remote_sid);
    buf
}

/// Returns `true` if `data` looks like a pkt6 ready reply.
pub fn is_pkt6(data: &[u8]) -> bool {
    data.len() >= 16 && data[0..6] == [0x10, 0x00, 0x00, 0x00, 0x06, 0x00]
}

/// Builds a pkt5 disconnect packet.
pub fn build_pkt5(local_sid: u32, remote_sid: u32) -> BytesMut {
    let mut buf = BytesMut::with_capacity(16);
    buf.put_slice(&[0x10, 0x00, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00]);
    put_sids(&mut buf, local_sid, remote_sid);
    buf
}

/// Returns `true` if `data` looks like a pkt5 disconnect.
pub fn is_pkt5(data: &[u8]) -> bool {
    data.len() >= 16 && data[0..6] == [0x10, 0x00, 0x00, 0x00, 0x05, 0x00]
}

/// Returns `true` if `data` is a 21-byte pkt7 (keepalive/ping) packet.
///
/// Byte 0 varies (`0x15` on send, `0x00` on a radio-originated request), so
/// only bytes 1..6 are checked.
pub fn is_pkt7(data: &[u8]) -> bool {
    data.len() == 21 && data[1..6] == [0x00, 0x00, 0x00, 0x07, 0x00]
}

/// `true` if this pkt7 is a request from the peer expecting a reply.
pub fn pkt7_is_request(data: &[u8]) -> bool {
    data[16] == 0x00
}

/// 16-bit sequence number carried in bytes 6..8.
pub fn seq_of(data: &[u8]) -> u16 {
    u16::from_le_bytes([data[6], data[7]])
}

/// Builds a pkt7 ping or reply. `reply_token` is `None` to originate a new
/// ping (a fresh token is generated by the caller via [`gen_reply_token`]),
/// `Some` to answer a peer ping by echoing its token.
pub fn build_pkt7(
    local_sid: u32,
    remote_sid: u32,
    seq: u16,
    reply_token: Option<[u8; 4]>,
    fresh_token: Option<[u8; 4]>,
) -> BytesMut {
    let mut buf = BytesMut::with_capacity(21);
    buf.put_slice(&[0x15, 0x00, 0x00, 0x00, 0x07, 0x00]);
    buf.put_u16_le(seq);
    put_sids(&mut buf, local_sid, remote_sid);

    match reply_token {
        Some(token) => {
            buf.put_u8(0x01);
            buf.put_slice(&token);
        }
        None => {
            buf.put_u8(0x00);
            buf.put_slice(&fresh_token.expect("fresh_token required when replying is false"));
        }
    }

    buf
}

/// Builds the 4-byte reply token for an originated ping: byte0 random,
/// bytes1-2 little-endian `inner_send_seq`, byte3 fixed at `0x06`.
pub fn build_reply_token(random_byte: u8, inner_send_seq: u16) -> [u8; 4] {
    let seq = inner_send_seq.to_le_bytes();
    [random_byte, seq[0], seq[1], 0x06]
}

/// Builds a pkt0 tracked idle packet.
pub fn build_pkt0_idle(local_sid: u32, remote_sid: u32, seq: u16) -> BytesMut {
    let mut buf = BytesMut::with_capacity(16);
    buf.put_slice(&[0x10, 0x00, 0x00, 0x00, 0x00, 0x00]);
    buf.put_u16_le(seq);
    put_sids(&mut buf, local_sid, remote_sid);
    buf
}

/// Returns `true` if `data` is a pkt0 idle packet.
pub fn is_pkt0_idle(data: &[u8]) -> bool {
    data.len() >= 16 && data[0..6] == [0x10, 0x00, 0x00, 0x00, 0x00, 0x00]
}

/// Returns `true` if `data` is a pkt0 single-sequence retransmit request.
pub fn is_pkt0_retx_one(data: &[u8]) -> bool {
    data.len() >= 16 && data[0..6] == [0x10, 0x00, 0x00, 0x00, 0x01, 0x00]
}

/// Returns `true` if `data` is a pkt0 ranged retransmit request.
pub fn is_pkt0_retx_range(data: &[u8]) -> bool {
    data.len() >= 18 && data[0] == 0x18 && data[1..6] == [0x00, 0x00, 0x00, 0x01, 0x00]
}

/// Builds a single-sequence retransmit request.
pub fn build_pkt0_retx_one(local_sid: u32, remote_sid: u32, seq: u16) -> BytesMut {
    let mut buf = BytesMut::with_capacity(16);
    buf.put_slice(&[0x10, 0x00, 0x00, 0x00, 0x01, 0x00]);
    buf.put_u16_le(seq);
    put_sids(&mut buf, local_sid, remote_sid);
    buf
}

/// Builds a ranged retransmit request for one or more `[start, end]` pairs.
pub fn build_pkt0_retx_range(local_sid: u32, remote_sid: u32, ranges: &[(u16, u16)]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(16 + ranges.len() * 4);
    buf.put_u8(0x18);
    buf.put_slice(&[0x00, 0x00, 0x00, 0x01, 0x00]);
    buf.put_u16_le(0);
    put_sids(&mut buf, local_sid, remote_sid);
    for (start, end) in ranges {
        buf.put_u16_le(*start);
        buf.put_u16_le(*end);
    }
    buf
}

/// Parses the `[start, end]` ranges out of a ranged retransmit request.
pub fn parse_pkt0_retx_ranges(data: &[u8]) -> Result<Vec<(u16, u16)>, Error> {
    if !is_pkt0_retx_range(data) {
        return Err(Error::Desync("not a pkt0 retransmit range request"));
    }

    let mut body = &data[16..];
    let mut ranges = Vec::with_capacity(body.len() / 4);
    while body.remaining() >= 4 {
        let start = body.get_u16_le();
        let end = body.get_u16_le();
        ranges.push((start, end));
    }
    Ok(ranges)
}

/// Parses the single sequence number out of a `retx-one` request.
pub fn parse_pkt0_retx_one_seq(data: &[u8]) -> Result<u16, Error> {
    if !is_pkt0_retx_one(data) {
        return Err(Error::Desync("not a pkt0 single retransmit request"));
    }
    Ok(seq_of(data))
}
