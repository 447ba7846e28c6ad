//! Serial (CAT) stream framing: data frames and open/close control frames.

use bytes::{BufMut, BytesMut};

use crate::Error;

const SERIAL_HEADER_LEN: usize = 21;

/// Builds a serial data frame carrying `cat_bytes` (a complete CAT frame).
pub fn build_serial_data(local_sid: u32, remote_sid: u32, inner_seq: u16, cat_bytes: &[u8]) -> BytesMut {
    let payload_len = cat_bytes.len() as u8;
    let mut buf = BytesMut::with_capacity(SERIAL_HEADER_LEN + cat_bytes.len());

    buf.put_u8(0x15 + payload_len);
    buf.put_slice(&[0x00, 0x00, 0x00]);
    buf.put_u16_le(0); // sub-type
    buf.put_u16_le(0); // seq placeholder, overwritten by Pkt0::send_tracked
    buf.put_u32(local_sid);
    buf.put_u32(remote_sid);
    buf.put_u8(0xc1);
    buf.put_u8(payload_len);
    buf.put_u8(0x00);
    buf.put_u16_le(inner_seq);
    buf.put_slice(cat_bytes);

    buf
}

/// Returns `true` if `data` is a serial data frame.
pub fn is_serial_data(data: &[u8]) -> bool {
    data.len() >= SERIAL_HEADER_LEN && data[16] == 0xc1
}

/// Extracts the CAT payload and inner sequence number from a serial data frame.
pub fn parse_serial_data(data: &[u8]) -> Result<(u16, &[u8]), Error> {
    if !is_serial_data(data) {
        return Err(Error::Desync("not a serial data frame"));
    }

    let payload_len = data[17] as usize;
    let inner_seq = u16::from_le_bytes([data[19], data[20]]);
    let body = &data[SERIAL_HEADER_LEN..];
    if body.len() < payload_len {
        return Err(Error::Desync("serial data frame truncated"));
    }

    Ok((inner_seq, &body[..payload_len]))
}

/// Builds a serial-port open frame.
pub fn build_serial_open(local_sid: u32, remote_sid: u32) -> BytesMut {
    build_serial_control(local_sid, remote_sid, 0x05)
}

/// Builds a serial-port close frame.
pub fn build_serial_close(local_sid: u32, remote_sid: u32) -> BytesMut {
    build_serial_control(local_sid, remote_sid, 0x00)
}

fn build_serial_control(local_sid: u32, remote_sid: u32, magic: u8) -> BytesMut {
    let mut buf = BytesMut::with_capacity(SERIAL_HEADER_LEN + 1);
    buf.put_u8(0x16);
    buf.put_slice(&[0x00, 0x00, 0x00]);
    buf.put_u16_le(0); // sub-type
    buf.put_u16_le(0); // seq placeholder, overwritten by Pkt0::send_tracked
    buf.put_u32(local_sid);
    buf.put_u32(remote_sid);
    buf.put_u8(0xc0);
    buf.put_slice(&[0x00, 0x00, 0x00, 0x00]);
    buf.put_u8(magic);
    buf
}

/// Returns `true` if `data` is a serial open/close control frame.
pub fn is_serial_control(data: &[u8]) -> bool {
    data.len() >= SERIAL_HEADER_LEN + 1 && data[16] == 0xc0
}

/// `true` if a serial control frame is an open (as opposed to close).
pub fn serial_control_is_open(data: &[u8]) -> bool {
    data[SERIAL_HEADER_LEN] == 0x05
}
