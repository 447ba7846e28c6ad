//! Control stream's private login/capability vocabulary.
//!
//! The radio's exact login handshake bytes are not publicly documented; these
//! are opaque, versioned frames built once by the control stream and never
//! reinterpreted field-by-field by the peer-facing code, only by marker byte.

use bytes::{BufMut, BytesMut};

const HEADER_LEN: usize = 16;
const USERNAME_LEN: usize = 16;
const PASSWORD_LEN: usize = 16;

const LOGIN_MARKER: u8 = 0xd1;
const CAPABILITIES_MARKER: u8 = 0xd2;
const TOKEN_RENEW_MARKER: u8 = 0xd3;
const TOKEN_CONFIRM_MARKER: u8 = 0xd4;

fn put_padded(buf: &mut BytesMut, s: &str, len: usize) {
    let bytes = s.as_bytes();
    let take = bytes.len().min(len);
    buf.put_slice(&bytes[..take]);
    buf.put_bytes(0, len - take);
}

fn frame(marker: u8, local_sid: u32, remote_sid: u32, body_len: usize) -> BytesMut {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + 1 + body_len);
    buf.put_slice(&[0x10, 0x00, 0x00, 0x00, 0x00, 0x00]);
    buf.put_u16_le(0); // seq placeholder, overwritten by Pkt0::send_tracked
    buf.put_u32(local_sid);
    buf.put_u32(remote_sid);
    buf.put_u8(marker);
    buf
}

fn is_frame(data: &[u8], marker: u8) -> bool {
    data.len() > HEADER_LEN && data[HEADER_LEN] == marker
}

/// Builds the login request: username and password each zero-padded to 16
/// bytes, followed by a single CAT address byte.
pub fn build_login_request(local_sid: u32, remote_sid: u32, username: &str, password: &str, cat_address: u8) -> BytesMut {
    let mut buf = frame(LOGIN_MARKER, local_sid, remote_sid, USERNAME_LEN + PASSWORD_LEN + 1);
    put_padded(&mut buf, username, USERNAME_LEN);
    put_padded(&mut buf, password, PASSWORD_LEN);
    buf.put_u8(cat_address);
    buf
}

pub fn is_login_request(data: &[u8]) -> bool {
    is_frame(data, LOGIN_MARKER)
}

/// Builds the capabilities-request frame sent once login is acknowledged.
pub fn build_capabilities_request(local_sid: u32, remote_sid: u32) -> BytesMut {
    frame(CAPABILITIES_MARKER, local_sid, remote_sid, 0)
}

pub fn is_capabilities_request(data: &[u8]) -> bool {
    is_frame(data, CAPABILITIES_MARKER)
}

/// Builds a token-renew frame, sent once on login and then periodically.
pub fn build_token_renew(local_sid: u32, remote_sid: u32) -> BytesMut {
    frame(TOKEN_RENEW_MARKER, local_sid, remote_sid, 0)
}

pub fn is_token_renew(data: &[u8]) -> bool {
    is_frame(data, TOKEN_RENEW_MARKER)
}

/// Builds the token-confirm frame, sent once to close out the login
/// handshake's token exchange after a renew has been acknowledged.
pub fn build_token_confirm(local_sid: u32, remote_sid: u32) -> BytesMut {
    frame(TOKEN_CONFIRM_MARKER, local_sid, remote_sid, 0)
}

pub fn is_token_confirm(data: &[u8]) -> bool {
    is_frame(data, TOKEN_CONFIRM_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_request_carries_padded_credentials_and_cat_address() {
        let pkt = build_login_request(1, 2, "w1aw", "hunter2", 3);
        assert!(is_login_request(&pkt));

        let body = &pkt[HEADER_LEN + 1..];
        assert_eq!(&body[..4], b"w1aw");
        assert!(body[4..USERNAME_LEN].iter().all(|&b| b == 0));
        assert_eq!(&body[USERNAME_LEN..USERNAME_LEN + 7], b"hunter2");
        assert_eq!(body[USERNAME_LEN + PASSWORD_LEN], 3);
    }

    #[test]
    fn frame_markers_are_distinct() {
        let login = build_login_request(1, 2, "a", "b", 0);
        let caps = build_capabilities_request(1, 2);
        let renew = build_token_renew(1, 2);
        let confirm = build_token_confirm(1, 2);

        assert!(is_login_request(&login) && !is_capabilities_request(&login) && !is_token_renew(&login));
        assert!(is_capabilities_request(&caps) && !is_login_request(&caps));
        assert!(is_token_renew(&renew) && !is_capabilities_request(&renew) && !is_token_confirm(&renew));
        assert!(is_token_confirm(&confirm) && !is_token_renew(&confirm));
    }
}
