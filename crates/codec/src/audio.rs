//! Audio stream framing: fixed two-packet fragmentation of 20ms PCM frames.

use bytes::{BufMut, BytesMut};

use crate::Error;

/// Bytes in one 20ms frame of 48kHz 16-bit mono PCM.
pub const PCM_FRAME_LEN: usize = 1920;

/// Payload length of an audio "part A" packet.
pub const PART_A_LEN: usize = 1364;

/// Payload length of an audio "part B" packet.
pub const PART_B_LEN: usize = 556;

const HEADER_LEN: usize = 24;
const PART_A_PREFIX: [u8; 6] = [0x6c, 0x05, 0x00, 0x00, 0x00, 0x00];
const PART_B_PREFIX: [u8; 6] = [0x44, 0x02, 0x00, 0x00, 0x00, 0x00];

fn build_part(
    prefix: [u8; 6],
    local_sid: u32,
    remote_sid: u32,
    pkt0_seq: u16,
    audio_send_seq: u16,
    payload: &[u8],
) -> BytesMut {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_slice(&prefix);
    buf.put_u16_le(pkt0_seq);
    buf.put_u32(local_sid);
    buf.put_u32(remote_sid);
    buf.put_u16(0);
    buf.put_u16_le(audio_send_seq.wrapping_sub(1));
    buf.put_u16(0);
    buf.put_u16(payload.len() as u16);
    buf.put_slice(payload);
    buf
}

/// Splits a 1920-byte PCM frame into its wire-ready part A and part B packets.
///
/// `pkt0_seq` is the pair of consecutive tracked sequence numbers the two
/// parts will occupy; `audio_send_seq` is the pair of consecutive
/// stream-private audio sequence numbers.
pub fn build_uplink_frame(
    local_sid: u32,
    remote_sid: u32,
    pkt0_seq: (u16, u16),
    audio_send_seq: (u16, u16),
    pcm: &[u8; PCM_FRAME_LEN],
) -> (BytesMut, BytesMut) {
    let part_a = build_part(
        PART_A_PREFIX,
        local_sid,
        remote_sid,
        pkt0_seq.0,
        audio_send_seq.0,
        &pcm[..PART_A_LEN],
    );
    let part_b = build_part(
        PART_B_PREFIX,
        local_sid,
        remote_sid,
        pkt0_seq.1,
        audio_send_seq.1,
        &pcm[PART_A_LEN..],
    );
    (part_a, part_b)
}

/// `true` if the uplink/downlink frame is all-zero (silence), in which case
/// it is not transmitted.
pub fn is_silence(pcm: &[u8; PCM_FRAME_LEN]) -> bool {
    pcm.iter().all(|&b| b == 0)
}

/// Audio packet kind, by wire prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioPart {
    A,
    B,
}

/// Classifies an inbound datagram as part A, part B, or not audio at all.
pub fn classify(data: &[u8]) -> Option<AudioPart> {
    if data.len() >= HEADER_LEN + PART_A_LEN && data[0..6] == PART_A_PREFIX {
        Some(AudioPart::A)
    } else if data.len() >= HEADER_LEN + PART_B_LEN && data[0..6] == PART_B_PREFIX {
        Some(AudioPart::B)
    } else {
        None
    }
}

/// Strips the 24-byte header, returning the tracked sequence number and PCM payload.
pub fn parse(data: &[u8]) -> Result<(u16, &[u8]), Error> {
    if classify(data).is_none() {
        return Err(Error::Desync("not an audio packet"));
    }
    let seq = u16::from_le_bytes([data[6], data[7]]);
    Ok((seq, &data[HEADER_LEN..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_is_not_sent() {
        let pcm = [0u8; PCM_FRAME_LEN];
        assert!(is_silence(&pcm));
    }

    #[test]
    fn uplink_fragmentation_lengths_and_prefixes() {
        let mut pcm = [0u8; PCM_FRAME_LEN];
        pcm[0] = 1;
        assert!(!is_silence(&pcm));

        let (a, b) = build_uplink_frame(1, 2, (10, 11), (100, 101), &pcm);
        assert_eq!(a.len(), HEADER_LEN + PART_A_LEN);
        assert_eq!(b.len(), HEADER_LEN + PART_B_LEN);
        assert_eq!(classify(&a), Some(AudioPart::A));
        assert_eq!(classify(&b), Some(AudioPart::B));

        let (seq_a, payload_a) = parse(&a).unwrap();
        assert_eq!(seq_a, 10);
        assert_eq!(payload_a.len(), PART_A_LEN);

        let (seq_b, payload_b) = parse(&b).unwrap();
        assert_eq!(seq_b, 11);
        assert_eq!(payload_b.len(), PART_B_LEN);
    }
}
