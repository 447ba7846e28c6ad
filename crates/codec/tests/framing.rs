use anyhow::Result;
use catlink_codec::{audio, packet, seq, serial};

#[test]
fn test_cyclic_comparator() -> Result<()> {
    use std::cmp::Ordering;

    assert_eq!(seq::compare(2, 1, seq::MAX_SEQ_NUM, 0), Ordering::Greater);
    assert_eq!(seq::compare(0, 1, seq::MAX_SEQ_NUM, 0), Ordering::Less);
    assert_eq!(seq::compare(39, 1, 40, 0), Ordering::Less);

    Ok(())
}

#[test]
fn test_handshake_wire() -> Result<()> {
    let local_sid = packet::local_sid([10, 0, 0, 5], 50001);
    let pkt3 = packet::build_pkt3(local_sid);

    assert_eq!(pkt3[0..6], [0x10, 0x00, 0x00, 0x00, 0x03, 0x00]);
    assert_eq!(
        u32::from_be_bytes(pkt3[8..12].try_into()?),
        local_sid,
        "bytes 8..12 must reconstruct (ipv4_be_u32 << 16) | local_port"
    );

    let mut pkt4 = vec![0x10, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00];
    pkt4.extend_from_slice(&0x0A00C351u32.to_be_bytes());
    pkt4.extend_from_slice(&[0, 0, 0, 0]);
    assert!(packet::is_pkt4(&pkt4));
    assert_eq!(packet::parse_pkt4_remote_sid(&pkt4)?, 0x0A00C351);

    let pkt6 = packet::build_pkt6(local_sid, 0x0A00C351);
    assert!(packet::is_pkt6(&pkt6));

    Ok(())
}

#[test]
fn test_pkt7_keepalive_framing() -> Result<()> {
    let token = packet::build_reply_token(0x78, 0x8304);
    assert_eq!(token, [0x78, 0x04, 0x83, 0x06]);

    let ping = packet::build_pkt7(1, 2, 9, None, Some(token));
    assert!(packet::is_pkt7(&ping));
    assert!(!packet::pkt7_is_request(&ping));
    assert_eq!(packet::seq_of(&ping), 9);

    let mut request = vec![0x00, 0x00, 0x00, 0x00, 0x07, 0x00, 0x1c, 0x0e];
    request.extend_from_slice(&2u32.to_be_bytes());
    request.extend_from_slice(&1u32.to_be_bytes());
    request.extend_from_slice(&[0x00, 0x57, 0x2b, 0x12, 0x00]);
    assert!(packet::is_pkt7(&request));
    assert!(packet::pkt7_is_request(&request));

    let reply = packet::build_pkt7(1, 2, packet::seq_of(&request), Some([0x57, 0x2b, 0x12, 0x00]), None);
    assert!(!packet::pkt7_is_request(&reply));
    assert_eq!(&reply[17..21], &[0x57, 0x2b, 0x12, 0x00]);

    Ok(())
}

#[test]
fn test_pkt0_retransmit_requests() -> Result<()> {
    let one = packet::build_pkt0_retx_one(1, 2, 5);
    assert!(packet::is_pkt0_retx_one(&one));
    assert_eq!(packet::parse_pkt0_retx_one_seq(&one)?, 5);

    let range = packet::build_pkt0_retx_range(1, 2, &[(3, 7)]);
    assert!(packet::is_pkt0_retx_range(&range));
    assert_eq!(packet::parse_pkt0_retx_ranges(&range)?, vec![(3, 7)]);

    let multi = packet::build_pkt0_retx_range(1, 2, &[(3, 7), (20, 22)]);
    assert_eq!(packet::parse_pkt0_retx_ranges(&multi)?, vec![(3, 7), (20, 22)]);

    Ok(())
}

#[test]
fn test_serial_data_and_control_framing() -> Result<()> {
    let cat_frame = [0xFE, 0xFE, 0x94, 0xE0, 0x03, 0xFD];
    let data = serial::build_serial_data(1, 2, 7, &cat_frame);
    assert!(serial::is_serial_data(&data));

    let (inner_seq, body) = serial::parse_serial_data(&data)?;
    assert_eq!(inner_seq, 7);
    assert_eq!(body, &cat_frame[..]);

    let open = serial::build_serial_open(1, 2);
    assert!(serial::is_serial_control(&open));
    assert!(serial::serial_control_is_open(&open));

    let close = serial::build_serial_close(1, 2);
    assert!(serial::is_serial_control(&close));
    assert!(!serial::serial_control_is_open(&close));

    Ok(())
}

#[test]
fn test_audio_uplink_fragmentation() -> Result<()> {
    let mut pcm = [0u8; audio::PCM_FRAME_LEN];
    assert!(audio::is_silence(&pcm));

    for (i, b) in pcm.iter_mut().enumerate() {
        *b = (i % 251) as u8;
    }
    assert!(!audio::is_silence(&pcm));

    let (part_a, part_b) = audio::build_uplink_frame(1, 2, (40, 41), (900, 901), &pcm);

    assert_eq!(part_a.len(), 24 + audio::PART_A_LEN);
    assert_eq!(part_b.len(), 24 + audio::PART_B_LEN);
    assert_eq!(part_a[0..6], [0x6c, 0x05, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(part_b[0..6], [0x44, 0x02, 0x00, 0x00, 0x00, 0x00]);

    assert_eq!(audio::classify(&part_a), Some(audio::AudioPart::A));
    assert_eq!(audio::classify(&part_b), Some(audio::AudioPart::B));

    let (seq_a, payload_a) = audio::parse(&part_a)?;
    let (seq_b, payload_b) = audio::parse(&part_b)?;
    assert_eq!(seq_a, 40);
    assert_eq!(seq_b, 41);
    assert_eq!([payload_a, payload_b].concat(), pcm.to_vec());

    Ok(())
}
