use super::*;
use rand::RngCore;

fn master_key() -> Vec<u8> {
    let mut key = vec![0u8; SRTP_MASTER_KEY_LENGTH];
    rand::rng().fill_bytes(&mut key);
    key
}

fn session_pair(profile: SrtpProfile) -> (SrtpSession, SrtpSession) {
    let key = master_key();
    let outbound = SrtpSession::new(SessionType::Outbound, profile, &key).unwrap();
    let inbound = SrtpSession::new(SessionType::Inbound, profile, &key).unwrap();
    (outbound, inbound)
}

fn rtp_packet(sequence_number: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 12];
    packet[0] = 0x80; // version 2
    packet[1] = 96; // dynamic payload type
    packet[2..4].copy_from_slice(&sequence_number.to_be_bytes());
    packet[4..8].copy_from_slice(&1000u32.to_be_bytes()); // timestamp
    packet[8..12].copy_from_slice(&0x1234_5678u32.to_be_bytes()); // ssrc
    packet.extend_from_slice(b"some opaque media payload");
    packet
}

fn rtcp_packet() -> Vec<u8> {
    let mut packet = vec![0u8; 8];
    packet[0] = 0x80; // version 2
    packet[1] = 201; // receiver report
    packet[2..4].copy_from_slice(&1u16.to_be_bytes()); // length in words - 1
    packet[4..8].copy_from_slice(&0x1234_5678u32.to_be_bytes()); // sender ssrc
    packet
}

#[test]
fn test_rtp_round_trip() {
    let (mut outbound, mut inbound) = session_pair(SrtpProfile::AesCm128HmacSha1_80);

    let plain = rtp_packet(1);
    let mut data = plain.clone();

    assert!(outbound.encrypt_rtp(&mut data));
    // 80 bit auth tag appended.
    assert_eq!(data.len(), plain.len() + 10);
    // Payload is no longer readable.
    assert_ne!(&data[12..12 + 4], &plain[12..12 + 4]);

    assert!(inbound.decrypt_srtp(&mut data));
    assert_eq!(data, plain);
}

#[test]
fn test_rtp_round_trip_with_32_bit_tag() {
    let (mut outbound, mut inbound) = session_pair(SrtpProfile::AesCm128HmacSha1_32);

    let plain = rtp_packet(7);
    let mut data = plain.clone();

    assert!(outbound.encrypt_rtp(&mut data));
    assert_eq!(data.len(), plain.len() + 4);
    assert!(inbound.decrypt_srtp(&mut data));
    assert_eq!(data, plain);
}

#[test]
fn test_rtcp_round_trip() {
    let (mut outbound, mut inbound) = session_pair(SrtpProfile::AesCm128HmacSha1_80);

    let plain = rtcp_packet();
    let mut data = plain.clone();

    assert!(outbound.encrypt_rtcp(&mut data));
    // SRTCP index and auth tag appended.
    assert!(data.len() > plain.len());

    assert!(inbound.decrypt_srtcp(&mut data));
    assert_eq!(data, plain);
}

#[test]
fn test_tampered_packet_fails_authentication() {
    let (mut outbound, mut inbound) = session_pair(SrtpProfile::AesCm128HmacSha1_80);

    let mut data = rtp_packet(2);
    assert!(outbound.encrypt_rtp(&mut data));
    let tampered_index = data.len() - 1;
    data[tampered_index] ^= 0xFF;

    let mut tampered = data.clone();
    assert!(!inbound.decrypt_srtp(&mut tampered));
    assert_ne!(inbound.last_error_desc(), "no error");
}

#[test]
fn test_replayed_packet_is_rejected() {
    let (mut outbound, mut inbound) = session_pair(SrtpProfile::AesCm128HmacSha1_80);

    let mut data = rtp_packet(3);
    assert!(outbound.encrypt_rtp(&mut data));

    let mut first = data.clone();
    assert!(inbound.decrypt_srtp(&mut first));

    let mut replayed = data.clone();
    assert!(!inbound.decrypt_srtp(&mut replayed));
}

#[test]
fn test_wrong_key_length_is_rejected() {
    let err = SrtpSession::new(
        SessionType::Outbound,
        SrtpProfile::AesCm128HmacSha1_80,
        &[0u8; 16],
    )
    .unwrap_err();
    assert_eq!(err, Error::ErrInvalidSrtpKeyLength);
}

#[test]
fn test_sessions_are_keyed() {
    let (mut outbound, _) = session_pair(SrtpProfile::AesCm128HmacSha1_80);
    let mut other_inbound = SrtpSession::new(
        SessionType::Inbound,
        SrtpProfile::AesCm128HmacSha1_80,
        &master_key(),
    )
    .unwrap();

    let mut data = rtp_packet(4);
    assert!(outbound.encrypt_rtp(&mut data));
    assert!(!other_inbound.decrypt_srtp(&mut data));
}
