use super::*;

const LOCAL_UFRAG: &str = "Luf1234567";
const LOCAL_PWD: &str = "Lpw0123456789abcdef0123456789abc";

fn transaction_id() -> TransactionId {
    TransactionId(*b"0123456789ab")
}

fn new_binding_request() -> StunMessage {
    let mut msg = StunMessage::new(
        MessageClass::Request,
        MessageMethod::Binding,
        transaction_id(),
    );
    msg.set_username(&format!("{LOCAL_UFRAG}:Ruf7654321"));
    msg.set_priority(0x7E7F_1EFF);
    msg.set_ice_controlling(0x1122_3344_5566_7788);
    msg.set_use_candidate();
    msg.authenticate(LOCAL_PWD);
    msg.serialize().unwrap();
    msg
}

#[test]
fn test_request_round_trip_preserves_attributes() {
    let request = new_binding_request();
    let parsed = StunMessage::parse(request.raw()).unwrap();

    assert_eq!(parsed.class(), MessageClass::Request);
    assert_eq!(parsed.method(), MessageMethod::Binding);
    assert_eq!(parsed.transaction_id(), transaction_id());
    assert_eq!(parsed.username(), format!("{LOCAL_UFRAG}:Ruf7654321"));
    assert_eq!(parsed.priority(), 0x7E7F_1EFF);
    assert_eq!(parsed.ice_controlling(), 0x1122_3344_5566_7788);
    assert!(parsed.has_use_candidate());
    assert!(parsed.has_message_integrity());
    assert!(parsed.has_fingerprint());
    assert!(parsed.validate().is_ok());
}

#[test]
fn test_authentication() {
    let request = new_binding_request();

    let mut parsed = StunMessage::parse(request.raw()).unwrap();
    assert_eq!(
        parsed.check_authentication(LOCAL_UFRAG, LOCAL_PWD),
        MessageAuth::Ok
    );

    // The length-field rewrite during the HMAC must be restored.
    assert_eq!(
        parsed.check_authentication(LOCAL_UFRAG, LOCAL_PWD),
        MessageAuth::Ok
    );

    // Wrong password.
    assert_eq!(
        parsed.check_authentication(LOCAL_UFRAG, "not the password"),
        MessageAuth::Unauthorized
    );

    // USERNAME not prefixed by our ufrag plus ":".
    assert_eq!(
        parsed.check_authentication("OtherUfrag", LOCAL_PWD),
        MessageAuth::Unauthorized
    );
}

#[test]
fn test_authentication_requires_username_and_integrity() {
    let mut msg = StunMessage::new(
        MessageClass::Request,
        MessageMethod::Binding,
        transaction_id(),
    );
    msg.serialize().unwrap();

    let mut parsed = StunMessage::parse(msg.raw()).unwrap();
    assert_eq!(
        parsed.check_authentication(LOCAL_UFRAG, LOCAL_PWD),
        MessageAuth::BadRequest
    );
}

#[test]
fn test_success_response_xor_mapped_address_v4() {
    let request = new_binding_request();
    let mut response = request.create_success_response().unwrap();
    response.set_xor_mapped_address("1.2.3.4:5060".parse().unwrap());
    response.authenticate(LOCAL_PWD);
    response.serialize().unwrap();

    // XOR-MAPPED-ADDRESS sits first in a success response.
    let raw = response.raw();
    let attr = &raw[HEADER_LEN..HEADER_LEN + 12];
    assert_eq!(&attr[..2], &ATTR_XOR_MAPPED_ADDRESS.to_be_bytes());
    assert_eq!(&attr[2..4], &8u16.to_be_bytes());
    assert_eq!(attr[4], 0x00);
    assert_eq!(attr[5], 0x01);
    // Port 5060 = 0x13C4, XORed with the first two cookie bytes.
    assert_eq!(&attr[6..8], &[0x13 ^ 0x21, 0xC4 ^ 0x12]);
    // Address 1.2.3.4 XORed with the full cookie.
    assert_eq!(&attr[8..12], &[0x20, 0x10, 0xA7, 0x46]);

    // And decodes back to the original address.
    let parsed = StunMessage::parse(raw).unwrap();
    assert_eq!(
        parsed.xor_mapped_address(),
        Some("1.2.3.4:5060".parse().unwrap())
    );
}

#[test]
fn test_success_response_xor_mapped_address_v6() {
    let request = new_binding_request();
    let mut response = request.create_success_response().unwrap();
    response.set_xor_mapped_address("[2001:db8::5]:443".parse().unwrap());
    response.authenticate(LOCAL_PWD);
    response.serialize().unwrap();

    let parsed = StunMessage::parse(response.raw()).unwrap();
    assert_eq!(
        parsed.xor_mapped_address(),
        Some("[2001:db8::5]:443".parse().unwrap())
    );
}

#[test]
fn test_error_response_carries_code() {
    let request = new_binding_request();
    let mut response = request.create_error_response(487).unwrap();
    response.serialize().unwrap();

    let parsed = StunMessage::parse(response.raw()).unwrap();
    assert_eq!(parsed.class(), MessageClass::ErrorResponse);
    assert_eq!(parsed.error_code(), 487);
    assert_eq!(parsed.transaction_id(), transaction_id());
}

#[test]
fn test_responses_only_for_requests() {
    let mut msg = StunMessage::new(
        MessageClass::Indication,
        MessageMethod::Binding,
        transaction_id(),
    );
    msg.serialize().unwrap();
    let parsed = StunMessage::parse(msg.raw()).unwrap();

    assert!(parsed.create_success_response().is_err());
    assert!(parsed.create_error_response(400).is_err());
}

#[test]
fn test_unknown_method_is_kept() {
    let mut msg = StunMessage::new(
        MessageClass::Request,
        MessageMethod::Unknown(0x003),
        transaction_id(),
    );
    msg.serialize().unwrap();

    let parsed = StunMessage::parse(msg.raw()).unwrap();
    assert_eq!(parsed.method(), MessageMethod::Unknown(0x003));
}

#[test]
fn test_tampered_fingerprint_is_rejected() {
    let request = new_binding_request();
    let mut raw = request.raw().to_vec();
    let len = raw.len();
    raw[len - 1] ^= 0xFF;

    assert_eq!(
        StunMessage::parse(&raw),
        Err(Error::ErrStunFingerprintMismatch)
    );
}

#[test]
fn test_tampered_length_is_rejected() {
    let request = new_binding_request();
    let mut raw = request.raw().to_vec();
    raw[3] = raw[3].wrapping_add(4);

    assert_eq!(StunMessage::parse(&raw), Err(Error::ErrStunLengthMismatch));
}

#[test]
fn test_attribute_after_fingerprint_is_rejected() {
    let request = new_binding_request();
    let mut raw = request.raw().to_vec();
    // Append one more (empty) attribute after FINGERPRINT and fix the header
    // length so only the attribute-order rule can fire.
    raw.extend_from_slice(&[0x80, 0x2B, 0x00, 0x00]);
    let length = (raw.len() - HEADER_LEN) as u16;
    raw[2..4].copy_from_slice(&length.to_be_bytes());

    assert_eq!(
        StunMessage::parse(&raw),
        Err(Error::ErrStunAttributeAfterFingerprint)
    );
}

#[test]
fn test_attribute_length_exceeding_message_is_rejected() {
    let mut raw = vec![0u8; 28];
    raw[0] = 0x00;
    raw[1] = 0x01;
    raw[2..4].copy_from_slice(&8u16.to_be_bytes());
    raw[4..8].copy_from_slice(&MAGIC_COOKIE);
    raw[8..20].copy_from_slice(b"0123456789ab");
    // Attribute claims 5 value bytes where only 4 remain.
    raw[20..22].copy_from_slice(&ATTR_USE_CANDIDATE.to_be_bytes());
    raw[22..24].copy_from_slice(&5u16.to_be_bytes());

    assert_eq!(
        StunMessage::parse(&raw),
        Err(Error::ErrStunBadAttributeLength)
    );
}

#[test]
fn test_is_stun() {
    let request = new_binding_request();
    assert!(StunMessage::is_stun(request.raw()));
    assert!(!StunMessage::is_stun(&request.raw()[..19]));

    let mut raw = request.raw().to_vec();
    raw[4] = 0x00;
    assert!(!StunMessage::is_stun(&raw));
}
