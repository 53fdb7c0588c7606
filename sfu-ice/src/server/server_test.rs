use super::*;
use shared::UdpSocketId;
use std::net::SocketAddr;
use stun::message::TransactionId;

const LOCAL_UFRAG: &str = "Luf1234567";
const LOCAL_PWD: &str = "Lpw0123456789abcdef0123456789abc";

fn source() -> TransportSource {
    TransportSource::Udp {
        socket: UdpSocketId(1),
        remote: "1.2.3.4:5060".parse().unwrap(),
    }
}

fn server() -> IceServer {
    IceServer::new(LOCAL_UFRAG.to_string(), LOCAL_PWD.to_string())
}

fn binding_request(password: &str) -> StunMessage {
    let mut msg = StunMessage::new(
        MessageClass::Request,
        MessageMethod::Binding,
        TransactionId(*b"fedcba987654"),
    );
    msg.set_username(&format!("{LOCAL_UFRAG}:Ruf7654321"));
    msg.set_priority(0x7E7F_1EFF);
    msg.set_ice_controlling(0x1122_3344_5566_7788);
    msg.set_use_candidate();
    msg.authenticate(password);
    msg.serialize().unwrap();

    // Run the request through the codec as a remote peer's would arrive.
    StunMessage::parse(msg.raw()).unwrap()
}

fn parse_response(server: &mut IceServer) -> (StunMessage, TransportSource) {
    let transmit = server.poll_transmit().expect("a queued response");
    (StunMessage::parse(&transmit.payload).unwrap(), transmit.source)
}

#[test]
fn test_binding_request_success() {
    let mut server = server();
    let mut request = binding_request(LOCAL_PWD);
    server.process_stun_message(&mut request, source()).unwrap();

    // The success response is emitted before the valid pair, through the
    // same source, with the request's transaction id.
    let (response, response_source) = parse_response(&mut server);
    assert_eq!(response.class(), MessageClass::SuccessResponse);
    assert_eq!(response.transaction_id(), request.transaction_id());
    assert_eq!(response_source, source());
    assert_eq!(
        response.xor_mapped_address(),
        Some("1.2.3.4:5060".parse::<SocketAddr>().unwrap())
    );
    assert!(response.has_message_integrity());
    assert!(response.has_fingerprint());

    match server.poll_event() {
        Some(IceServerEvent::ValidPair {
            source: pair_source,
            has_use_candidate,
        }) => {
            assert_eq!(pair_source, source());
            assert!(has_use_candidate);
        }
        other => panic!("expected ValidPair, got {other:?}"),
    }
}

#[test]
fn test_wrong_password_is_unauthorized() {
    let mut server = server();
    let mut request = binding_request("bad password but right length!!!");
    server.process_stun_message(&mut request, source()).unwrap();

    let (response, _) = parse_response(&mut server);
    assert_eq!(response.class(), MessageClass::ErrorResponse);
    assert_eq!(response.error_code(), 401);
    assert!(server.poll_event().is_none());
}

#[test]
fn test_ice_controlled_is_role_conflict() {
    let mut server = server();
    let mut msg = StunMessage::new(
        MessageClass::Request,
        MessageMethod::Binding,
        TransactionId(*b"fedcba987654"),
    );
    msg.set_username(&format!("{LOCAL_UFRAG}:Ruf7654321"));
    msg.set_priority(1);
    msg.set_ice_controlled(0x99);
    msg.authenticate(LOCAL_PWD);
    msg.serialize().unwrap();
    let mut request = StunMessage::parse(msg.raw()).unwrap();

    server.process_stun_message(&mut request, source()).unwrap();

    let (response, _) = parse_response(&mut server);
    assert_eq!(response.error_code(), 487);
    assert!(server.poll_event().is_none());
}

#[test]
fn test_missing_attributes_is_bad_request() {
    let mut server = server();

    // No USERNAME, MESSAGE-INTEGRITY nor PRIORITY.
    let mut msg = StunMessage::new(
        MessageClass::Request,
        MessageMethod::Binding,
        TransactionId(*b"fedcba987654"),
    );
    msg.serialize().unwrap();
    let mut request = StunMessage::parse(msg.raw()).unwrap();

    server.process_stun_message(&mut request, source()).unwrap();

    let (response, _) = parse_response(&mut server);
    assert_eq!(response.error_code(), 400);
    assert!(server.poll_event().is_none());
}

#[test]
fn test_request_without_fingerprint_is_rejected() {
    let mut server = server();
    let request = binding_request(LOCAL_PWD);

    // Strip the trailing FINGERPRINT attribute and fix the header length.
    let mut raw = request.raw()[..request.raw().len() - 8].to_vec();
    let length = (raw.len() - 20) as u16;
    raw[2..4].copy_from_slice(&length.to_be_bytes());
    let mut request = StunMessage::parse(&raw).unwrap();

    server.process_stun_message(&mut request, source()).unwrap();

    let (response, _) = parse_response(&mut server);
    assert_eq!(response.error_code(), 400);
    assert!(server.poll_event().is_none());
}

#[test]
fn test_non_binding_request_is_rejected() {
    let mut server = server();
    let mut msg = StunMessage::new(
        MessageClass::Request,
        MessageMethod::Unknown(0x003),
        TransactionId(*b"fedcba987654"),
    );
    msg.serialize().unwrap();
    let mut request = StunMessage::parse(msg.raw()).unwrap();

    server.process_stun_message(&mut request, source()).unwrap();

    let (response, _) = parse_response(&mut server);
    assert_eq!(response.error_code(), 400);
    assert!(server.poll_event().is_none());
}

#[test]
fn test_non_binding_indication_is_ignored() {
    let mut server = server();
    let mut msg = StunMessage::new(
        MessageClass::Indication,
        MessageMethod::Unknown(0x003),
        TransactionId(*b"fedcba987654"),
    );
    msg.serialize().unwrap();
    let mut indication = StunMessage::parse(msg.raw()).unwrap();

    server
        .process_stun_message(&mut indication, source())
        .unwrap();

    assert!(server.poll_transmit().is_none());
    assert!(server.poll_event().is_none());
}

#[test]
fn test_binding_indication_emits_nothing() {
    let mut server = server();
    let mut msg = StunMessage::new(
        MessageClass::Indication,
        MessageMethod::Binding,
        TransactionId(*b"fedcba987654"),
    );
    msg.serialize().unwrap();
    let mut indication = StunMessage::parse(msg.raw()).unwrap();

    server
        .process_stun_message(&mut indication, source())
        .unwrap();

    assert!(server.poll_transmit().is_none());
    assert!(server.poll_event().is_none());
}
