//! Byte-exact wire layouts.
//!
//! Snapshots pin the encoding the mediator expects. A change here is a
//! protocol break.

use bytes::Bytes;
use mdsync_proto::{
    Frame, InboundFrame, MessageType, Payload, ProtocolError, ReflectId,
    add_proxy_common_header, extract_chat_message_and_length, is_mediator_frame,
    payloads::{
        devices::DropDevice,
        reflect::{Reflect, ReflectAck, Reflected, ReflectedAck},
    },
};

fn encode(payload: Payload) -> String {
    hex::encode(payload.into_frame().unwrap().to_vec().unwrap())
}

#[test]
fn reflect_bytes() {
    let reflect = Payload::Reflect(Reflect {
        reflect_id: ReflectId([1, 2, 3, 4]),
        envelope: Bytes::from_static(b"abc"),
    });
    insta::assert_snapshot!(encode(reflect), @"800000000800000001020304616263");
}

#[test]
fn reflected_ack_bytes() {
    let ack = Payload::ReflectedAck(ReflectedAck { reflect_id: ReflectId([0xaa, 0xbb, 0xcc, 0xdd]) });
    insta::assert_snapshot!(encode(ack), @"8300000008000000aabbccdd");
}

#[test]
fn reflected_bytes() {
    let reflected = Payload::Reflected(Reflected {
        reflect_id: ReflectId([1, 2, 3, 4]),
        flags: 0,
        timestamp_ms: 1_700_000_000_000,
        envelope: Bytes::from_static(b"xy"),
    });
    insta::assert_snapshot!(encode(reflected), @"8200000010000000010203040068e5cf8b0100007879");
}

#[test]
fn empty_body_bytes() {
    insta::assert_snapshot!(encode(Payload::CommitTransaction), @"42000000");
    insta::assert_snapshot!(encode(Payload::ReflectionQueueDry), @"20000000");
}

#[test]
fn cbor_control_bytes() {
    let drop = Payload::DropDevice(DropDevice { device_id: 5 });
    insta::assert_snapshot!(encode(drop), @"32000000a1696465766963655f696405");
}

#[test]
fn proxy_header_bytes() {
    insta::assert_snapshot!(hex::encode(add_proxy_common_header(&[1, 2])), @"000000000102");
}

#[test]
fn reserved_byte_makes_chat_frame() {
    let bytes = [0x10, 0, 0, 1];
    assert!(!is_mediator_frame(&bytes));
    assert_eq!(
        InboundFrame::classify(Bytes::copy_from_slice(&bytes)).unwrap(),
        InboundFrame::Chat(Bytes::copy_from_slice(&bytes))
    );
}

#[test]
fn reflect_ack_from_mediator_with_trailing_timestamp() {
    // Mediators may append a timestamp after the reflect id
    let mut bytes = vec![0x81, 0, 0, 0, 8, 0, 0, 0, 5, 6, 7, 8];
    bytes.extend_from_slice(&42u64.to_le_bytes());

    let frame = Frame::decode(&bytes).unwrap();
    assert_eq!(
        Payload::from_frame(&frame).unwrap(),
        Payload::ReflectAck(ReflectAck { reflect_id: ReflectId([5, 6, 7, 8]) })
    );
}

#[test]
fn reflected_with_foreign_header_length_is_rejected() {
    let mut bytes = vec![0x82, 0, 0, 0, 24, 0, 0, 0];
    bytes.extend_from_slice(&[0; 20]);
    let frame = Frame::decode(&bytes).unwrap();

    assert_eq!(
        Payload::from_frame(&frame),
        Err(ProtocolError::HeaderLengthMismatch { expected: 16, actual: 24 })
    );
}

#[test]
fn unknown_type_byte() {
    let frame = Frame::decode(&[0x99, 0, 0, 0]).unwrap();
    assert_eq!(frame.message_type(), None);
    assert_eq!(Payload::from_frame(&frame), Err(ProtocolError::UnknownMessageType(0x99)));
}

#[test]
fn proxy_type_never_decodes() {
    assert_eq!(
        Payload::decode(MessageType::Proxy, &Bytes::new()),
        Err(ProtocolError::NotMediatorFrame)
    );
}

#[test]
fn chat_length_prefix() {
    let mut frame = add_proxy_common_header(&[4, 0]);
    frame.extend_from_slice(b"ping");
    assert_eq!(extract_chat_message_and_length(&frame).unwrap(), b"ping");
}
