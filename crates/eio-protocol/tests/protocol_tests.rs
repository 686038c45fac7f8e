//! Protocol layer tests — packet codec, polling payloads, handshake body, error codes.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use eio_protocol::*;
    use serde_json::json;

    // ─────────────────────────────────────────────────────────────────────
    // Single packet codec
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn decode_text_message() {
        let packet = decode_packet(MessageKind::Text, Bytes::from_static(b"4hello")).unwrap();
        assert_eq!(packet.kind, MessageKind::Text);
        assert_eq!(packet.packet_type, PacketType::Message);
        assert_eq!(&packet.data[..], b"hello");
    }

    #[test]
    fn decode_every_text_header() {
        for packet_type in PacketType::ALL {
            let frame = Bytes::from(vec![packet_type.text_byte()]);
            let packet = decode_packet(MessageKind::Text, frame).unwrap();
            assert_eq!(packet.packet_type, packet_type);
            assert!(packet.data.is_empty());
        }
    }

    #[test]
    fn decode_binary_message() {
        let frame = Bytes::from_static(&[4, 0xde, 0xad, 0xbe, 0xef]);
        let packet = decode_packet(MessageKind::Binary, frame).unwrap();
        assert_eq!(packet.kind, MessageKind::Binary);
        assert_eq!(packet.packet_type, PacketType::Message);
        assert_eq!(&packet.data[..], &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn binary_frame_with_digit_header_is_text() {
        let packet = decode_packet(MessageKind::Binary, Bytes::from_static(b"2probe")).unwrap();
        assert_eq!(packet.kind, MessageKind::Text);
        assert_eq!(packet.packet_type, PacketType::Ping);
        assert_eq!(&packet.data[..], b"probe");
    }

    #[test]
    fn decode_base64_in_text_frame() {
        // "AQID" is base64 for [1, 2, 3]
        let packet = decode_packet(MessageKind::Text, Bytes::from_static(b"b4AQID")).unwrap();
        assert_eq!(packet.kind, MessageKind::Binary);
        assert_eq!(packet.packet_type, PacketType::Message);
        assert_eq!(&packet.data[..], &[1, 2, 3]);
    }

    #[test]
    fn decode_rejects_unknown_type() {
        let err = decode_packet(MessageKind::Text, Bytes::from_static(b"9x")).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidPacketType(b'9')));

        let err = decode_packet(MessageKind::Binary, Bytes::from_static(&[7])).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidPacketType(7)));
    }

    #[test]
    fn decode_rejects_bad_base64() {
        let err = decode_packet(MessageKind::Text, Bytes::from_static(b"b4!!!")).unwrap_err();
        assert!(matches!(err, DecodeError::Base64(_)));
    }

    #[test]
    fn encode_text_and_binary_frames() {
        let text = Packet::message(MessageKind::Text, "hi");
        assert_eq!(&encode_packet(&text)[..], b"4hi");

        let binary = Packet::message(MessageKind::Binary, vec![9u8, 8]);
        assert_eq!(&encode_packet(&binary)[..], &[4, 9, 8]);

        let pong = Packet::pong("probe");
        assert_eq!(&encode_packet(&pong)[..], b"3probe");
    }

    #[test]
    fn encoded_frame_decodes_to_same_packet() {
        let original = Packet::message(MessageKind::Binary, vec![0u8, 255, 7]);
        let decoded = decode_packet(MessageKind::Binary, encode_packet(&original)).unwrap();
        assert_eq!(decoded, original);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Polling payloads
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn binary_payload_layout() {
        let mut encoder = PayloadEncoder::new(PayloadFormat::Binary);
        encoder.push(&Packet::message(MessageKind::Text, "hello"));
        encoder.push(&Packet::message(MessageKind::Binary, vec![1u8, 2]));
        assert_eq!(encoder.len(), 2);

        let body = encoder.take();
        let expected: Vec<u8> = [
            &[0x00, 6, 0xff, b'4'][..],
            &b"hello"[..],
            &[0x01, 3, 0xff, 4, 1, 2][..],
        ]
        .concat();
        assert_eq!(&body[..], &expected[..]);
    }

    #[test]
    fn binary_payload_multi_digit_length() {
        let data = vec![b'x'; 120];
        let mut encoder = PayloadEncoder::new(PayloadFormat::Binary);
        encoder.push(&Packet::message(MessageKind::Text, data.clone()));
        let body = encoder.take();
        assert_eq!(&body[..5], &[0x00, 1, 2, 1, 0xff]);

        let packets = decode_payload(body).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(&packets[0].data[..], &data[..]);
    }

    #[test]
    fn text_payload_layout() {
        let mut encoder = PayloadEncoder::new(PayloadFormat::Text);
        encoder.push(&Packet::message(MessageKind::Text, "hello"));
        encoder.push(&Packet::message(MessageKind::Binary, vec![1u8, 2, 3]));
        assert_eq!(&encoder.take()[..], b"6:4hello6:b4AQID");
    }

    #[test]
    fn decode_text_payload() {
        let packets = decode_payload(Bytes::from_static(b"3:4hi1:26:b4AQID")).unwrap();
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0], Packet::message(MessageKind::Text, "hi"));
        assert_eq!(packets[1], Packet::ping(Bytes::new()));
        assert_eq!(packets[2], Packet::message(MessageKind::Binary, vec![1u8, 2, 3]));
    }

    #[test]
    fn decode_preserves_order_across_formats() {
        let mut binary = PayloadEncoder::new(PayloadFormat::Binary);
        binary.push(&Packet::message(MessageKind::Text, "first"));
        binary.push(&Packet::message(MessageKind::Binary, vec![2u8]));
        let mut body = binary.take().to_vec();
        body.extend_from_slice(b"6:4third");

        let packets = decode_payload(Bytes::from(body)).unwrap();
        let payloads: Vec<&[u8]> = packets.iter().map(|p| &p.data[..]).collect();
        assert_eq!(payloads, vec![&b"first"[..], &[2u8][..], &b"third"[..]]);
    }

    #[test]
    fn empty_payload_has_no_packets() {
        assert!(decode_payload(Bytes::new()).unwrap().is_empty());
    }

    #[test]
    fn truncated_payload_is_eof() {
        let err = decode_payload(Bytes::from_static(b"10:4hi")).unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedEof));

        let err = decode_payload(Bytes::from_static(b"3:4hi5")).unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedEof));
    }

    #[test]
    fn malformed_payload_lengths() {
        let err = decode_payload(Bytes::from_static(&[0x00, 0x0a, 0xff, b'4'])).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidLength));

        let err = decode_payload(Bytes::from_static(b":4hi")).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidFrameMarker(b':')));
    }

    #[test]
    fn decoder_stops_after_error() {
        let mut decoder = PayloadDecoder::new(Bytes::from_static(b"3:4hi\x07junk"));
        assert!(decoder.next().unwrap().is_ok());
        assert!(decoder.next().unwrap().is_err());
        assert!(decoder.next().is_none());
    }

    #[test]
    fn payload_content_types() {
        assert_eq!(PayloadFormat::Binary.content_type(), "application/octet-stream");
        assert_eq!(PayloadFormat::Text.content_type(), "text/plain; charset=UTF-8");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Handshake
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn handshake_wire_format() {
        let params = HandshakeParams::new(
            "abc",
            vec!["websocket".into()],
            Duration::from_secs(25),
            Duration::from_secs(60),
        );
        let packet = params.to_packet().unwrap();
        assert_eq!(packet.packet_type, PacketType::Open);
        assert_eq!(packet.kind, MessageKind::Text);

        let body: serde_json::Value = serde_json::from_slice(&packet.data).unwrap();
        assert_eq!(
            body,
            json!({
                "sid": "abc",
                "upgrades": ["websocket"],
                "pingInterval": 25000,
                "pingTimeout": 60000,
            })
        );
    }

    #[test]
    fn handshake_from_packet() {
        let packet = Packet::new(
            MessageKind::Text,
            PacketType::Open,
            r#"{"sid":"s1","upgrades":[],"pingInterval":100,"pingTimeout":200}"#,
        );
        let params = HandshakeParams::from_packet(&packet).unwrap();
        assert_eq!(params.sid, "s1");
        assert!(params.upgrades.is_empty());
        assert_eq!(params.ping_interval(), Duration::from_millis(100));
        assert_eq!(params.ping_timeout(), Duration::from_millis(200));
    }

    #[test]
    fn handshake_rejects_other_packets() {
        let err = HandshakeParams::from_packet(&Packet::control(PacketType::Noop)).unwrap_err();
        assert!(matches!(err, HandshakeError::NotOpen(PacketType::Noop)));

        let packet = Packet::new(MessageKind::Text, PacketType::Open, "not json");
        let err = HandshakeParams::from_packet(&packet).unwrap_err();
        assert!(matches!(err, HandshakeError::Json(_)));
    }

    // ─────────────────────────────────────────────────────────────────────
    // Error codes
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn error_code_values() {
        assert_eq!(EngineErrorCode::UnknownTransport.code(), 0);
        assert_eq!(EngineErrorCode::UnknownSid.code(), 1);
        assert_eq!(EngineErrorCode::BadHandshakeMethod.code(), 2);
        assert_eq!(EngineErrorCode::BadRequest.code(), 3);
        assert_eq!(EngineErrorCode::Forbidden.code(), 4);
        assert_eq!(EngineErrorCode::UnsupportedProtocolVersion.code(), 5);
        assert_eq!(EngineErrorCode::Custom(42).code(), 42);
    }

    #[test]
    fn error_code_roundtrip() {
        assert_eq!(EngineErrorCode::from_code(0), EngineErrorCode::UnknownTransport);
        assert_eq!(EngineErrorCode::from_code(3), EngineErrorCode::BadRequest);
        assert_eq!(EngineErrorCode::from_code(99), EngineErrorCode::Custom(99));
    }

    #[test]
    fn error_constructors() {
        let e = ProtocolError::unknown_transport();
        assert_eq!(e.code, 0);
        assert_eq!(e.message, "Transport unknown");

        let e = ProtocolError::unknown_sid();
        assert_eq!(e.error_code(), EngineErrorCode::UnknownSid);

        let e = ProtocolError::bad_request("overlapping poll");
        assert_eq!(e.code, 3);
        assert_eq!(e.message, "overlapping poll");
    }

    #[test]
    fn error_serialization() {
        let json = serde_json::to_value(ProtocolError::bad_handshake_method()).unwrap();
        assert_eq!(json, json!({"code": 2, "message": "Bad handshake method"}));
    }

    #[test]
    fn error_display() {
        let s = format!("{}", ProtocolError::unknown_sid());
        assert!(s.contains("[1]"));
        assert!(s.contains("Session ID unknown"));
    }
}
