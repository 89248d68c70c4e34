//! Packet framing: stream splitting, incomplete input, conditional fields
//! and both framings.

use bravo_engine::world::position::BlockPos;
use bravo_server::protocol::codec::EncodeError;
use bravo_server::protocol::registry::id;
use bravo_server::protocol::{
    self, Clientbound, Decoded, Fields, Framing, ItemStack, PacketCodec, ProtocolError, SERVERBOUND, Serverbound, Value,
};

fn sample_packets() -> Vec<Serverbound> {
    vec![
        Serverbound::KeepAlive,
        Serverbound::Handshake {
            username: "notch".into(),
        },
        Serverbound::Login {
            protocol: 10,
            username: "notch".into(),
        },
        Serverbound::PositionLook {
            x: 8.5,
            y: 65.0,
            stance: 66.62,
            z: -3.25,
            yaw: 90.0,
            pitch: -12.5,
            grounded: true,
        },
        Serverbound::Placement {
            pos: BlockPos::new(1, 64, 2),
            face: 1,
            held: Some(ItemStack {
                id: 4,
                count: 12,
                damage: 0,
            }),
        },
        Serverbound::Placement {
            pos: BlockPos::new(-1, -1, -1),
            face: -1,
            held: None,
        },
        Serverbound::Chat {
            message: "hello, world".into(),
        },
        Serverbound::Digging {
            status: 2,
            pos: BlockPos::new(-20, 3, 7),
            face: 4,
        },
        Serverbound::WindowClick {
            window: 0,
            slot: 36,
            right_click: false,
            action: 7,
            item: Some(ItemStack {
                id: 3,
                count: 64,
                damage: 0,
            }),
        },
        Serverbound::Transaction {
            window: 0,
            action: 7,
            accepted: true,
        },
        Serverbound::UpdateSign {
            pos: BlockPos::new(-28, 70, 84),
            lines: ["north".into(), String::new(), "to the".into(), "mines".into()],
        },
        Serverbound::Disconnect {
            reason: "Quitting".into(),
        },
    ]
}

fn encode_all(codec: &PacketCodec, packets: &[Serverbound]) -> Vec<u8> {
    packets.iter().flat_map(|p| p.encode(codec).unwrap()).collect()
}

fn raise(decoded: &[Decoded]) -> Vec<Serverbound> {
    decoded
        .iter()
        .map(|d| Serverbound::from_decoded(d).unwrap().unwrap())
        .collect()
}

/// Feed `pieces` one after another, carrying leftovers forward.
fn parse_in_pieces(codec: &PacketCodec, pieces: &[&[u8]]) -> Vec<Decoded> {
    let mut pending = Vec::new();
    let mut out = Vec::new();
    for piece in pieces {
        pending.extend_from_slice(piece);
        let (packets, rest) = codec.parse_stream(&pending).unwrap();
        out.extend(packets);
        pending = rest;
    }
    assert!(pending.is_empty(), "{} bytes left over", pending.len());
    out
}

// ---------------------------------------------------------------------------
// Stream splitting
// ---------------------------------------------------------------------------

#[test]
fn whole_buffer_parses_to_the_same_packets() {
    let codec = protocol::serverbound();
    let packets = sample_packets();
    let bytes = encode_all(&codec, &packets);

    let (decoded, rest) = codec.parse_stream(&bytes).unwrap();
    assert!(rest.is_empty());
    assert_eq!(raise(&decoded), packets);
}

#[test]
fn any_single_split_point_gives_the_same_result() {
    let codec = protocol::serverbound();
    let packets = sample_packets();
    let bytes = encode_all(&codec, &packets);

    for split in 0..=bytes.len() {
        let (a, b) = bytes.split_at(split);
        let decoded = parse_in_pieces(&codec, &[a, b]);
        assert_eq!(raise(&decoded), packets, "split at {split}");
    }
}

#[test]
fn byte_at_a_time_gives_the_same_result() {
    for framing in [Framing::Legacy, Framing::LengthPrefixed] {
        let codec = PacketCodec::new(&SERVERBOUND, framing);
        let packets = sample_packets();
        let bytes = encode_all(&codec, &packets);

        let pieces: Vec<&[u8]> = bytes.chunks(1).collect();
        let decoded = parse_in_pieces(&codec, &pieces);
        assert_eq!(raise(&decoded), packets, "{framing:?}");
    }
}

#[test]
fn a_cut_off_packet_is_left_for_the_next_read() {
    let codec = protocol::serverbound();
    let chat = Serverbound::Chat {
        message: "abcdef".into(),
    }
    .encode(&codec)
    .unwrap();

    let mut bytes = Serverbound::KeepAlive.encode(&codec).unwrap();
    bytes.extend_from_slice(&chat[..5]);
    let (decoded, rest) = codec.parse_stream(&bytes).unwrap();
    assert_eq!(decoded.len(), 1);
    assert_eq!(rest, &chat[..5]);

    assert!(matches!(
        codec.parse_packet(&chat[..5], 0),
        Err(ProtocolError::NeedMoreBytes(_))
    ));
    assert!(matches!(codec.parse_packet(&[], 0), Err(ProtocolError::NeedMoreBytes(1))));
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[test]
fn unknown_id_is_reported() {
    let codec = protocol::serverbound();
    let mut bytes = Serverbound::KeepAlive.encode(&codec).unwrap();
    bytes.push(0xFE);
    assert_eq!(
        codec.parse_stream(&bytes),
        Err(ProtocolError::UnknownPacket { id: 0xFE })
    );
}

#[test]
fn invalid_utf8_is_malformed() {
    let codec = protocol::serverbound();
    let bytes = [id::CHAT as u8, 0x00, 0x02, 0xC3, 0x28];
    assert!(matches!(
        codec.parse_packet(&bytes, 0),
        Err(ProtocolError::Malformed { id: 0x03, .. })
    ));
}

#[test]
fn missing_field_fails_the_build() {
    let codec = protocol::serverbound();
    assert_eq!(
        codec.build_packet(id::CHAT, &Fields::new()),
        Err(ProtocolError::Encoding(EncodeError::MissingField("message")))
    );
    assert_eq!(
        codec.build_packet(0xFE, &Fields::new()),
        Err(ProtocolError::UnknownPacket { id: 0xFE })
    );
}

#[test]
fn overlong_strings_cannot_be_encoded() {
    let codec = protocol::serverbound();
    let fields = Fields::new().with("message", Value::Str("x".repeat(70_000)));
    assert!(matches!(
        codec.build_packet(id::CHAT, &fields),
        Err(ProtocolError::Encoding(EncodeError::StringTooLong { .. }))
    ));
}

// ---------------------------------------------------------------------------
// Canonical packets
// ---------------------------------------------------------------------------

#[test]
fn keepalive_is_a_lone_id_byte() {
    let codec = protocol::serverbound();
    assert_eq!(Serverbound::KeepAlive.encode(&codec).unwrap(), vec![0x00]);
}

#[test]
fn position_look_carries_four_doubles_two_floats_and_a_flag() {
    let codec = protocol::serverbound();
    let bytes = sample_packets()[3].encode(&codec).unwrap();
    assert_eq!(bytes.len(), 1 + 4 * 8 + 2 * 4 + 1);
    assert_eq!(bytes[0], 0x0D);
    assert_eq!(&bytes[1..9], &8.5f64.to_be_bytes());
    assert_eq!(*bytes.last().unwrap(), 1);
}

#[test]
fn item_tail_is_present_only_for_real_items() {
    let codec = protocol::serverbound();
    let with_item = sample_packets()[4].encode(&codec).unwrap();
    let empty_hand = sample_packets()[5].encode(&codec).unwrap();
    // id, x, y, z, face, item [, count, damage]
    assert_eq!(empty_hand.len(), 1 + 4 + 1 + 4 + 1 + 2);
    assert_eq!(with_item.len(), empty_hand.len() + 1 + 2);

    let (decoded, _) = codec.parse_packet(&empty_hand, 0).unwrap();
    assert_eq!(decoded.fields.int("item"), Some(-1));
    assert!(!decoded.fields.contains("count"));

    let (decoded, _) = codec.parse_packet(&with_item, 0).unwrap();
    assert_eq!(decoded.fields.int("count"), Some(12));
    assert_eq!(decoded.fields.int("damage"), Some(0));
}

#[test]
fn set_slot_uses_the_same_conditional_tail() {
    let codec = protocol::clientbound();
    let cleared = Clientbound::SetSlot {
        window: 0,
        slot: 36,
        item: None,
    }
    .encode(&codec)
    .unwrap();
    assert_eq!(cleared, vec![0x67, 0x00, 0x00, 0x24, 0xFF, 0xFF]);
}

#[test]
fn window_click_with_an_empty_cursor_stops_after_the_item_id() {
    let codec = protocol::serverbound();
    let bytes = Serverbound::WindowClick {
        window: 0,
        slot: 9,
        right_click: true,
        action: 1,
        item: None,
    }
    .encode(&codec)
    .unwrap();
    assert_eq!(bytes, vec![0x66, 0x00, 0x00, 0x09, 0x01, 0x00, 0x01, 0xFF, 0xFF]);
}

#[test]
fn transaction_reply_is_window_action_and_verdict() {
    let codec = protocol::clientbound();
    let bytes = Clientbound::Transaction {
        window: 0,
        action: 258,
        accepted: false,
    }
    .encode(&codec)
    .unwrap();
    assert_eq!(bytes, vec![0x6A, 0x00, 0x01, 0x02, 0x00]);

    let (decoded, _) = codec.parse_packet(&bytes, 0).unwrap();
    assert_eq!(
        Clientbound::from_decoded(&decoded).unwrap(),
        Some(Clientbound::Transaction {
            window: 0,
            action: 258,
            accepted: false,
        })
    );
}

#[test]
fn sign_text_takes_a_short_height_and_four_lines() {
    let codec = protocol::serverbound();
    let sign = &sample_packets()[10];
    let bytes = sign.encode(&codec).unwrap();
    // id, x, y (short), z, then four u16-prefixed strings
    assert_eq!(bytes.len(), 1 + 4 + 2 + 4 + (2 + 5) + 2 + (2 + 6) + (2 + 5));
    assert_eq!(&bytes[5..7], &70i16.to_be_bytes());

    let (decoded, used) = codec.parse_packet(&bytes, 0).unwrap();
    assert_eq!(used, bytes.len());
    assert_eq!(Serverbound::from_decoded(&decoded).unwrap().as_ref(), Some(sign));
}

#[test]
fn length_prefixed_frames_declare_their_size() {
    let codec = PacketCodec::new(&SERVERBOUND, Framing::LengthPrefixed);
    let chat = Serverbound::Chat {
        message: "hi".into(),
    };
    let bytes = chat.encode(&codec).unwrap();
    // varint length, varint id, u16 length, "hi"
    assert_eq!(bytes, vec![5, 0x03, 0x00, 0x02, b'h', b'i']);

    let (decoded, used) = codec.parse_packet(&bytes, 0).unwrap();
    assert_eq!(used, bytes.len());
    assert_eq!(Serverbound::from_decoded(&decoded).unwrap(), Some(chat));

    let mut padded = bytes.clone();
    padded[0] = 6;
    padded.push(0);
    assert!(matches!(
        codec.parse_packet(&padded, 0),
        Err(ProtocolError::Malformed { .. })
    ));
}
