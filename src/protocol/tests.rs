use super::frames::{Component, FrameHeader, HEADER_LEN, MsgType, read_frame, send_frame};
use super::status::StoreError;
use super::types::*;

#[test]
fn header_roundtrip() {
    let header = FrameHeader::with_name(
        MsgType::Create,
        Component::Client,
        Component::Directory,
        "notes.txt",
    );
    let raw = header.encode();
    assert_eq!(raw.len(), HEADER_LEN);

    let decoded = FrameHeader::decode(&raw).unwrap();
    assert_eq!(decoded.msg_type, MsgType::Create);
    assert_eq!(decoded.source, Component::Client);
    assert_eq!(decoded.dest, Component::Directory);
    assert_eq!(decoded.payload_len, 0);
    assert_eq!(decoded.name, "notes.txt");
}

#[test]
fn header_rejects_unknown_msg_type() {
    let mut raw = FrameHeader::new(MsgType::Ack, Component::Node, Component::Directory).encode();
    raw[0] = 0xFF;
    raw[1] = 0xFF;
    assert!(FrameHeader::decode(&raw).is_err());
}

#[test]
fn fixed_str_truncates_long_names() {
    let long_name = "x".repeat(FILE_NAME_LEN + 40);
    let header = FrameHeader::with_name(
        MsgType::Read,
        Component::Client,
        Component::Directory,
        &long_name,
    );
    let decoded = FrameHeader::decode(&header.encode()).unwrap();
    assert_eq!(decoded.name.len(), FILE_NAME_LEN);
}

#[test]
fn msg_type_discriminants_are_stable() {
    // Registered Nodes depend on the numeric values; pin a sample of them.
    assert_eq!(MsgType::Register as u16, 10);
    assert_eq!(MsgType::RegisterClient as u16, 23);
    assert_eq!(MsgType::DeadNodeReport as u16, 38);
    assert_eq!(MsgType::InternalRead as u16, 100);
    assert_eq!(MsgType::LocateFile as u16, 130);
    for raw in [10u16, 23, 38, 100, 107, 123, 131] {
        let parsed = MsgType::from_u16(raw).unwrap();
        assert_eq!(parsed as u16, raw);
    }
}

#[test]
fn node_addr_roundtrip() {
    let addr = NodeAddr {
        ip: "127.0.0.1".to_string(),
        port: 9001,
    };
    let raw = addr.encode();
    assert_eq!(raw.len(), NodeAddr::WIRE_LEN);
    assert_eq!(NodeAddr::decode(&raw).unwrap(), addr);
}

#[test]
fn access_grant_roundtrip() {
    let grant = AccessGrant {
        identity: "bob".to_string(),
        permission: Permission::Write,
    };
    assert_eq!(AccessGrant::decode(&grant.encode()).unwrap(), grant);
}

#[test]
fn access_grant_rejects_bad_permission() {
    let mut raw = AccessGrant {
        identity: "bob".to_string(),
        permission: Permission::Read,
    }
    .encode();
    raw[IDENT_LEN] = 7;
    assert!(AccessGrant::decode(&raw).is_err());
}

#[test]
fn file_record_roundtrip_with_acl() {
    let record = FileRecordWire {
        name: "report.txt".to_string(),
        owner: "alice".to_string(),
        acl: vec![
            AclEntry {
                identity: "bob".to_string(),
                permission: Permission::Read,
            },
            AclEntry {
                identity: "carol".to_string(),
                permission: Permission::Write,
            },
        ],
        word_count: 42,
        char_count: 230,
        created: 1_700_000_000,
        modified: 1_700_000_100,
        last_accessed: 1_700_000_200,
        last_accessed_by: "bob".to_string(),
        folder: "projects".to_string(),
    };
    let raw = record.encode();
    assert_eq!(raw.len(), FileRecordWire::WIRE_LEN);
    assert_eq!(FileRecordWire::decode(&raw).unwrap(), record);
}

#[test]
fn file_info_roundtrip() {
    let info = FileInfoWire {
        name: "report.txt".to_string(),
        owner: "alice".to_string(),
        node_ip: "10.0.0.4".to_string(),
        node_port: 9002,
        acl: vec![AclEntry {
            identity: "bob".to_string(),
            permission: Permission::Read,
        }],
        word_count: 12,
        char_count: 80,
        created: 1,
        modified: 2,
        last_accessed: 3,
        last_accessed_by: "bob".to_string(),
    };
    let raw = info.encode();
    assert_eq!(raw.len(), FileInfoWire::WIRE_LEN);
    assert_eq!(FileInfoWire::decode(&raw).unwrap(), info);
}

#[test]
fn permission_ordering() {
    assert!(Permission::Write.allows(Permission::Read));
    assert!(Permission::Write.allows(Permission::Write));
    assert!(Permission::Read.allows(Permission::Read));
    assert!(!Permission::Read.allows(Permission::Write));
    assert!(!Permission::None.allows(Permission::Read));
}

#[test]
fn error_codes_map_to_taxonomy() {
    assert_eq!(StoreError::BadRequest("x".into()).text_code(), "ERR_400");
    assert_eq!(StoreError::Unauthorized("x".into()).text_code(), "ERR_403");
    assert_eq!(StoreError::NotFound("x".into()).text_code(), "ERR_404");
    assert_eq!(StoreError::Conflict("x".into()).text_code(), "ERR_409");
    assert_eq!(StoreError::Internal("x".into()).text_code(), "ERR_500");
    assert_eq!(
        StoreError::NotFound("File not found".into()).text_line(),
        "ERR_404 File not found"
    );
}

#[test]
fn str_payload_tolerates_nul_terminator() {
    assert_eq!(decode_str_payload(b"alice\0"), "alice");
    assert_eq!(decode_str_payload(b"alice"), "alice");
    assert_eq!(encode_str_payload("alice"), b"alice".to_vec());
}

#[tokio::test]
async fn frame_roundtrip_over_stream() {
    let (mut a, mut b) = tokio::io::duplex(4096);

    let header = FrameHeader::with_name(
        MsgType::RegisterFile,
        Component::Node,
        Component::Directory,
        "a.txt",
    );
    let payload = vec![7u8; 96];
    send_frame(&mut a, &header, &payload).await.unwrap();

    let (got, got_payload) = read_frame(&mut b).await.unwrap();
    assert_eq!(got.msg_type, MsgType::RegisterFile);
    assert_eq!(got.name, "a.txt");
    assert_eq!(got.payload_len, 96);
    assert_eq!(got_payload, payload);
}

#[tokio::test]
async fn read_frame_fails_on_truncated_header() {
    let (mut a, mut b) = tokio::io::duplex(4096);
    tokio::io::AsyncWriteExt::write_all(&mut a, &[1u8; 10])
        .await
        .unwrap();
    drop(a);
    assert!(read_frame(&mut b).await.is_err());
}
