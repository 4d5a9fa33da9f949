use std::{
    io::{self, Read, Write},
    sync::Arc,
};

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;

use crate::{
    Bson,
    Document,
    class_map::{BsonClass, ClassMapBuilder},
    cmap::{Connection, ServerAddress},
    doc,
    error::ErrorKind,
    serializer::SerializationContext,
    tests::MockStream,
    wire::{self, Message, OP_MSG},
};

fn connection(handler: impl Fn(&Document) -> Document + Send + Sync + 'static) -> Connection {
    Connection::new(
        1,
        ServerAddress::new("wire.test", 27017),
        0,
        Box::new(MockStream::new(Arc::new(handler))),
    )
}

fn set_flags(bytes: &mut [u8], flags: u32) {
    bytes[16..20].copy_from_slice(&flags.to_le_bytes());
}

#[test]
fn command_messages() {
    let command = doc! { "ping": 1 };
    let message = Message::command("admin", &command);
    assert_eq!(message.document, doc! { "ping": 1, "$db": "admin" });
    assert_eq!(command, doc! { "ping": 1 });
    assert_ne!(Message::command("admin", &command).request_id, message.request_id);

    let bytes = message.encode().unwrap();
    let body = message.document.to_vec().unwrap();
    assert_eq!(bytes.len(), 16 + 4 + 1 + body.len());
    assert_eq!(&bytes[..4], &(bytes.len() as i32).to_le_bytes());
    assert_eq!(&bytes[12..16], &OP_MSG.to_le_bytes());
    assert_eq!(bytes[20], 0);

    assert_eq!(Message::decode(&bytes).unwrap(), message);
}

#[test]
fn checksum_flag() {
    let mut message = Message::command("db", &doc! { "find": "c" });
    message.flags = 1;
    let mut bytes = message.encode().unwrap();
    // the encoder never writes a checksum
    assert_eq!(&bytes[16..20], &[0, 0, 0, 0]);

    set_flags(&mut bytes, 1);
    bytes.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
    let length = bytes.len() as i32;
    bytes[..4].copy_from_slice(&length.to_le_bytes());
    let decoded = Message::decode(&bytes).unwrap();
    assert_eq!(decoded.flags, 1);
    assert_eq!(decoded.document, message.document);
}

#[test]
fn required_flags() {
    let mut bytes = Message::command("db", &doc! { "ping": 1 }).encode().unwrap();

    set_flags(&mut bytes, 1 << 16);
    assert!(Message::decode(&bytes).is_ok());

    set_flags(&mut bytes, 1 << 1);
    assert!(Message::decode(&bytes).is_ok());

    set_flags(&mut bytes, 1 << 2);
    assert!(Message::decode(&bytes).unwrap_err().is_format_error());
}

#[test]
fn document_sequences_are_skipped() {
    let message = Message::command("db", &doc! { "insert": "c" });
    let mut bytes = message.encode().unwrap();

    let item = doc! { "x": 1 }.to_vec().unwrap();
    let identifier = b"documents\0";
    let size = (4 + identifier.len() + item.len()) as i32;
    bytes.push(1);
    bytes.extend_from_slice(&size.to_le_bytes());
    bytes.extend_from_slice(identifier);
    bytes.extend_from_slice(&item);
    let length = bytes.len() as i32;
    bytes[..4].copy_from_slice(&length.to_le_bytes());

    assert_eq!(Message::decode(&bytes).unwrap().document, message.document);
}

#[test]
fn malformed_messages() {
    let bytes = Message::command("db", &doc! { "ping": 1 }).encode().unwrap();

    assert!(Message::decode(&bytes[..10]).is_err());
    assert!(Message::decode(&bytes[..bytes.len() - 1]).is_err());

    let mut wrong_opcode = bytes.clone();
    wrong_opcode[12..16].copy_from_slice(&2004i32.to_le_bytes());
    let err = Message::decode(&wrong_opcode).unwrap_err();
    assert!(err.to_string().contains("2004"));

    let mut unknown_section = bytes.clone();
    unknown_section[20] = 7;
    assert!(Message::decode(&unknown_section).is_err());

    let mut two_bodies = bytes.clone();
    two_bodies.extend_from_slice(&bytes[20..]);
    let length = two_bodies.len() as i32;
    two_bodies[..4].copy_from_slice(&length.to_le_bytes());
    assert!(Message::decode(&two_bodies).is_err());

    let mut no_body = bytes[..20].to_vec();
    no_body[..4].copy_from_slice(&20i32.to_le_bytes());
    assert!(Message::decode(&no_body).is_err());
}

#[test]
fn run_command_round_trip() {
    let mut conn = connection(|command| {
        doc! { "ok": 1, "echo": command.get_str("hello").unwrap_or_default(), "db": command.get_str("$db").unwrap_or_default() }
    });
    let reply = wire::run_command(&mut conn, "test", &doc! { "hello": "there" }).unwrap();
    assert_eq!(reply, doc! { "ok": 1, "echo": "there", "db": "test" });
    assert!(conn.is_open());
}

#[test]
fn failed_commands() {
    let mut conn = connection(|_| doc! { "ok": 0.0, "code": 13, "errmsg": "unauthorized" });
    let err = wire::run_command(&mut conn, "test", &doc! { "drop": "c" }).unwrap_err();
    assert_matches!(
        err.kind,
        ErrorKind::Command { code: 13, ref message } if message == "unauthorized"
    );
    // a command error leaves the connection usable
    assert!(conn.is_open());

    let mut conn = connection(|_| doc! { "ok": false });
    assert_matches!(
        wire::run_command(&mut conn, "test", &doc! { "x": 1 }).unwrap_err().kind,
        ErrorKind::Command { code: 0, .. }
    );

    let mut conn = connection(|_| doc! { "n": 1 });
    assert!(wire::run_command(&mut conn, "test", &doc! { "x": 1 }).is_err());

    let mut conn = connection(|_| doc! { "ok": Bson::Int64(1) });
    assert!(wire::run_command(&mut conn, "test", &doc! { "x": 1 }).is_ok());
}

/// Answers every request with a reply to request id 0.
struct MisroutedStream {
    reply: io::Cursor<Vec<u8>>,
}

impl Read for MisroutedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reply.read(buf)
    }
}

impl Write for MisroutedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn mismatched_reply_closes_the_connection() {
    let reply = Message {
        request_id: 99,
        response_to: 0,
        flags: 0,
        document: doc! { "ok": 1 },
    }
    .encode()
    .unwrap();
    let mut conn = Connection::new(
        1,
        ServerAddress::new("wire.test", 27017),
        0,
        Box::new(MisroutedStream {
            reply: io::Cursor::new(reply),
        }),
    );

    let err = wire::run_command(&mut conn, "test", &doc! { "ping": 1 }).unwrap_err();
    assert!(err.is_network_error());
    assert!(!conn.is_open());

    let err = wire::run_command(&mut conn, "test", &doc! { "ping": 1 }).unwrap_err();
    assert_matches!(err.kind, ErrorKind::ConnectionFailure { .. });
}

#[derive(Debug, Default, PartialEq)]
struct BuildInfo {
    version: String,
    max_bson_object_size: i32,
}

impl BsonClass for BuildInfo {
    fn map_class(cm: &mut ClassMapBuilder<Self>) {
        cm.map_member("version", |b| &b.version, |b| &mut b.version);
        cm.map_member(
            "maxBsonObjectSize",
            |b| &b.max_bson_object_size,
            |b| &mut b.max_bson_object_size,
        );
        cm.set_ignore_extra_elements(true);
    }
}

#[test]
fn typed_command_replies() {
    let mut conn = connection(|_| {
        doc! { "version": "7.0.2", "maxBsonObjectSize": 16777216, "ok": 1.0 }
    });
    let ctx = SerializationContext::new();
    let info: BuildInfo =
        wire::run_command_as(&ctx, &mut conn, "admin", &doc! { "buildInfo": 1 }).unwrap();
    assert_eq!(
        info,
        BuildInfo {
            version: "7.0.2".into(),
            max_bson_object_size: 16777216,
        }
    );
}
