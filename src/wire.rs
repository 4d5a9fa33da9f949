//! OP_MSG framing and command round trips.
//!
//! Every message starts with a 16 byte header (total length, request id, the id being
//! responded to, and the opcode) followed by a flag word and one or more sections. Requests
//! built here carry a single kind 0 section holding the command document.

use std::sync::atomic::{AtomicI32, Ordering};

use crate::{
    Bson,
    Document,
    cmap::Connection,
    error::{Error, ErrorKind, Result},
    raw::i32_from_slice,
    serializer::{BsonType, SerializationContext},
};

/// The opcode of OP_MSG.
pub const OP_MSG: i32 = 2013;

const HEADER_LENGTH: usize = 16;

/// The message ends with a CRC-32C checksum.
const CHECKSUM_PRESENT: u32 = 1;
/// The sender will not wait for a reply.
const MORE_TO_COME: u32 = 1 << 1;
/// Bits 0 to 15 must be understood by the receiver.
const REQUIRED_FLAGS_MASK: u32 = 0xFFFF;
const KNOWN_REQUIRED_FLAGS: u32 = CHECKSUM_PRESENT | MORE_TO_COME;

const SECTION_BODY: u8 = 0;
const SECTION_DOCUMENT_SEQUENCE: u8 = 1;

static NEXT_REQUEST_ID: AtomicI32 = AtomicI32::new(1);

/// Returns a process-wide unique request id.
pub fn next_request_id() -> i32 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// An OP_MSG with a single body document.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub request_id: i32,
    pub response_to: i32,
    pub flags: u32,
    pub document: Document,
}

impl Message {
    /// A command to run against `db`. The `$db` element is set on a copy of `command`.
    pub fn command(db: &str, command: &Document) -> Self {
        let mut document = command.clone();
        document.insert("$db", db);
        Self {
            request_id: next_request_id(),
            response_to: 0,
            flags: 0,
            document,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = self.document.to_vec()?;
        let length = HEADER_LENGTH + 4 + 1 + body.len();
        let length = i32::try_from(length)
            .map_err(|_| Error::invalid_argument(format!("message of {length} bytes is too large")))?;

        let mut bytes = Vec::with_capacity(length as usize);
        bytes.extend_from_slice(&length.to_le_bytes());
        bytes.extend_from_slice(&self.request_id.to_le_bytes());
        bytes.extend_from_slice(&self.response_to.to_le_bytes());
        bytes.extend_from_slice(&OP_MSG.to_le_bytes());
        bytes.extend_from_slice(&(self.flags & !CHECKSUM_PRESENT).to_le_bytes());
        bytes.push(SECTION_BODY);
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Decodes a complete message. Document sequence sections are skipped; a checksum, if
    /// present, is not verified.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LENGTH + 4 {
            return Err(Error::malformed_value(format!(
                "message of {} bytes is shorter than its header",
                bytes.len()
            )));
        }
        let length = i32_from_slice(bytes)?;
        if length as usize != bytes.len() {
            return Err(Error::malformed_value(format!(
                "message length {length} does not match the {} bytes received",
                bytes.len()
            )));
        }
        let request_id = i32_from_slice(&bytes[4..])?;
        let response_to = i32_from_slice(&bytes[8..])?;
        let opcode = i32_from_slice(&bytes[12..])?;
        if opcode != OP_MSG {
            return Err(Error::malformed_value(format!("unsupported opcode {opcode}")));
        }

        let flags = u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
        if flags & REQUIRED_FLAGS_MASK & !KNOWN_REQUIRED_FLAGS != 0 {
            return Err(Error::malformed_value(format!(
                "unknown required flag bits in {flags:#x}"
            )));
        }

        let mut end = bytes.len();
        if flags & CHECKSUM_PRESENT != 0 {
            end = end.checked_sub(4).ok_or_else(|| Error::malformed_value("missing checksum"))?;
        }

        let mut document = None;
        let mut offset = HEADER_LENGTH + 4;
        while offset < end {
            let kind = bytes[offset];
            offset += 1;
            let size = i32_from_slice(&bytes[offset..end])?;
            let section_end = usize::try_from(size)
                .ok()
                .and_then(|size| offset.checked_add(size))
                .filter(|section_end| *section_end <= end)
                .ok_or_else(|| Error::malformed_value(format!("invalid section size {size}")))?;

            match kind {
                SECTION_BODY if document.is_none() => {
                    document = Some(Document::from_slice(&bytes[offset..section_end])?);
                }
                SECTION_BODY => {
                    return Err(Error::malformed_value("message has more than one body section"));
                }
                SECTION_DOCUMENT_SEQUENCE => {}
                other => {
                    return Err(Error::malformed_value(format!("unknown section kind {other}")));
                }
            }
            offset = section_end;
        }

        Ok(Self {
            request_id,
            response_to,
            flags,
            document: document
                .ok_or_else(|| Error::malformed_value("message has no body section"))?,
        })
    }
}

/// Sends `command` to `db` over `connection` and returns the reply document.
///
/// A reply whose `responseTo` does not match the request closes the connection. A reply
/// with `ok: 0` becomes [`ErrorKind::Command`].
pub fn run_command(connection: &mut Connection, db: &str, command: &Document) -> Result<Document> {
    let request = Message::command(db, command);
    connection.send(&request.encode()?)?;

    let reply = match Message::decode(&connection.receive()?) {
        Ok(reply) => reply,
        Err(e) => {
            connection.close();
            return Err(e);
        }
    };
    if reply.response_to != request.request_id {
        connection.close();
        return Err(Error::connection_failure(
            connection.address(),
            format!(
                "reply responds to request {} but request {} was sent",
                reply.response_to, request.request_id
            ),
        ));
    }

    tracing::trace!(
        address = %connection.address(),
        request_id = request.request_id,
        "command reply received"
    );
    check_ok(reply.document)
}

/// Like [`run_command`], deserializing the reply through `ctx`.
pub fn run_command_as<T: BsonType>(
    ctx: &SerializationContext,
    connection: &mut Connection,
    db: &str,
    command: &Document,
) -> Result<T> {
    let reply = run_command(connection, db, command)?;
    ctx.from_document(&reply)
}

fn check_ok(reply: Document) -> Result<Document> {
    let ok = match reply.get("ok") {
        Some(Bson::Boolean(ok)) => *ok,
        Some(value) => value.to_f64().map(|ok| ok == 1.0).unwrap_or(false),
        None => false,
    };
    if ok {
        return Ok(reply);
    }

    let code = reply.get_i32("code").unwrap_or(0);
    let message = reply
        .get_str("errmsg")
        .unwrap_or("command failed without an error message")
        .to_string();
    Err(ErrorKind::Command { code, message }.into())
}

#[cfg(test)]
pub(crate) fn reply_to(request: &[u8], document: &Document) -> Result<Vec<u8>> {
    let request = Message::decode(request)?;
    Message {
        request_id: next_request_id(),
        response_to: request.request_id,
        flags: 0,
        document: document.clone(),
    }
    .encode()
}
