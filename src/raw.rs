//! Low-level streaming access to BSON bytes.
//!
//! [`BsonReader`] and [`BsonWriter`] walk the wire format one element at a time. Serializers in
//! [`crate::serializer`] are written against these two types; whole [`Document`](crate::Document)
//! values can also be written and read in one call.

mod doc_writer;
mod reader;
mod writer;

pub(crate) use self::doc_writer::DocWriter;
pub use self::{
    reader::{Bookmark, BsonReader},
    writer::{BsonWriter, BsonWriterSettings, DocumentScope},
};

use crate::error::{Error, ErrorKind, Result};

/// The smallest possible document: a length prefix and a terminator.
pub(crate) const MIN_BSON_DOCUMENT_SIZE: i32 = 5;

/// The default limit on the encoded size of a single document.
pub const DEFAULT_MAX_DOCUMENT_SIZE: usize = 16 * 1024 * 1024;

/// Given a u8 slice, return an i32 calculated from the first four bytes in
/// little endian order.
pub(crate) fn i32_from_slice(val: &[u8]) -> Result<i32> {
    let arr: [u8; 4] = val
        .get(0..4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| {
            Error::malformed_value(format!("expected 4 bytes to read i32, instead got {}", val.len()))
        })?;
    Ok(i32::from_le_bytes(arr))
}

/// Reads a string length prefix, which counts the trailing null byte and so must be positive.
pub(crate) fn read_len(buf: &[u8]) -> Result<usize> {
    let length = i32_from_slice(buf)?;
    if length < 1 {
        return Err(Error::malformed_value(format!(
            "string length must be at least 1, got {length}"
        )));
    }
    Ok(length as usize)
}

pub(crate) fn checked_add(lhs: usize, rhs: usize) -> Result<usize> {
    lhs.checked_add(rhs)
        .ok_or_else(|| Error::malformed_value("attempted to add with overflow"))
}

pub(crate) fn try_to_str(data: &[u8]) -> Result<&str> {
    simdutf8::basic::from_utf8(data).map_err(|_| ErrorKind::Utf8Encoding.into())
}
