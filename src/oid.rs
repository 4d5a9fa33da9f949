//! Module containing functionality related to BSON ObjectIds.
//! For more information, see the documentation for the [`ObjectId`] type.

use std::{
    fmt,
    str::FromStr,
    sync::{
        LazyLock,
        atomic::{AtomicUsize, Ordering},
    },
    time::SystemTime,
};

use rand::{Rng, random};

use crate::{
    DateTime,
    error::{Error, ErrorKind, ObjectIdErrorKind, Result},
};

const TIMESTAMP_SIZE: usize = 4;
const PROCESS_ID_SIZE: usize = 5;
const COUNTER_SIZE: usize = 3;

const TIMESTAMP_OFFSET: usize = 0;
const PROCESS_ID_OFFSET: usize = TIMESTAMP_OFFSET + TIMESTAMP_SIZE;
const COUNTER_OFFSET: usize = PROCESS_ID_OFFSET + PROCESS_ID_SIZE;

const MAX_U24: usize = 0xFF_FFFF;

static OID_COUNTER: LazyLock<AtomicUsize> =
    LazyLock::new(|| AtomicUsize::new(rand::rng().random_range(0..=MAX_U24)));

static PROCESS_UNIQUE: LazyLock<[u8; PROCESS_ID_SIZE]> = LazyLock::new(random);

/// A wrapper around a raw 12-byte ObjectId.
///
/// The bytes are laid out as a 4-byte big-endian timestamp in seconds, a 5-byte value unique to
/// this process and a 3-byte big-endian counter.
///
/// ```rust
/// let oid = mongo_core::oid::ObjectId::new();
/// let parsed = mongo_core::oid::ObjectId::parse_str(oid.to_hex()).unwrap();
/// assert_eq!(oid, parsed);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ObjectId {
    id: [u8; 12],
}

impl ObjectId {
    /// The all-zero ObjectId. Id generators treat this value as "not yet assigned".
    pub const EMPTY: ObjectId = ObjectId { id: [0; 12] };

    /// Generates a new [`ObjectId`], represented in bytes.
    pub fn new() -> ObjectId {
        let timestamp = Self::gen_timestamp();
        let process_id = *PROCESS_UNIQUE;
        let counter = Self::gen_count();

        let mut buf: [u8; 12] = [0; 12];
        buf[TIMESTAMP_OFFSET..PROCESS_ID_OFFSET].copy_from_slice(&timestamp[..]);
        buf[PROCESS_ID_OFFSET..COUNTER_OFFSET].copy_from_slice(&process_id[..]);
        buf[COUNTER_OFFSET..].copy_from_slice(&counter[..]);

        Self::from_bytes(buf)
    }

    /// Constructs a new ObjectId wrapper around the raw byte representation.
    pub const fn from_bytes(bytes: [u8; 12]) -> ObjectId {
        ObjectId { id: bytes }
    }

    /// Creates an ObjectId using a 12-byte (24-char) hexadecimal string.
    pub fn parse_str(s: impl AsRef<str>) -> Result<ObjectId> {
        let s = s.as_ref();

        let bytes: Vec<u8> = hex::decode(s.as_bytes()).map_err(|e| {
            let kind = match e {
                hex::FromHexError::InvalidHexCharacter { c, index } => {
                    ObjectIdErrorKind::InvalidHexStringCharacter { c, index }
                }
                hex::FromHexError::InvalidStringLength | hex::FromHexError::OddLength => {
                    ObjectIdErrorKind::InvalidHexStringLength { length: s.len() }
                }
            };
            Error::from(ErrorKind::ObjectId { kind })
        })?;

        let buf: [u8; 12] = bytes.try_into().map_err(|_| {
            Error::from(ErrorKind::ObjectId {
                kind: ObjectIdErrorKind::InvalidHexStringLength { length: s.len() },
            })
        })?;
        Ok(ObjectId::from_bytes(buf))
    }

    /// Retrieves the timestamp from an [`ObjectId`].
    pub fn timestamp(&self) -> DateTime {
        let mut buf = [0; 4];
        buf.copy_from_slice(&self.id[0..4]);
        let seconds_since_epoch = u32::from_be_bytes(buf);

        DateTime::from_millis(seconds_since_epoch as i64 * 1000)
    }

    /// Returns the raw byte representation of an ObjectId.
    pub const fn bytes(&self) -> [u8; 12] {
        self.id
    }

    /// Whether this is the all-zero sentinel.
    pub fn is_empty(&self) -> bool {
        self.id == Self::EMPTY.id
    }

    /// Convert this [`ObjectId`] to its hex string representation.
    pub fn to_hex(self) -> String {
        hex::encode(self.id)
    }

    fn gen_timestamp() -> [u8; 4] {
        let timestamp: u32 = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        timestamp.to_be_bytes()
    }

    fn gen_count() -> [u8; 3] {
        let u_counter = OID_COUNTER.fetch_add(1, Ordering::SeqCst);

        // Mod result instead of OID_COUNTER to prevent threading issues.
        let u = u_counter % (MAX_U24 + 1);

        // Convert to u32 for big-endian byte order; the high byte is dropped.
        let u_int = u as u32;
        let buf = u_int.to_be_bytes();
        [buf[1], buf[2], buf[3]]
    }
}

impl FromStr for ObjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_str(s)
    }
}

impl From<[u8; 12]> for ObjectId {
    fn from(bytes: [u8; 12]) -> Self {
        Self { id: bytes }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("ObjectId").field(&self.to_hex()).finish()
    }
}
