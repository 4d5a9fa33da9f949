use std::fmt::{self, Display};

use base64::{Engine, engine::general_purpose::STANDARD};
use uuid::Uuid;

use crate::{
    error::{Error, Result},
    spec::BinarySubtype,
};

/// Represents a BSON binary value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Binary {
    /// The subtype of the bytes.
    pub subtype: BinarySubtype,

    /// The binary bytes.
    pub bytes: Vec<u8>,
}

impl Display for Binary {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "BinData({}, \"{}\")",
            u8::from(self.subtype),
            self.to_base64()
        )
    }
}

impl Binary {
    /// Creates a [`Binary`] from a base64 string and optional [`BinarySubtype`]. If the
    /// `subtype` argument is [`None`], the [`Binary`] constructed will default to
    /// [`BinarySubtype::Generic`].
    pub fn from_base64(
        input: impl AsRef<str>,
        subtype: impl Into<Option<BinarySubtype>>,
    ) -> Result<Self> {
        let bytes = STANDARD
            .decode(input.as_ref())
            .map_err(|e| Error::malformed_value(format!("invalid base64: {e}")))?;
        let subtype = subtype.into().unwrap_or(BinarySubtype::Generic);
        Ok(Binary { subtype, bytes })
    }

    /// Encodes the bytes as standard padded base64.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// Wraps a UUID in the standard (subtype 4) representation.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self {
            subtype: BinarySubtype::Uuid,
            bytes: uuid.as_bytes().to_vec(),
        }
    }

    /// Reads a UUID out of a subtype 4 binary.
    pub fn to_uuid(&self) -> Result<Uuid> {
        if self.subtype != BinarySubtype::Uuid {
            return Err(Error::serialization(format!(
                "expected binary subtype {:?} for a UUID, got {:?}",
                BinarySubtype::Uuid,
                self.subtype
            )));
        }
        Uuid::from_slice(&self.bytes).map_err(|e| Error::malformed_value(e.to_string()))
    }
}
